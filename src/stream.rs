// 该文件是 Liuguang （流光） 项目的一部分。
// src/stream.rs - 有界帧流
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 帧流
//!
//! 一个帧流拥有一个生产者线程，把一个图像源的输出搬运到有界帧队列中，
//! 消费者只通过 [`FrameStream::next_frame`] 拉取。
//!
//! - 普通模式：队列满时生产者暂停生产，消费者按生产顺序拿到每一帧。
//! - 清空模式：每次入队前丢弃队列中所有旧帧，消费者总是拿到最新的一帧，
//!   适用于实时摄像头。
//!
//! 停止是协作式的：生产者只在每轮循环边界检查停止信号，
//! 正在进行的图像源调用不会被打断，但其结果会被丢弃。

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::DEFAULT_QUEUE_SIZE,
  frame::{Frame, Metadata},
  input::{ImageSource, InputError},
  task::Prediction,
};

mod stop_signal;
pub use self::stop_signal::StopSignal;

/// 队列已满时生产者的等待间隔
const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Error, Debug)]
pub enum StreamError {
  #[error("帧流已结束")]
  Ended,
  #[error("图像源错误: {0}")]
  Source(#[from] InputError),
  #[error("无法启动线程: {0}")]
  Spawn(#[from] std::io::Error),
}

impl StreamError {
  /// 是否应当终止整个进程
  pub fn is_fatal(&self) -> bool {
    match self {
      StreamError::Ended => false,
      StreamError::Source(e) => e.is_fatal(),
      StreamError::Spawn(_) => true,
    }
  }
}

/// 面向消费者的统一拉取接口
///
/// 普通帧流与主题切换控制器都实现该接口，可以互相替换。
pub trait FrameFeed: Send + Sync {
  /// 阻塞直到下一帧可用，没有超时
  fn next_frame(&self) -> Result<Frame, StreamError>;

  fn stop(&self);

  /// 回报推理结果，普通帧流忽略
  fn send_result(&self, _metadata: &Metadata, _predictions: &[Prediction]) {}
}

pub struct FrameStreamBuilder {
  name: String,
  queue_size: usize,
  clear: bool,
}

impl Default for FrameStreamBuilder {
  fn default() -> Self {
    Self {
      name: "frame-stream".to_string(),
      queue_size: DEFAULT_QUEUE_SIZE,
      clear: false,
    }
  }
}

impl FrameStreamBuilder {
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn queue_size(mut self, queue_size: usize) -> Self {
    self.queue_size = queue_size.max(1);
    self
  }

  /// 清空模式：只保留最新的一帧
  pub fn clear(mut self, clear: bool) -> Self {
    self.clear = clear;
    self
  }

  /// 启动生产者线程并立即返回
  pub fn start<S>(self, source: S) -> Result<FrameStream, StreamError>
  where
    S: ImageSource + Send + 'static,
  {
    let (sender, receiver) = bounded(self.queue_size);
    let stop = StopSignal::new();
    let failure = Arc::new(Mutex::new(None));

    let producer = Producer {
      name: self.name.clone(),
      sender,
      drain: receiver.clone(),
      stop: stop.clone(),
      failure: failure.clone(),
      clear: self.clear,
    };

    std::thread::Builder::new()
      .name(self.name.clone())
      .spawn(move || producer.run(source))?;

    info!(
      "帧流 {} 已启动: 队列容量 {}, 清空模式 {}",
      self.name, self.queue_size, self.clear
    );

    Ok(FrameStream {
      name: self.name,
      receiver,
      stop,
      failure,
      capacity: self.queue_size,
      clear: self.clear,
    })
  }
}

struct Producer {
  name: String,
  sender: Sender<Frame>,
  drain: Receiver<Frame>,
  stop: StopSignal,
  failure: Arc<Mutex<Option<InputError>>>,
  clear: bool,
}

/// 生产者线程无论以何种方式退出都会置位停止信号
struct StopOnExit(StopSignal);

impl Drop for StopOnExit {
  fn drop(&mut self) {
    self.0.stop();
  }
}

impl Producer {
  fn run<S: ImageSource>(self, mut source: S) {
    let _guard = StopOnExit(self.stop.clone());
    let mut index = 0u64;

    loop {
      if self.stop.is_stopped() {
        debug!("帧流 {} 收到停止信号", self.name);
        return;
      }

      if !self.clear && self.sender.is_full() {
        self.stop.wait_timeout(FULL_QUEUE_BACKOFF);
        continue;
      }

      let image = match source.get_image() {
        Ok(Some(image)) => image,
        Ok(None) => {
          info!("帧流 {} 的输入已耗尽", self.name);
          return;
        }
        Err(e) => {
          if e.is_fatal() {
            error!("帧流 {} 遇到致命错误: {}", self.name, e);
          } else {
            warn!("帧流 {} 因输入错误结束: {}", self.name, e);
          }
          *self.failure.lock() = Some(e);
          return;
        }
      };

      if self.stop.is_stopped() {
        debug!("帧流 {} 丢弃停止之后产生的帧", self.name);
        return;
      }

      if self.clear {
        let dropped = self.drain.try_iter().count();
        if dropped > 0 {
          debug!("帧流 {} 丢弃 {} 个旧帧", self.name, dropped);
        }
      }

      // 只有一个生产者，检查过容量之后入队不会阻塞
      match self.sender.try_send(Frame::from_source(image, index)) {
        Ok(()) => index += 1,
        Err(TrySendError::Full(_)) => warn!("帧流 {} 队列已满，丢弃一帧", self.name),
        Err(TrySendError::Disconnected(_)) => return,
      }
    }
  }
}

/// 有界帧流
///
/// drop 时自动停止生产者线程。
pub struct FrameStream {
  name: String,
  receiver: Receiver<Frame>,
  stop: StopSignal,
  failure: Arc<Mutex<Option<InputError>>>,
  capacity: usize,
  clear: bool,
}

impl FrameStream {
  pub fn builder() -> FrameStreamBuilder {
    FrameStreamBuilder::default()
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn is_clear(&self) -> bool {
    self.clear
  }

  /// 当前排队的帧数
  pub fn len(&self) -> usize {
    self.receiver.len()
  }

  pub fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }

  pub fn is_stopped(&self) -> bool {
    self.stop.is_stopped()
  }

  /// 帧流结束后的错误只交付一次，之后统一返回 `Ended`
  fn ended(&self) -> StreamError {
    self
      .failure
      .lock()
      .take()
      .map(StreamError::Source)
      .unwrap_or(StreamError::Ended)
  }

  /// 停止之后只交付已经在队列中的帧
  fn drain_after_stop(&self) -> Result<Frame, StreamError> {
    self.receiver.try_recv().map_err(|_| self.ended())
  }

  pub fn next_frame(&self) -> Result<Frame, StreamError> {
    if self.stop.is_stopped() {
      return self.drain_after_stop();
    }
    select! {
      recv(self.receiver) -> frame => frame.map_err(|_| self.ended()),
      recv(self.stop.receiver()) -> _ => self.drain_after_stop(),
    }
  }

  /// 带超时的拉取，超时返回 `Ok(None)`，供调用方实现存活检查
  pub fn next_frame_timeout(&self, timeout: Duration) -> Result<Option<Frame>, StreamError> {
    if self.stop.is_stopped() {
      return self.drain_after_stop().map(Some);
    }
    select! {
      recv(self.receiver) -> frame => frame.map(Some).map_err(|_| self.ended()),
      recv(self.stop.receiver()) -> _ => self.drain_after_stop().map(Some),
      default(timeout) => Ok(None),
    }
  }

  /// 幂等；不会打断正在进行的图像源调用
  pub fn stop(&self) {
    if !self.stop.is_stopped() {
      debug!("停止帧流 {}", self.name);
    }
    self.stop.stop();
  }
}

impl Drop for FrameStream {
  fn drop(&mut self) {
    self.stop.stop();
  }
}

impl FrameFeed for FrameStream {
  fn next_frame(&self) -> Result<Frame, StreamError> {
    FrameStream::next_frame(self)
  }

  fn stop(&self) {
    FrameStream::stop(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::SourceImage;
  use image::RgbImage;

  const SEQ: &str = "seq";

  fn seq_of(frame: &Frame) -> u64 {
    frame.metadata().get(SEQ).and_then(|v| v.as_u64()).unwrap()
  }

  fn image(seq: u64) -> SourceImage {
    SourceImage::new(RgbImage::new(1, 1), Metadata::new().with(SEQ, seq))
  }

  /// 产出固定数量的帧后耗尽
  struct CountingSource {
    next: u64,
    limit: u64,
  }

  impl ImageSource for CountingSource {
    fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
      if self.next >= self.limit {
        return Ok(None);
      }
      self.next += 1;
      Ok(Some(image(self.next - 1)))
    }
  }

  /// 每次调用先报告调用序号，再等待测试放行
  struct GateSource {
    tokens: Receiver<()>,
    entered: Sender<u64>,
    calls: u64,
  }

  impl ImageSource for GateSource {
    fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
      let call = self.calls;
      self.calls += 1;
      let _ = self.entered.send(call);
      match self.tokens.recv() {
        Ok(()) => Ok(Some(image(call))),
        Err(_) => Ok(None),
      }
    }
  }

  fn gate() -> (GateSource, Sender<()>, Receiver<u64>) {
    let (token_tx, token_rx) = crossbeam_channel::unbounded();
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let source = GateSource {
      tokens: token_rx,
      entered: entered_tx,
      calls: 0,
    };
    (source, token_tx, entered_rx)
  }

  /// 放行 `count` 次调用，并等待生产者进入第 `until` 次调用（此前的帧均已入队）
  fn release(tokens: &Sender<()>, entered: &Receiver<u64>, count: usize, until: u64) {
    for _ in 0..count {
      tokens.send(()).unwrap();
    }
    while entered.recv_timeout(Duration::from_secs(5)).unwrap() != until {}
  }

  struct FailingSource(Option<InputError>);

  impl ImageSource for FailingSource {
    fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
      Err(self.0.take().unwrap_or(InputError::EmptyFileList))
    }
  }

  #[test]
  fn frames_arrive_in_order_without_exceeding_capacity() {
    let stream = FrameStream::builder()
      .queue_size(3)
      .start(CountingSource { next: 0, limit: 50 })
      .unwrap();

    for expected in 0..50 {
      assert!(stream.len() <= 3);
      let frame = stream.next_frame().unwrap();
      assert_eq!(seq_of(&frame), expected);
      assert_eq!(frame.index(), expected);
      std::thread::sleep(Duration::from_millis(1));
    }
    assert!(matches!(stream.next_frame(), Err(StreamError::Ended)));
    assert!(stream.is_stopped());
  }

  #[test]
  fn clear_mode_delivers_the_newest_frame() {
    let (source, tokens, entered) = gate();
    let stream = FrameStream::builder()
      .queue_size(8)
      .clear(true)
      .start(source)
      .unwrap();

    release(&tokens, &entered, 5, 5);
    assert_eq!(stream.len(), 1);
    assert_eq!(seq_of(&stream.next_frame().unwrap()), 4);

    release(&tokens, &entered, 2, 7);
    assert_eq!(seq_of(&stream.next_frame().unwrap()), 6);
  }

  #[test]
  fn normal_mode_keeps_every_queued_frame() {
    let (source, tokens, entered) = gate();
    let stream = FrameStream::builder().queue_size(8).start(source).unwrap();

    release(&tokens, &entered, 4, 4);
    assert_eq!(stream.len(), 4);
    let seqs: Vec<u64> = (0..4).map(|_| seq_of(&stream.next_frame().unwrap())).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
  }

  #[test]
  fn frames_produced_after_stop_are_never_delivered() {
    let (source, tokens, entered) = gate();
    let stream = FrameStream::builder().queue_size(8).start(source).unwrap();

    release(&tokens, &entered, 2, 2);
    stream.stop();
    // 停止时正在进行的调用完成后，其结果必须被丢弃
    tokens.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(seq_of(&stream.next_frame().unwrap()), 0);
    assert_eq!(seq_of(&stream.next_frame().unwrap()), 1);
    assert!(matches!(stream.next_frame(), Err(StreamError::Ended)));
  }

  #[test]
  fn stop_wakes_a_blocked_consumer() {
    let (source, _tokens, _entered) = gate();
    let stream = Arc::new(FrameStream::builder().start(source).unwrap());
    let consumer = {
      let stream = stream.clone();
      std::thread::spawn(move || stream.next_frame())
    };
    std::thread::sleep(Duration::from_millis(20));
    stream.stop();
    assert!(matches!(consumer.join().unwrap(), Err(StreamError::Ended)));
  }

  #[test]
  fn source_error_is_delivered_once() {
    let stream = FrameStream::builder()
      .start(FailingSource(Some(InputError::Device("unplugged".to_string()))))
      .unwrap();

    match stream.next_frame() {
      Err(StreamError::Source(InputError::Device(reason))) => assert_eq!(reason, "unplugged"),
      other => panic!("unexpected result: {:?}", other.map(|f| f.index())),
    }
    assert!(matches!(stream.next_frame(), Err(StreamError::Ended)));
  }

  #[test]
  fn configuration_error_is_fatal() {
    let stream = FrameStream::builder()
      .start(FailingSource(Some(InputError::EmptyFileList)))
      .unwrap();
    let err = stream.next_frame().unwrap_err();
    assert!(err.is_fatal());
  }

  #[test]
  fn timeout_returns_none_while_source_is_idle() {
    let (source, _tokens, _entered) = gate();
    let stream = FrameStream::builder().start(source).unwrap();
    assert!(matches!(
      stream.next_frame_timeout(Duration::from_millis(10)),
      Ok(None)
    ));
  }
}
