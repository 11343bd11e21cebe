// 该文件是 Liuguang （流光） 项目的一部分。
// src/feed.rs - 按主题热切换的帧流控制器
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

//! # 主题切换控制器
//!
//! 控制器任何时刻只持有一个活动帧流。后台控制线程定期轮询消息存储，
//! 收到新主题时停止旧帧流，为新主题启动新帧流并替换活动指针。
//!
//! 消费者总是从调用时的活动帧流取帧；等待期间活动帧流被替换的，
//! 从旧帧流取到的帧直接丢弃，切换点之后只会看到新主题的帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
  config::FeedConfig,
  frame::{Frame, Metadata, Template},
  input::{BoxedSource, InputError, SearchImageSource},
  message::{
    ControlMessage, LABEL_FIELD, MessageStore, RELATES_TO_FIELD, ReportSink, TOPIC_FIELD,
    URL_FIELD, is_present,
  },
  remote::RemoteServices,
  stream::{FrameFeed, FrameStream, StopSignal, StreamError},
  task::Prediction,
};

/// 为主题创建图像源
pub trait SourceFactory: Send + Sync {
  fn create(&self, topic: &str, template: Option<&Template>) -> Result<BoxedSource, InputError>;
}

impl<F> SourceFactory for F
where
  F: Fn(&str, Option<&Template>) -> Result<BoxedSource, InputError> + Send + Sync,
{
  fn create(&self, topic: &str, template: Option<&Template>) -> Result<BoxedSource, InputError> {
    self(topic, template)
  }
}

/// 为每个主题创建远程搜索图像源
pub struct SearchSourceFactory {
  services: RemoteServices,
}

impl SearchSourceFactory {
  pub fn new(services: RemoteServices) -> Self {
    Self { services }
  }
}

impl SourceFactory for SearchSourceFactory {
  fn create(&self, topic: &str, template: Option<&Template>) -> Result<BoxedSource, InputError> {
    Ok(Box::new(
      SearchImageSource::new(topic, self.services.clone()).with_template(template.cloned()),
    ))
  }
}

struct Active {
  stream: Arc<FrameStream>,
  generation: u64,
  topic: String,
}

struct Shared {
  config: FeedConfig,
  factory: Box<dyn SourceFactory>,
  store: Option<Box<dyn MessageStore>>,
  sink: Option<Box<dyn ReportSink>>,
  active: Mutex<Active>,
  swapped: Condvar,
  stop: StopSignal,
  sent: AtomicUsize,
}

impl Shared {
  fn start_stream(
    &self,
    topic: &str,
    template: Option<&Template>,
    queue_size: usize,
  ) -> Result<FrameStream, StreamError> {
    let source = self.factory.create(topic, template)?;
    FrameStream::builder()
      .name(format!("feed-{}", topic))
      .queue_size(queue_size)
      .start(source)
  }

  fn switch_topic(&self, topic: &str, template: Option<Template>) -> Result<(), StreamError> {
    let stream = self.start_stream(topic, template.as_ref(), self.config.swap_queue_size)?;

    let mut active = self.active.lock();
    if self.stop.is_stopped() {
      stream.stop();
      return Ok(());
    }
    active.stream.stop();
    info!("切换主题: '{}' -> '{}'", active.topic, topic);
    active.stream = Arc::new(stream);
    active.generation += 1;
    active.topic = topic.to_string();
    self.sent.store(0, Ordering::SeqCst);
    self.swapped.notify_all();
    Ok(())
  }

  /// 删除本轮读到的全部消息，只返回最后一条的内容
  fn poll_last(&self, store: &dyn MessageStore) -> Option<String> {
    let messages = match store.poll() {
      Ok(messages) => messages,
      Err(e) => {
        warn!("轮询控制消息失败: {}", e);
        return None;
      }
    };

    let mut last = None;
    for message in messages {
      if let Err(e) = store.delete(&message.id, &message.delete_token) {
        warn!("删除控制消息 {} 失败: {}", message.id, e);
      }
      last = Some(message.content);
    }
    last.filter(|content| !content.is_empty())
  }

  fn handle_message(&self, content: &str) {
    let message = match ControlMessage::decode(content, &self.config.fallback_topic) {
      Ok(message) => message,
      Err(e) => {
        warn!("无法解析控制消息: {}", e);
        return;
      }
    };
    let Some(topic) = message.topic else {
      debug!("控制消息没有有效主题，忽略");
      return;
    };
    if let Err(e) = self.switch_topic(&topic, Some(message.template)) {
      error!("无法为主题 '{}' 启动帧流: {}", topic, e);
    }
  }

  fn control_loop(&self, store: &dyn MessageStore) {
    info!("控制线程已启动，轮询间隔 {:?}", self.config.poll_interval);
    loop {
      if self.stop.is_stopped() {
        break;
      }
      if let Some(content) = self.poll_last(store) {
        self.handle_message(&content);
      }
      if self.stop.wait_timeout(self.config.poll_interval) {
        break;
      }
    }
    info!("控制线程退出");
  }

  fn stop(&self) {
    self.stop.stop();
    let active = self.active.lock();
    active.stream.stop();
    self.swapped.notify_all();
  }
}

pub struct FeedControllerBuilder {
  config: FeedConfig,
  factory: Box<dyn SourceFactory>,
  store: Option<Box<dyn MessageStore>>,
  sink: Option<Box<dyn ReportSink>>,
}

impl FeedControllerBuilder {
  pub fn config(mut self, config: FeedConfig) -> Self {
    self.config = config;
    self
  }

  /// 控制消息来源，未配置时不启动控制线程
  pub fn store(mut self, store: impl MessageStore + 'static) -> Self {
    self.store = Some(Box::new(store));
    self
  }

  pub fn sink(mut self, sink: impl ReportSink + 'static) -> Self {
    self.sink = Some(Box::new(sink));
    self
  }

  /// 为起始主题启动第一个帧流，然后启动控制线程
  pub fn start(self) -> Result<FeedController, StreamError> {
    let topic = self.config.start_topic.clone();
    let source = self.factory.create(&topic, None)?;
    let stream = FrameStream::builder()
      .name(format!("feed-{}", topic))
      .queue_size(self.config.queue_size)
      .start(source)?;

    let shared = Arc::new(Shared {
      config: self.config,
      factory: self.factory,
      store: self.store,
      sink: self.sink,
      active: Mutex::new(Active {
        stream: Arc::new(stream),
        generation: 0,
        topic,
      }),
      swapped: Condvar::new(),
      stop: StopSignal::new(),
      sent: AtomicUsize::new(0),
    });

    let control = if shared.store.is_some() {
      let worker = shared.clone();
      let handle = std::thread::Builder::new()
        .name("feed-control".to_string())
        .spawn(move || {
          if let Some(store) = worker.store.as_deref() {
            worker.control_loop(store);
          }
        });
      match handle {
        Ok(handle) => Some(handle),
        Err(e) => {
          shared.stop();
          return Err(e.into());
        }
      }
    } else {
      info!("未配置控制消息存储，主题保持不变");
      None
    };

    Ok(FeedController {
      shared,
      control: Mutex::new(control),
    })
  }
}

/// 按主题热切换的帧流
pub struct FeedController {
  shared: Arc<Shared>,
  control: Mutex<Option<JoinHandle<()>>>,
}

impl FeedController {
  pub fn builder(factory: impl SourceFactory + 'static) -> FeedControllerBuilder {
    FeedControllerBuilder {
      config: FeedConfig::default(),
      factory: Box::new(factory),
      store: None,
      sink: None,
    }
  }

  pub fn topic(&self) -> String {
    self.shared.active.lock().topic.clone()
  }

  /// 每次切换加一
  pub fn generation(&self) -> u64 {
    self.shared.active.lock().generation
  }

  pub fn active_stream(&self) -> Arc<FrameStream> {
    self.shared.active.lock().stream.clone()
  }

  /// 当前主题已回报的结果数
  pub fn reports_sent(&self) -> usize {
    self.shared.sent.load(Ordering::SeqCst)
  }

  pub fn is_stopped(&self) -> bool {
    self.shared.stop.is_stopped()
  }

  /// 不经过消息存储直接切换主题，即使与当前主题相同也会重新开始
  pub fn switch_topic(
    &self,
    topic: &str,
    template: Option<Template>,
  ) -> Result<(), StreamError> {
    self.shared.switch_topic(topic, template)
  }

  pub fn next_frame(&self) -> Result<Frame, StreamError> {
    loop {
      let (stream, generation) = {
        let active = self.shared.active.lock();
        (active.stream.clone(), active.generation)
      };

      match stream.next_frame() {
        Ok(frame) => {
          if self.shared.active.lock().generation == generation {
            return Ok(frame);
          }
          debug!("丢弃已被替换的帧流 {} 中的帧", stream.name());
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
          if self.shared.stop.is_stopped() {
            return Err(StreamError::Ended);
          }
          // 没有控制线程就不会再有新主题
          if self.shared.store.is_none() {
            return Err(e);
          }
          if let StreamError::Source(source) = &e {
            warn!("帧流 {} 出错，等待下一个主题: {}", stream.name(), source);
          }

          let mut active = self.shared.active.lock();
          while active.generation == generation && !self.shared.stop.is_stopped() {
            self.shared.swapped.wait(&mut active);
          }
        }
      }
    }
  }

  /// 停止活动帧流与控制线程，幂等
  pub fn stop(&self) {
    if !self.shared.stop.is_stopped() {
      info!("停止主题切换控制器");
    }
    self.shared.stop();
  }

  pub fn send_result(&self, metadata: &Metadata, predictions: &[Prediction]) {
    let Some(sink) = self.shared.sink.as_deref() else {
      return;
    };
    let Some(template) = metadata.template() else {
      return;
    };
    if !template.get(RELATES_TO_FIELD).map(is_present).unwrap_or(false) {
      return;
    }

    let limit = self.shared.config.report_limit;
    let counted = self
      .shared
      .sent
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |sent| {
        (sent < limit).then_some(sent + 1)
      });
    if counted.is_err() {
      debug!("当前主题已回报 {} 次，不再回报", limit);
      return;
    }

    let mut report = template.clone();
    report.insert(URL_FIELD.to_string(), metadata.url().unwrap_or("").into());
    report.insert(
      TOPIC_FIELD.to_string(),
      predictions
        .first()
        .map(|p| Value::from(p.label.as_str()))
        .unwrap_or(Value::Null),
    );
    report.insert(
      LABEL_FIELD.to_string(),
      metadata.vision_label().unwrap_or("").into(),
    );

    if let Err(e) = sink.send_report(&Value::Object(report)) {
      warn!("回报结果失败: {}", e);
    }
  }
}

impl FrameFeed for FeedController {
  fn next_frame(&self) -> Result<Frame, StreamError> {
    FeedController::next_frame(self)
  }

  fn stop(&self) {
    FeedController::stop(self)
  }

  fn send_result(&self, metadata: &Metadata, predictions: &[Prediction]) {
    FeedController::send_result(self, metadata, predictions)
  }
}

impl Drop for FeedController {
  fn drop(&mut self) {
    self.shared.stop();
    if let Some(handle) = self.control.lock().take() {
      let _ = handle.join();
    }
  }
}
