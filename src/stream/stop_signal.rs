// 该文件是 Liuguang （流光） 项目的一部分。
// src/stream/stop_signal.rs - 一次性停止信号
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

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;

/// 一次性、幂等的停止信号
///
/// 停止即丢弃唯一的发送端，所有等待在接收端上的线程都会立即被唤醒，
/// 因此既可以轮询，也可以参与 `select!`。
#[derive(Clone)]
pub struct StopSignal {
  sender: Arc<Mutex<Option<Sender<()>>>>,
  receiver: Receiver<()>,
}

impl Default for StopSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl StopSignal {
  pub fn new() -> Self {
    let (sender, receiver) = bounded(0);
    Self {
      sender: Arc::new(Mutex::new(Some(sender))),
      receiver,
    }
  }

  pub fn stop(&self) {
    self.sender.lock().take();
  }

  pub fn is_stopped(&self) -> bool {
    matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
  }

  /// 最多等待 `timeout`，期间收到停止信号则提前返回 `true`
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    matches!(
      self.receiver.recv_timeout(timeout),
      Err(RecvTimeoutError::Disconnected)
    )
  }

  pub(crate) fn receiver(&self) -> &Receiver<()> {
    &self.receiver
  }
}
