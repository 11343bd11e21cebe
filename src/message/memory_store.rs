// 该文件是 Liuguang （流光） 项目的一部分。
// src/message/memory_store.rs - 进程内消息存储
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

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{Message, MessageError, MessageStore, POLL_BATCH};

struct Entry {
  id: u64,
  content: String,
  token: Option<String>,
}

#[derive(Default)]
struct Inner {
  entries: VecDeque<Entry>,
  next_id: u64,
  polls: u64,
}

/// 进程内消息存储，先进先出
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().entries.is_empty()
  }

  /// 不签发删除凭据地查看全部消息内容
  pub fn contents(&self) -> Vec<String> {
    self
      .inner
      .lock()
      .entries
      .iter()
      .map(|entry| entry.content.clone())
      .collect()
  }
}

impl MessageStore for MemoryStore {
  fn poll(&self) -> Result<Vec<Message>, MessageError> {
    let mut inner = self.inner.lock();
    inner.polls += 1;
    let token = inner.polls.to_string();
    Ok(
      inner
        .entries
        .iter_mut()
        .take(POLL_BATCH)
        .map(|entry| {
          entry.token = Some(token.clone());
          Message {
            id: entry.id.to_string(),
            delete_token: token.clone(),
            content: entry.content.clone(),
          }
        })
        .collect(),
    )
  }

  fn delete(&self, id: &str, delete_token: &str) -> Result<(), MessageError> {
    let mut inner = self.inner.lock();
    let position = inner
      .entries
      .iter()
      .position(|entry| entry.id.to_string() == id)
      .ok_or_else(|| MessageError::UnknownMessage(id.to_string()))?;
    if inner.entries[position].token.as_deref() != Some(delete_token) {
      return Err(MessageError::StaleToken(id.to_string()));
    }
    inner.entries.remove(position);
    Ok(())
  }

  fn put(&self, content: &str) -> Result<(), MessageError> {
    let mut inner = self.inner.lock();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.entries.push_back(Entry {
      id,
      content: content.to_string(),
      token: None,
    });
    Ok(())
  }
}
