// 该文件是 Liuguang （流光） 项目的一部分。
// src/message/directory_store.rs - 基于目录的消息存储
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

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Message, MessageError, MessageStore, POLL_BATCH};
use crate::{FromUrl, FromUrlWithScheme};

const MESSAGE_EXTENSION: &str = "msg";

#[derive(Default)]
struct Receipts {
  polls: u64,
  tokens: HashMap<String, String>,
}

/// 每条消息一个 `.msg` 文件，按文件名顺序轮询
///
/// 其他进程只要把文件写入目录即可投递消息，例如
/// `folder:///var/spool/liuguang/control`。
pub struct DirectoryStore {
  directory: PathBuf,
  sequence: Mutex<u32>,
  receipts: Mutex<Receipts>,
}

impl FromUrlWithScheme for DirectoryStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryStore {
  type Error = MessageError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(MessageError::SchemeMismatch);
    }
    let path = urlencoding::decode(uri.path())
      .map_err(|e| MessageError::InvalidUrl(format!("{}: {}", uri, e)))?;
    Self::new(path.into_owned())
  }
}

impl DirectoryStore {
  pub fn new(directory: impl AsRef<Path>) -> Result<Self, MessageError> {
    let directory = directory.as_ref().to_path_buf();
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(Self {
      directory,
      sequence: Mutex::new(0),
      receipts: Mutex::new(Receipts::default()),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn message_name(&self) -> String {
    let id = {
      let mut sequence = self.sequence.lock();
      *sequence = sequence.wrapping_add(1);
      *sequence
    };
    format!(
      "{}-{:08X}.{}",
      Utc::now().format("%Y%m%d-%H%M%S%.3f"),
      id,
      MESSAGE_EXTENSION
    )
  }

  fn message_names(&self) -> Result<Vec<String>, MessageError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&self.directory)? {
      let path = entry?.path();
      if path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXTENSION) {
        continue;
      }
      if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        names.push(name.to_string());
      }
    }
    names.sort();
    names.truncate(POLL_BATCH);
    Ok(names)
  }
}

impl MessageStore for DirectoryStore {
  fn poll(&self) -> Result<Vec<Message>, MessageError> {
    let names = self.message_names()?;
    let mut receipts = self.receipts.lock();
    receipts.polls += 1;
    let token = receipts.polls.to_string();

    let mut messages = Vec::with_capacity(names.len());
    for name in names {
      // 非 UTF-8 内容照常交付，由读取方解码失败后删除
      let content = match std::fs::read(self.directory.join(&name)) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        // 读取之前已被其他读取方删除
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => {
          warn!("跳过无法读取的消息 {}: {}", name, e);
          continue;
        }
      };
      receipts.tokens.insert(name.clone(), token.clone());
      messages.push(Message {
        id: name,
        delete_token: token.clone(),
        content,
      });
    }
    debug!("目录 {} 轮询到 {} 条消息", self.directory.display(), messages.len());
    Ok(messages)
  }

  fn delete(&self, id: &str, delete_token: &str) -> Result<(), MessageError> {
    let mut receipts = self.receipts.lock();
    match receipts.tokens.get(id) {
      None => return Err(MessageError::UnknownMessage(id.to_string())),
      Some(token) if token != delete_token => {
        return Err(MessageError::StaleToken(id.to_string()));
      }
      Some(_) => {}
    }
    receipts.tokens.remove(id);
    match std::fs::remove_file(self.directory.join(id)) {
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Err(MessageError::UnknownMessage(id.to_string()))
      }
      other => Ok(other?),
    }
  }

  fn put(&self, content: &str) -> Result<(), MessageError> {
    let name = self.message_name();
    let target = self.directory.join(&name);
    // 先写临时文件再改名，轮询方不会读到写了一半的消息
    let partial = target.with_extension("partial");
    std::fs::write(&partial, content)?;
    std::fs::rename(&partial, &target)?;
    Ok(())
  }
}
