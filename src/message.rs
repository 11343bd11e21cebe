// 该文件是 Liuguang （流光） 项目的一部分。
// src/message.rs - 控制消息与结果回报
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

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;
use thiserror::Error;

use crate::frame::Template;

mod directory_store;
mod memory_store;

pub use self::directory_store::DirectoryStore;
pub use self::memory_store::MemoryStore;

/// 控制消息中的主题字段，回报时也复用该字段放置最佳标签
pub const TOPIC_FIELD: &str = "Text";
pub const RELATES_TO_FIELD: &str = "RelatesTo";
pub const URL_FIELD: &str = "Url";
pub const LABEL_FIELD: &str = "Label";

/// 一次轮询最多取回的消息数
pub const POLL_BATCH: usize = 32;

#[derive(Error, Debug)]
pub enum MessageError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的消息目录 URL: {0}")]
  InvalidUrl(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("base64 解码错误: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("消息内容不是 JSON 对象")]
  NotAnObject,
  #[error("未知消息: {0}")]
  UnknownMessage(String),
  #[error("删除凭据已失效: {0}")]
  StaleToken(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
  pub id: String,
  /// 由最近一次轮询签发，删除时必须原样带回
  pub delete_token: String,
  pub content: String,
}

/// 消息存储
///
/// 轮询不会移除消息，读取方需要用轮询时拿到的凭据显式删除。
pub trait MessageStore: Send + Sync {
  fn poll(&self) -> Result<Vec<Message>, MessageError>;
  fn delete(&self, id: &str, delete_token: &str) -> Result<(), MessageError>;
  fn put(&self, content: &str) -> Result<(), MessageError>;
}

impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
  fn poll(&self) -> Result<Vec<Message>, MessageError> {
    (**self).poll()
  }

  fn delete(&self, id: &str, delete_token: &str) -> Result<(), MessageError> {
    (**self).delete(id, delete_token)
  }

  fn put(&self, content: &str) -> Result<(), MessageError> {
    (**self).put(content)
  }
}

impl<T: MessageStore + ?Sized> MessageStore for Box<T> {
  fn poll(&self) -> Result<Vec<Message>, MessageError> {
    (**self).poll()
  }

  fn delete(&self, id: &str, delete_token: &str) -> Result<(), MessageError> {
    (**self).delete(id, delete_token)
  }

  fn put(&self, content: &str) -> Result<(), MessageError> {
    (**self).put(content)
  }
}

/// JSON 序列化后再做 base64 编码
pub fn encode(value: &Value) -> Result<String, MessageError> {
  Ok(STANDARD.encode(serde_json::to_vec(value)?))
}

/// base64 解码后解析为 JSON 对象
pub fn decode(content: &str) -> Result<Template, MessageError> {
  let bytes = STANDARD.decode(content.trim())?;
  match serde_json::from_slice(&bytes)? {
    Value::Object(object) => Ok(object),
    _ => Err(MessageError::NotAnObject),
  }
}

/// 解码后的控制消息
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
  /// `None` 表示该消息不应触发切换
  pub topic: Option<String>,
  /// 整个消息对象，作为新主题每一帧的回报模板
  pub template: Template,
}

impl ControlMessage {
  /// 缺少主题字段时使用 `fallback`；主题为空字符串或不是字符串时忽略
  pub fn decode(content: &str, fallback: &str) -> Result<Self, MessageError> {
    let template = decode(content)?;
    let topic = match template.get(TOPIC_FIELD) {
      None => Some(fallback.to_string()),
      Some(Value::String(topic)) if !topic.is_empty() => Some(topic.clone()),
      Some(_) => None,
    };
    Ok(Self { topic, template })
  }
}

/// 值是否“非空”：null、false、0、空字符串、空数组和空对象都视为空
pub fn is_present(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(true),
    Value::String(s) => !s.is_empty(),
    Value::Array(a) => !a.is_empty(),
    Value::Object(o) => !o.is_empty(),
  }
}

/// 结果回报出口
pub trait ReportSink: Send + Sync {
  fn send_report(&self, report: &Value) -> Result<(), MessageError>;
}

impl<T: ReportSink + ?Sized> ReportSink for Arc<T> {
  fn send_report(&self, report: &Value) -> Result<(), MessageError> {
    (**self).send_report(report)
  }
}

/// 把回报编码后投递到另一个消息存储
pub struct QueueReportSink<M> {
  store: M,
}

impl<M: MessageStore> QueueReportSink<M> {
  pub fn new(store: M) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &M {
    &self.store
  }
}

impl<M: MessageStore> ReportSink for QueueReportSink<M> {
  fn send_report(&self, report: &Value) -> Result<(), MessageError> {
    self.store.put(&encode(report)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn encoded(value: Value) -> String {
    encode(&value).unwrap()
  }

  #[test]
  fn topic_is_read_from_text_field() {
    let message = ControlMessage::decode(&encoded(json!({"Text": "cat", "RelatesTo": "r1"})), "dog")
      .unwrap();
    assert_eq!(message.topic.as_deref(), Some("cat"));
    assert_eq!(message.template.get("RelatesTo"), Some(&json!("r1")));
  }

  #[test]
  fn missing_topic_falls_back() {
    let message = ControlMessage::decode(&encoded(json!({"RelatesTo": "r1"})), "dog").unwrap();
    assert_eq!(message.topic.as_deref(), Some("dog"));
  }

  #[test]
  fn empty_or_null_topic_is_ignored() {
    for value in [json!({"Text": ""}), json!({"Text": null}), json!({"Text": 3})] {
      let message = ControlMessage::decode(&encoded(value), "dog").unwrap();
      assert_eq!(message.topic, None);
    }
  }

  #[test]
  fn malformed_content_is_rejected() {
    assert!(matches!(decode("***"), Err(MessageError::Base64(_))));
    assert!(matches!(
      decode(&STANDARD.encode("not json")),
      Err(MessageError::Json(_))
    ));
    assert!(matches!(
      decode(&STANDARD.encode("[1, 2]")),
      Err(MessageError::NotAnObject)
    ));
  }

  #[test]
  fn presence_follows_truthiness() {
    assert!(!is_present(&json!(null)));
    assert!(!is_present(&json!("")));
    assert!(!is_present(&json!({})));
    assert!(is_present(&json!("conversation")));
    assert!(is_present(&json!({"id": 1})));
  }

  #[test]
  fn queue_sink_puts_encoded_report() {
    let sink = QueueReportSink::new(MemoryStore::new());
    sink.send_report(&json!({"Text": "dog"})).unwrap();
    let messages = sink.store().poll().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(decode(&messages[0].content).unwrap().get("Text"), Some(&json!("dog")));
  }
}
