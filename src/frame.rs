// 该文件是 Liuguang （流光） 项目的一部分。
// src/frame.rs - 帧与帧元数据定义
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

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde_json::{Map, Value};

const RGB_CHANNELS: usize = 3;

/// 控制消息携带的回报模板，原样附加在新主题的每一帧上
pub type Template = Map<String, Value>;

/// 元数据中约定的键名
pub mod keys {
  /// 图像来源 URL
  pub const URL: &str = "url";
  /// 本地图像文件路径
  pub const FILE: &str = "file";
  /// 采集设备路径
  pub const DEVICE: &str = "device";
  /// 回报模板
  pub const TEMPLATE: &str = "template";
  /// 图像描述服务给出的标题
  pub const VISION_LABEL: &str = "vision_label";
  /// 图像描述服务给出的置信度
  pub const VISION_CONFIDENCE: &str = "vision_confidence";
}

/// 帧元数据：字符串键，任意 JSON 值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
  entries: Map<String, Value>,
}

impl Metadata {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
    self.entries.insert(key.into(), value.into());
    self
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.entries.get(key)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.entries.contains_key(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn url(&self) -> Option<&str> {
    self.get(keys::URL).and_then(Value::as_str)
  }

  pub fn file(&self) -> Option<&str> {
    self.get(keys::FILE).and_then(Value::as_str)
  }

  pub fn template(&self) -> Option<&Template> {
    self.get(keys::TEMPLATE).and_then(Value::as_object)
  }

  pub fn vision_label(&self) -> Option<&str> {
    self.get(keys::VISION_LABEL).and_then(Value::as_str)
  }

  pub fn vision_confidence(&self) -> Option<f64> {
    self.get(keys::VISION_CONFIDENCE).and_then(Value::as_f64)
  }
}

/// 图像源单次产出的图像，尚未进入帧队列
#[derive(Debug, Clone)]
pub struct SourceImage {
  pub image: RgbImage,
  pub metadata: Metadata,
}

impl SourceImage {
  pub fn new(image: RgbImage, metadata: Metadata) -> Self {
    Self { image, metadata }
  }
}

/// 帧数据
///
/// 入队之后不可再修改，只提供只读访问。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  metadata: Metadata,
  /// 帧在所属帧流中的序号
  index: u64,
  captured_at: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, metadata: Metadata, index: u64) -> Self {
    Self {
      image,
      metadata,
      index,
      captured_at: Utc::now(),
    }
  }

  pub fn from_source(source: SourceImage, index: u64) -> Self {
    Self::new(source.image, source.metadata, index)
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn metadata(&self) -> &Metadata {
    &self.metadata
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn captured_at(&self) -> DateTime<Utc> {
    self.captured_at
  }

  pub fn width(&self) -> usize {
    self.image.width() as usize
  }

  pub fn height(&self) -> usize {
    self.image.height() as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }
}
