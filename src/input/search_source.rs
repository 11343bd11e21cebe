// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/search_source.rs - 远程分页图像搜索输入
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

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
  frame::{Metadata, SourceImage, Template, keys},
  input::{ImageSource, InputError},
  remote::RemoteServices,
};

/// 每页请求的结果数
pub const PAGE_SIZE: u32 = 10;
/// 每个实例最多为前若干帧调用描述服务
pub const DESCRIBE_LIMIT: u64 = 10;

/// 远程分页图像源
///
/// 待下载队列为空时请求下一页搜索结果，逐个下载缩略图并解码。
/// 队列为空且新的一页没有结果时返回 `Ok(None)`，表示没有更多结果；
/// 请求失败则作为错误返回，由调用方决定是否放弃该图像源。
pub struct SearchImageSource {
  topic: String,
  template: Option<Template>,
  services: RemoteServices,
  pending: VecDeque<String>,
  offset: u64,
  fetched: u64,
  page_size: u32,
}

impl SearchImageSource {
  pub fn new(topic: impl Into<String>, services: RemoteServices) -> Self {
    Self {
      topic: topic.into(),
      template: None,
      services,
      pending: VecDeque::new(),
      offset: 0,
      fetched: 0,
      page_size: PAGE_SIZE,
    }
  }

  /// 附加在每一帧上的回报模板
  pub fn with_template(mut self, template: Option<Template>) -> Self {
    self.template = template;
    self
  }

  pub fn topic(&self) -> &str {
    &self.topic
  }

  pub fn offset(&self) -> u64 {
    self.offset
  }

  fn fetch_page(&mut self) -> Result<(), InputError> {
    let page = self
      .services
      .search
      .search(&self.topic, self.page_size, self.offset)?;
    self.offset += page.next_offset_increment.unwrap_or(1);
    debug!(
      "主题 '{}' 获取 {} 条结果，下一偏移量 {}",
      self.topic,
      page.thumbnails.len(),
      self.offset
    );
    self.pending.extend(page.thumbnails);
    Ok(())
  }

  fn describe(&self, url: &str, metadata: &mut Metadata) {
    let Some(describe) = self.services.describe.as_ref() else {
      return;
    };
    match describe.describe(url) {
      Ok(Some(caption)) => {
        metadata
          .insert(keys::VISION_LABEL, caption.text)
          .insert(keys::VISION_CONFIDENCE, caption.confidence);
      }
      Ok(None) => debug!("描述服务没有给出标题: {}", url),
      Err(e) => warn!("描述服务调用失败 {}: {}", url, e),
    }
  }
}

impl ImageSource for SearchImageSource {
  fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
    if self.pending.is_empty() {
      self.fetch_page()?;
    }

    let Some(url) = self.pending.pop_front() else {
      info!("主题 '{}' 没有更多结果", self.topic);
      return Ok(None);
    };

    let bytes = self.services.fetcher.fetch(&url)?;
    let image = image::load_from_memory(&bytes)?.to_rgb8();

    let mut metadata = Metadata::new().with(keys::URL, url.as_str());
    if let Some(template) = &self.template {
      metadata.insert(keys::TEMPLATE, Value::Object(template.clone()));
    }

    self.fetched += 1;
    if self.fetched <= DESCRIBE_LIMIT {
      self.describe(&url, &mut metadata);
    }

    Ok(Some(SourceImage::new(image, metadata)))
  }
}
