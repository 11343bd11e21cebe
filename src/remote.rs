// 该文件是 Liuguang （流光） 项目的一部分。
// src/remote.rs - 远程协作服务接口
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

use thiserror::Error;

#[cfg(feature = "http_remote")]
mod http;
#[cfg(feature = "http_remote")]
pub use self::http::{BingImageSearch, HttpImageFetcher, MAX_IMAGE_BYTES, VisionDescribe};

#[derive(Error, Debug)]
pub enum RemoteError {
  #[error("HTTP 状态错误 {code}: {url}")]
  Status { code: u16, url: String },
  #[error("传输错误: {0}")]
  Transport(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("响应超过大小限制 {limit} 字节")]
  TooLarge { limit: usize },
  #[error("缺少凭据: {0}")]
  MissingKey(&'static str),
}

/// 一页搜索结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
  pub thumbnails: Vec<String>,
  /// 下一页偏移量的增量，缺省时按 1 处理
  pub next_offset_increment: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
  pub text: String,
  pub confidence: f64,
}

pub trait SearchService: Send + Sync {
  fn search(&self, query: &str, page_size: u32, offset: u64) -> Result<SearchPage, RemoteError>;
}

pub trait DescribeService: Send + Sync {
  fn describe(&self, image_url: &str) -> Result<Option<Caption>, RemoteError>;
}

pub trait ImageFetcher: Send + Sync {
  fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

/// 远程图像源所需的全部协作服务
#[derive(Clone)]
pub struct RemoteServices {
  pub search: Arc<dyn SearchService>,
  /// 未配置描述服务凭据时为 `None`，此时完全不调用
  pub describe: Option<Arc<dyn DescribeService>>,
  pub fetcher: Arc<dyn ImageFetcher>,
}

#[cfg(feature = "http_remote")]
impl RemoteServices {
  pub fn from_config(config: &crate::config::RemoteConfig) -> Result<Self, RemoteError> {
    let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();

    let search_key = config
      .search_key
      .clone()
      .ok_or(RemoteError::MissingKey(crate::config::SEARCH_KEY_ENV))?;
    let search = BingImageSearch::new(agent.clone(), &config.search_endpoint, search_key)
      .with_market(&config.market, &config.safe_search);

    let describe = config.vision_key.clone().map(|key| {
      Arc::new(VisionDescribe::new(agent.clone(), &config.vision_endpoint, key))
        as Arc<dyn DescribeService>
    });

    Ok(Self {
      search: Arc::new(search),
      describe,
      fetcher: Arc::new(HttpImageFetcher::new(agent)),
    })
  }
}
