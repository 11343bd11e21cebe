// 该文件是 Liuguang （流光） 项目的一部分。
// src/remote/http.rs - 基于 HTTP 的远程协作服务
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

use std::io::Read;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{Caption, DescribeService, ImageFetcher, RemoteError, SearchPage, SearchService};

/// 单张图片下载的大小上限
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

fn from_ureq(err: ureq::Error) -> RemoteError {
  match err {
    ureq::Error::Status(code, response) => RemoteError::Status {
      code,
      url: response.get_url().to_string(),
    },
    ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
  }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BingImagesResponse {
  #[serde(default)]
  value: Vec<BingImage>,
  next_offset_add_count: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingImage {
  thumbnail_url: Option<String>,
}

fn parse_search_page<R: Read>(reader: R) -> Result<SearchPage, RemoteError> {
  let response: BingImagesResponse = serde_json::from_reader(reader)?;
  Ok(SearchPage {
    thumbnails: response
      .value
      .into_iter()
      .filter_map(|image| image.thumbnail_url)
      .collect(),
    next_offset_increment: response.next_offset_add_count,
  })
}

/// Bing 图像搜索
pub struct BingImageSearch {
  agent: ureq::Agent,
  endpoint: String,
  key: String,
  market: String,
  safe_search: String,
}

impl BingImageSearch {
  pub fn new(agent: ureq::Agent, endpoint: &str, key: String) -> Self {
    Self {
      agent,
      endpoint: endpoint.to_string(),
      key,
      market: "en-us".to_string(),
      safe_search: "Strict".to_string(),
    }
  }

  pub fn with_market(mut self, market: &str, safe_search: &str) -> Self {
    self.market = market.to_string();
    self.safe_search = safe_search.to_string();
    self
  }
}

impl SearchService for BingImageSearch {
  fn search(&self, query: &str, page_size: u32, offset: u64) -> Result<SearchPage, RemoteError> {
    debug!("图像搜索: q={} count={} offset={}", query, page_size, offset);
    let response = self
      .agent
      .get(&self.endpoint)
      .query("q", query)
      .query("count", &page_size.to_string())
      .query("offset", &offset.to_string())
      .query("mkt", &self.market)
      .query("safeSearch", &self.safe_search)
      .set(KEY_HEADER, &self.key)
      .call()
      .map_err(from_ureq)?;
    parse_search_page(response.into_reader())
  }
}

#[derive(Deserialize, Default)]
struct DescribeResponse {
  #[serde(default)]
  description: DescribeBody,
}

#[derive(Deserialize, Default)]
struct DescribeBody {
  #[serde(default)]
  captions: Vec<CaptionBody>,
}

#[derive(Deserialize)]
struct CaptionBody {
  #[serde(default)]
  text: String,
  #[serde(default)]
  confidence: f64,
}

fn parse_caption<R: Read>(reader: R) -> Result<Option<Caption>, RemoteError> {
  let response: DescribeResponse = serde_json::from_reader(reader)?;
  Ok(
    response
      .description
      .captions
      .into_iter()
      .next()
      .map(|caption| Caption {
        text: caption.text,
        confidence: caption.confidence,
      }),
  )
}

/// 计算机视觉图像描述服务
pub struct VisionDescribe {
  agent: ureq::Agent,
  endpoint: String,
  key: String,
}

impl VisionDescribe {
  pub fn new(agent: ureq::Agent, endpoint: &str, key: String) -> Self {
    Self {
      agent,
      endpoint: endpoint.to_string(),
      key,
    }
  }
}

impl DescribeService for VisionDescribe {
  fn describe(&self, image_url: &str) -> Result<Option<Caption>, RemoteError> {
    let response = self
      .agent
      .post(&self.endpoint)
      .query("maxCandidates", "1")
      .set(KEY_HEADER, &self.key)
      .send_json(json!({ "url": image_url }))
      .map_err(from_ureq)?;
    parse_caption(response.into_reader())
  }
}

/// 通过 HTTP GET 下载图片字节
pub struct HttpImageFetcher {
  agent: ureq::Agent,
  limit: usize,
}

impl HttpImageFetcher {
  pub fn new(agent: ureq::Agent) -> Self {
    Self {
      agent,
      limit: MAX_IMAGE_BYTES,
    }
  }
}

fn read_limited<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, RemoteError> {
  let mut bytes = Vec::new();
  reader.take(limit as u64 + 1).read_to_end(&mut bytes)?;
  if bytes.len() > limit {
    return Err(RemoteError::TooLarge { limit });
  }
  Ok(bytes)
}

impl ImageFetcher for HttpImageFetcher {
  fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
    let response = self.agent.get(url).call().map_err(from_ureq)?;
    read_limited(response.into_reader(), self.limit).inspect_err(|e| warn!("下载 {} 失败: {}", url, e))
  }
}
