// 该文件是 Liuguang （流光） 项目的一部分。
// src/config.rs - 运行配置
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

use std::time::Duration;

pub const SEARCH_KEY_ENV: &str = "BING_IMAGE_SEARCH_KEY";
pub const VISION_KEY_ENV: &str = "CV_API_KEY";

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.cognitive.microsoft.com/bing/v5.0/images/search";
pub const DEFAULT_VISION_ENDPOINT: &str =
  "https://westeurope.api.cognitive.microsoft.com/vision/v1.0/describe";

/// 帧队列默认容量
pub const DEFAULT_QUEUE_SIZE: usize = 128;
/// 切换主题后新帧流的队列容量，偏向新鲜度而非深度
pub const SWAP_QUEUE_SIZE: usize = 16;
/// 每个主题生命周期内最多回报的结果数
pub const REPORT_LIMIT: usize = 10;
pub const FALLBACK_TOPIC: &str = "dog";

/// 远程协作服务配置
///
/// 凭据显式传入，而不是在各个图像源里读取环境变量。
#[derive(Debug, Clone)]
pub struct RemoteConfig {
  pub search_key: Option<String>,
  pub vision_key: Option<String>,
  pub search_endpoint: String,
  pub vision_endpoint: String,
  pub market: String,
  pub safe_search: String,
  pub timeout: Duration,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      search_key: None,
      vision_key: None,
      search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
      vision_endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
      market: "en-us".to_string(),
      safe_search: "Strict".to_string(),
      timeout: Duration::from_secs(10),
    }
  }
}

impl RemoteConfig {
  pub fn with_search_key(mut self, key: Option<String>) -> Self {
    self.search_key = key.filter(|k| !k.is_empty());
    self
  }

  pub fn with_vision_key(mut self, key: Option<String>) -> Self {
    self.vision_key = key.filter(|k| !k.is_empty());
    self
  }
}

/// 主题切换控制器配置
#[derive(Debug, Clone)]
pub struct FeedConfig {
  /// 启动时的主题
  pub start_topic: String,
  /// 控制消息缺少主题字段时使用的主题
  pub fallback_topic: String,
  /// 消息轮询间隔
  pub poll_interval: Duration,
  pub queue_size: usize,
  pub swap_queue_size: usize,
  pub report_limit: usize,
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      start_topic: FALLBACK_TOPIC.to_string(),
      fallback_topic: FALLBACK_TOPIC.to_string(),
      poll_interval: Duration::from_secs(2),
      queue_size: DEFAULT_QUEUE_SIZE,
      swap_queue_size: SWAP_QUEUE_SIZE,
      report_limit: REPORT_LIMIT,
    }
  }
}

impl FeedConfig {
  pub fn with_start_topic(mut self, topic: impl Into<String>) -> Self {
    self.start_topic = topic.into();
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_keys_count_as_missing() {
    let config = RemoteConfig::default()
      .with_search_key(Some(String::new()))
      .with_vision_key(Some("secret".to_string()));
    assert_eq!(config.search_key, None);
    assert_eq!(config.vision_key.as_deref(), Some("secret"));
  }

  #[test]
  fn feed_defaults_follow_swap_policy() {
    let config = FeedConfig::default();
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.swap_queue_size, 16);
    assert_eq!(config.queue_size, 128);
    assert_eq!(config.report_limit, 10);
    assert_eq!(config.fallback_topic, "dog");
  }
}
