// 该文件是 Liuguang （流光） 项目的一部分。
// src/bin/simple_feed.rs - 简单的帧流推理程序
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

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use liuguang::{
  config::{RemoteConfig, SEARCH_KEY_ENV, VISION_KEY_ENV},
  input::{FileListSource, InputSelection},
  stream::{FrameFeed, FrameStream},
  task::{ContinuousTask, NullModel, Task},
};

/// Liuguang 帧流参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，可多次给出图片
  /// - 摄像头: v4l:///dev/video0
  /// - 图片: image:///path/a.png
  /// - 固定主题搜索: search:dog
  /// - 可切换主题: feed:dog
  #[arg(long, value_name = "SOURCE", required = true)]
  pub input: Vec<Url>,

  /// 控制消息目录，仅对 feed: 输入有效，例如 folder:///var/spool/liuguang/control
  #[arg(long, value_name = "QUEUE")]
  pub queue: Option<Url>,

  /// 结果回报目录，仅对 feed: 输入有效
  #[arg(long, value_name = "REPORT")]
  pub report: Option<Url>,

  #[arg(long, env = SEARCH_KEY_ENV, hide_env_values = true)]
  pub search_key: Option<String>,

  #[arg(long, env = VISION_KEY_ENV, hide_env_values = true)]
  pub vision_key: Option<String>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

impl Args {
  fn remote_config(&self) -> RemoteConfig {
    RemoteConfig::default()
      .with_search_key(self.search_key.clone())
      .with_vision_key(self.vision_key.clone())
  }
}

#[cfg(feature = "v4l2_input")]
fn open_device(path: &std::path::Path) -> Result<Arc<dyn FrameFeed>> {
  let source = liuguang::input::V4l2Source::new(path)?;
  let stream = FrameStream::builder()
    .name("camera")
    .clear(true)
    .start(source)?;
  Ok(Arc::new(stream))
}

#[cfg(not(feature = "v4l2_input"))]
fn open_device(path: &std::path::Path) -> Result<Arc<dyn FrameFeed>> {
  bail!("未启用 v4l2_input 特性，无法打开摄像头 {}", path.display())
}

#[cfg(feature = "http_remote")]
fn open_search(args: &Args, topic: &str) -> Result<Arc<dyn FrameFeed>> {
  use liuguang::{input::SearchImageSource, remote::RemoteServices};

  let services = RemoteServices::from_config(&args.remote_config())?;
  let stream = FrameStream::builder()
    .name(format!("search-{}", topic))
    .start(SearchImageSource::new(topic, services))?;
  Ok(Arc::new(stream))
}

#[cfg(feature = "http_remote")]
fn open_feed(args: &Args, topic: &str) -> Result<Arc<dyn FrameFeed>> {
  use liuguang::{
    FromUrl,
    config::FeedConfig,
    feed::{FeedController, SearchSourceFactory},
    message::{DirectoryStore, QueueReportSink},
    remote::RemoteServices,
  };

  let services = RemoteServices::from_config(&args.remote_config())?;
  let mut builder = FeedController::builder(SearchSourceFactory::new(services))
    .config(FeedConfig::default().with_start_topic(topic));
  if let Some(queue) = &args.queue {
    info!("控制消息目录: {}", queue);
    builder = builder.store(DirectoryStore::from_url(queue)?);
  }
  if let Some(report) = &args.report {
    info!("结果回报目录: {}", report);
    builder = builder.sink(QueueReportSink::new(DirectoryStore::from_url(report)?));
  }
  Ok(Arc::new(builder.start()?))
}

#[cfg(not(feature = "http_remote"))]
fn open_search(_args: &Args, topic: &str) -> Result<Arc<dyn FrameFeed>> {
  bail!("未启用 http_remote 特性，无法搜索主题 '{}'", topic)
}

#[cfg(not(feature = "http_remote"))]
fn open_feed(_args: &Args, topic: &str) -> Result<Arc<dyn FrameFeed>> {
  bail!("未启用 http_remote 特性，无法订阅主题 '{}'", topic)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  for input in &args.input {
    info!("输入来源: {}", input);
  }

  let selection = InputSelection::from_urls(&args.input)?;
  if !matches!(selection, InputSelection::Feed(_)) && (args.queue.is_some() || args.report.is_some())
  {
    bail!("--queue 与 --report 只能与 feed: 输入一起使用");
  }

  let feed: Arc<dyn FrameFeed> = match &selection {
    InputSelection::Device(path) => open_device(path)?,
    InputSelection::Files(paths) => Arc::new(
      FrameStream::builder()
        .name("images")
        .start(FileListSource::new(paths.clone())?)?,
    ),
    InputSelection::Search(topic) => open_search(&args, topic)?,
    InputSelection::Feed(topic) => open_feed(&args, topic)?,
  };

  {
    let feed = feed.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，正在停止...");
      feed.stop();
    })?;
  }

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(&*feed, NullModel)?;

  Ok(())
}
