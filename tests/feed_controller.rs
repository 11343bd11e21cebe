// 该文件是 Liuguang （流光） 项目的一部分。
// tests/feed_controller.rs - 主题切换控制器集成测试
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
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;
use serde_json::json;

use liuguang::{
  config::FeedConfig,
  feed::{FeedController, SearchSourceFactory},
  message::{DirectoryStore, MessageStore, QueueReportSink, decode, encode},
  remote::{
    Caption, DescribeService, ImageFetcher, RemoteError, RemoteServices, SearchPage, SearchService,
  },
  stream::FrameFeed,
  task::{ContinuousTask, Model, Prediction, Task},
};

/// 每个主题返回无穷多页，缩略图地址带上主题名
#[derive(Default)]
struct TopicSearch {
  queries: Mutex<VecDeque<String>>,
}

impl SearchService for TopicSearch {
  fn search(&self, query: &str, page_size: u32, offset: u64) -> Result<SearchPage, RemoteError> {
    self.queries.lock().push_back(query.to_string());
    Ok(SearchPage {
      thumbnails: (0..page_size as u64)
        .map(|i| format!("http://thumbs/{}/{}.png", query, offset + i))
        .collect(),
      next_offset_increment: Some(page_size as u64),
    })
  }
}

struct PngFetcher;

impl ImageFetcher for PngFetcher {
  fn fetch(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
    std::thread::sleep(Duration::from_millis(1));
    let mut bytes = Vec::new();
    RgbImage::new(4, 4)
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .map_err(|e| RemoteError::Transport(e.to_string()))?;
    Ok(bytes)
  }
}

struct EchoDescribe;

impl DescribeService for EchoDescribe {
  fn describe(&self, image_url: &str) -> Result<Option<Caption>, RemoteError> {
    Ok(Some(Caption {
      text: format!("a picture at {}", image_url),
      confidence: 0.75,
    }))
  }
}

fn services(search: Arc<TopicSearch>) -> RemoteServices {
  RemoteServices {
    search,
    describe: Some(Arc::new(EchoDescribe)),
    fetcher: Arc::new(PngFetcher),
  }
}

fn wait_until(mut done: impl FnMut() -> bool) {
  for _ in 0..1000 {
    if done() {
      return;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
  panic!("condition not reached in time");
}

/// 把缩略图地址中的主题当作预测标签
struct UrlModel;

impl Model for UrlModel {
  type Error = std::convert::Infallible;

  fn infer(&self, frame: &liuguang::frame::Frame) -> Result<Vec<Prediction>, Self::Error> {
    let topic = frame
      .metadata()
      .url()
      .and_then(|url| url.split('/').nth(3))
      .unwrap_or_default();
    Ok(vec![
      Prediction::new("background", 0.1),
      Prediction::new(topic, 0.9),
    ])
  }
}

#[test]
fn control_message_switches_topic_and_reports_back() {
  let control_dir = tempfile::tempdir().unwrap();
  let report_dir = tempfile::tempdir().unwrap();
  let control = Arc::new(DirectoryStore::new(control_dir.path()).unwrap());
  let reports = Arc::new(DirectoryStore::new(report_dir.path()).unwrap());
  let search = Arc::new(TopicSearch::default());

  let feed = FeedController::builder(SearchSourceFactory::new(services(search.clone())))
    .config(FeedConfig::default().with_poll_interval(Duration::from_millis(10)))
    .store(control.clone())
    .sink(QueueReportSink::new(reports.clone()))
    .start()
    .unwrap();

  let frame = feed.next_frame().unwrap();
  assert!(frame.metadata().url().unwrap().starts_with("http://thumbs/dog/"));
  // 起始主题没有回报模板
  feed.send_result(frame.metadata(), &[Prediction::new("dog", 1.0)]);
  assert!(reports.poll().unwrap().is_empty());

  let dog = feed.active_stream();
  control
    .put(&encode(&json!({"Text": "cat", "RelatesTo": {"conversation": "42"}})).unwrap())
    .unwrap();
  wait_until(|| feed.generation() == 1);
  assert!(dog.is_stopped());
  assert_eq!(feed.topic(), "cat");
  assert!(control.poll().unwrap().is_empty());

  let processed = ContinuousTask::default()
    .with_frame_number(Some(12))
    .run_task(&feed, UrlModel)
    .unwrap();
  assert_eq!(processed, 12);
  assert_eq!(feed.reports_sent(), 10);

  let messages = reports.poll().unwrap();
  assert_eq!(messages.len(), 10);
  for message in messages {
    let report = decode(&message.content).unwrap();
    assert_eq!(report.get("Text"), Some(&json!("cat")));
    assert_eq!(report.get("RelatesTo"), Some(&json!({"conversation": "42"})));
    let url = report.get("Url").and_then(|v| v.as_str()).unwrap();
    assert!(url.starts_with("http://thumbs/cat/"));
    let label = report.get("Label").and_then(|v| v.as_str()).unwrap();
    assert_eq!(label, format!("a picture at {}", url));
  }
}

#[test]
fn same_topic_message_restarts_the_search() {
  let control = Arc::new(liuguang::message::MemoryStore::new());
  let search = Arc::new(TopicSearch::default());

  let feed = FeedController::builder(SearchSourceFactory::new(services(search.clone())))
    .config(FeedConfig::default().with_poll_interval(Duration::from_millis(10)))
    .store(control.clone())
    .start()
    .unwrap();
  feed.next_frame().unwrap();

  control.put(&encode(&json!({"Text": "dog"})).unwrap()).unwrap();
  wait_until(|| feed.generation() == 1);

  let frame = feed.next_frame().unwrap();
  assert_eq!(frame.metadata().url(), Some("http://thumbs/dog/0.png"));
}

#[test]
fn malformed_and_empty_messages_are_ignored() {
  let control = Arc::new(liuguang::message::MemoryStore::new());
  let search = Arc::new(TopicSearch::default());

  let feed = FeedController::builder(SearchSourceFactory::new(services(search)))
    .config(FeedConfig::default().with_poll_interval(Duration::from_millis(10)))
    .store(control.clone())
    .start()
    .unwrap();

  control.put("not base64 at all!").unwrap();
  control.put(&encode(&json!({"Text": ""})).unwrap()).unwrap();
  wait_until(|| control.is_empty());
  std::thread::sleep(Duration::from_millis(50));

  assert_eq!(feed.generation(), 0);
  assert_eq!(feed.topic(), "dog");
  feed.stop();
  assert!(feed.is_stopped());
}
