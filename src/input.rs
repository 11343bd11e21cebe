// 该文件是 Liuguang （流光） 项目的一部分。
// src/input.rs - 图像源定义
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, frame::SourceImage, remote::RemoteError};

/// 图像源
///
/// 每次调用产出一帧：`Ok(Some(_))` 表示成功，`Ok(None)` 表示输入已耗尽，
/// `Err(_)` 表示读取失败。两种结束情况都会终止所属的帧流。
pub trait ImageSource {
  fn get_image(&mut self) -> Result<Option<SourceImage>, InputError>;
}

pub type BoxedSource = Box<dyn ImageSource + Send>;

impl<S: ImageSource + ?Sized> ImageSource for Box<S> {
  fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
    (**self).get_image()
  }
}

mod read_image_file;
pub use self::read_image_file::FileListSource;

mod search_source;
pub use self::search_source::{DESCRIBE_LIMIT, PAGE_SIZE, SearchImageSource};

#[cfg(feature = "v4l2_input")]
mod v4l2_source;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_source::V4l2Source;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid input url: {0}")]
  InvalidUrl(String),
  #[error("Image file list is empty")]
  EmptyFileList,
  #[error("Image from {path} failed to load: {source}")]
  ImageFile {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
  #[error("Image decode error: {0}")]
  Decode(#[from] image::ImageError),
  #[error("Remote service error: {0}")]
  Remote(#[from] RemoteError),
  #[error("V4L error: {0}")]
  Device(String),
}

impl InputError {
  /// 配置类错误（错误的本地路径、错误的输入 URL）对整个进程是致命的，
  /// 其余错误只终止所属的帧流。
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      InputError::SchemeMismatch
        | InputError::InvalidUrl(_)
        | InputError::EmptyFileList
        | InputError::ImageFile { .. }
    )
  }
}

pub const DEVICE_SCHEME: &str = "v4l";
pub const IMAGE_SCHEME: &str = "image";
pub const SEARCH_SCHEME: &str = "search";
pub const FEED_SCHEME: &str = "feed";

const DEFAULT_DEVICE: &str = "/dev/video0";

/// 输入源选择
///
/// - `v4l:///dev/video0`：摄像头，清空模式
/// - `image:///path/a.png`：图片文件，可多次给出，循环读取
/// - `search:dog`：固定主题的远程图像搜索
/// - `feed:dog`：由控制消息驱动、可切换主题的远程图像
#[derive(Debug, Clone, PartialEq)]
pub enum InputSelection {
  Device(PathBuf),
  Files(Vec<PathBuf>),
  Search(String),
  Feed(String),
}

impl InputSelection {
  /// 只有实时摄像头采用清空模式，其余来源不丢帧
  pub fn clear_mode(&self) -> bool {
    matches!(self, InputSelection::Device(_))
  }

  pub fn from_urls(urls: &[Url]) -> Result<Self, InputError> {
    let mut selections = urls
      .iter()
      .map(InputSelection::from_url)
      .collect::<Result<Vec<_>, _>>()?;

    match selections.len() {
      0 => Err(InputError::InvalidUrl("no input given".to_string())),
      1 => Ok(selections.remove(0)),
      _ => {
        let mut paths = Vec::with_capacity(selections.len());
        for selection in selections {
          match selection {
            InputSelection::Files(files) => paths.extend(files),
            other => {
              error!("只有图片输入可以组合使用: {:?}", other);
              return Err(InputError::InvalidUrl(
                "only image inputs can be combined".to_string(),
              ));
            }
          }
        }
        Ok(InputSelection::Files(paths))
      }
    }
  }
}

fn decoded_path(url: &Url) -> Result<String, InputError> {
  urlencoding::decode(url.path())
    .map(|path| path.into_owned())
    .map_err(|e| InputError::InvalidUrl(format!("{}: {}", url, e)))
}

fn decoded_topic(url: &Url) -> Result<String, InputError> {
  let path = decoded_path(url)?;
  let topic = match path.trim_matches('/') {
    "" => urlencoding::decode(url.host_str().unwrap_or_default())
      .map(|host| host.into_owned())
      .map_err(|e| InputError::InvalidUrl(format!("{}: {}", url, e)))?,
    topic => topic.to_string(),
  };
  if topic.is_empty() {
    return Err(InputError::InvalidUrl(format!("{}: missing topic", url)));
  }
  Ok(topic)
}

impl FromUrl for InputSelection {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DEVICE_SCHEME => {
        let path = decoded_path(url)?;
        let path = if path.is_empty() {
          DEFAULT_DEVICE.to_string()
        } else {
          path
        };
        Ok(InputSelection::Device(PathBuf::from(path)))
      }
      IMAGE_SCHEME => {
        let path = decoded_path(url)?;
        if path.is_empty() {
          return Err(InputError::InvalidUrl(format!("{}: missing path", url)));
        }
        Ok(InputSelection::Files(vec![PathBuf::from(path)]))
      }
      SEARCH_SCHEME => Ok(InputSelection::Search(decoded_topic(url)?)),
      FEED_SCHEME => Ok(InputSelection::Feed(decoded_topic(url)?)),
      other => {
        error!("不支持的输入方案: '{}'", other);
        Err(InputError::SchemeMismatch)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(url: &str) -> Result<InputSelection, InputError> {
    InputSelection::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn device_url_defaults_to_first_camera() {
    assert_eq!(
      parse("v4l:///dev/video2").unwrap(),
      InputSelection::Device(PathBuf::from("/dev/video2"))
    );
    assert_eq!(
      parse("v4l:").unwrap(),
      InputSelection::Device(PathBuf::from(DEFAULT_DEVICE))
    );
    assert!(parse("v4l:").unwrap().clear_mode());
  }

  #[test]
  fn topics_are_percent_decoded() {
    assert_eq!(
      parse("feed:red%20panda").unwrap(),
      InputSelection::Feed("red panda".to_string())
    );
    assert_eq!(
      parse("search://dog").unwrap(),
      InputSelection::Search("dog".to_string())
    );
    assert!(matches!(parse("feed:"), Err(InputError::InvalidUrl(_))));
  }

  #[test]
  fn host_form_topics_are_percent_decoded() {
    assert_eq!(
      parse("search://red%20panda").unwrap(),
      InputSelection::Search("red panda".to_string())
    );
    assert_eq!(
      parse("feed://red%20panda").unwrap(),
      InputSelection::Feed("red panda".to_string())
    );
  }

  #[test]
  fn image_urls_combine_into_one_file_list() {
    let urls = [
      Url::parse("image:///tmp/a.png").unwrap(),
      Url::parse("image:///tmp/b.png").unwrap(),
    ];
    let selection = InputSelection::from_urls(&urls).unwrap();
    assert_eq!(
      selection,
      InputSelection::Files(vec![PathBuf::from("/tmp/a.png"), PathBuf::from("/tmp/b.png")])
    );
    assert!(!selection.clear_mode());
  }

  #[test]
  fn mixed_inputs_are_rejected() {
    let urls = [
      Url::parse("image:///tmp/a.png").unwrap(),
      Url::parse("feed:dog").unwrap(),
    ];
    let err = InputSelection::from_urls(&urls).unwrap_err();
    assert!(err.is_fatal());
  }

  #[test]
  fn unknown_scheme_is_a_mismatch() {
    assert!(matches!(
      parse("rtsp://camera/stream"),
      Err(InputError::SchemeMismatch)
    ));
  }
}
