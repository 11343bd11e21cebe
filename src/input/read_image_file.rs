// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/read_image_file.rs - 图像文件列表输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, error};

use crate::{
  frame::{Metadata, SourceImage, keys},
  input::{ImageSource, InputError},
};

/// 循环读取固定的图片文件列表，永不耗尽
pub struct FileListSource {
  paths: Vec<PathBuf>,
  cursor: usize,
}

impl FileListSource {
  pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Result<Self, InputError> {
    let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    if paths.is_empty() {
      return Err(InputError::EmptyFileList);
    }
    Ok(Self { paths, cursor: 0 })
  }

  pub fn paths(&self) -> &[PathBuf] {
    &self.paths
  }

  fn load(path: &Path) -> Result<image::RgbImage, InputError> {
    let to_error = |source: image::ImageError| InputError::ImageFile {
      path: path.to_path_buf(),
      source,
    };
    let image = ImageReader::open(path)
      .map_err(|e| to_error(image::ImageError::IoError(e)))?
      .decode()
      .map_err(to_error)?;
    Ok(image.to_rgb8())
  }
}

impl ImageSource for FileListSource {
  fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
    let path = &self.paths[self.cursor % self.paths.len()];
    self.cursor = (self.cursor + 1) % self.paths.len();

    debug!("读取图片文件: {}", path.display());
    let image = Self::load(path).inspect_err(|e| error!("{}", e))?;
    let metadata = Metadata::new().with(keys::FILE, path.display().to_string());
    Ok(Some(SourceImage::new(image, metadata)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn write_png(dir: &Path, name: &str, side: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::new(side, side).save(&path).unwrap();
    path
  }

  #[test]
  fn cycles_through_paths_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", 1);
    let b = write_png(dir.path(), "b.png", 2);
    let mut source = FileListSource::new([a.clone(), b.clone()]).unwrap();

    let files: Vec<String> = (0..5)
      .map(|_| {
        let image = source.get_image().unwrap().unwrap();
        image.metadata.file().unwrap().to_string()
      })
      .collect();

    let a = a.display().to_string();
    let b = b.display().to_string();
    assert_eq!(files, vec![a.clone(), b.clone(), a.clone(), b, a]);
  }

  #[test]
  fn decoded_image_keeps_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "square.png", 3);
    let mut source = FileListSource::new([path]).unwrap();
    let image = source.get_image().unwrap().unwrap();
    assert_eq!(image.image.dimensions(), (3, 3));
  }

  #[test]
  fn missing_file_is_a_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FileListSource::new([dir.path().join("missing.png")]).unwrap();
    let err = source.get_image().unwrap_err();
    assert!(matches!(err, InputError::ImageFile { .. }));
    assert!(err.is_fatal());
  }

  #[test]
  fn empty_list_is_rejected() {
    let paths: Vec<PathBuf> = Vec::new();
    assert!(matches!(
      FileListSource::new(paths),
      Err(InputError::EmptyFileList)
    ));
  }
}
