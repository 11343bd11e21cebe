// 该文件是 Liuguang （流光） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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
use std::pin::Pin;

use image::RgbImage;
use tracing::{error, info};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  frame::{Metadata, SourceImage, keys},
  input::{ImageSource, InputError},
};

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

/// V4L2 摄像头输入源
///
/// 读取失败即视为该帧流的结束，不在内部重试。
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Source {
  // 字段按声明顺序 drop，stream 必须先于 device
  stream: Option<Stream<'static>>,
  device: Pin<Box<Device>>,
  path: PathBuf,
  width: u32,
  height: u32,
}

impl V4l2Source {
  pub fn new(device_path: &Path) -> Result<Self, InputError> {
    let device_error = |e: std::io::Error| {
      InputError::Device(format!("{}: {}", device_path.display(), e))
    };

    let device = Box::pin(Device::with_path(device_path).map_err(device_error)?);

    let mut format = device.format().map_err(device_error)?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(device_error)?;
    info!(
      "摄像头已打开: {} {}x{}",
      device_path.display(),
      format.width,
      format.height
    );

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 与 device 存放在同一个结构体中，并且先于 device 被 drop。
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(&*device);
      Stream::with_buffers(device_static, Type::VideoCapture, CAPTURE_BUFFERS)
        .map_err(device_error)?
    };

    Ok(Self {
      stream: Some(stream),
      device,
      path: device_path.to_path_buf(),
      width: format.width,
      height: format.height,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn device(&self) -> &Device {
    &self.device
  }
}

/// 将 YUYV 格式转换为 RGB
pub(crate) fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl ImageSource for V4l2Source {
  fn get_image(&mut self) -> Result<Option<SourceImage>, InputError> {
    let Some(stream) = self.stream.as_mut() else {
      return Ok(None);
    };

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer,
      Err(e) => {
        error!("无法捕获帧 {}: {}", self.path.display(), e);
        self.stream = None;
        return Err(InputError::Device(e.to_string()));
      }
    };

    let rgb = yuyv_to_rgb(buffer, self.width, self.height);
    let image = RgbImage::from_raw(self.width, self.height, rgb)
      .ok_or_else(|| InputError::Device("captured buffer size mismatch".to_string()))?;
    let metadata = Metadata::new().with(keys::DEVICE, self.path.display().to_string());
    Ok(Some(SourceImage::new(image, metadata)))
  }
}
