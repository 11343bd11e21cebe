// 该文件是 Liuguang （流光） 项目的一部分。
// src/task.rs - 推理任务循环
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

use std::convert::Infallible;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{
  frame::Frame,
  stream::{FrameFeed, StreamError},
};

/// 单个推理结果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub label: String,
  pub score: f32,
}

impl Prediction {
  pub fn new(label: impl Into<String>, score: f32) -> Self {
    Self {
      label: label.into(),
      score,
    }
  }
}

/// 推理模型，由外部提供
pub trait Model {
  type Error;

  fn infer(&self, frame: &Frame) -> Result<Vec<Prediction>, Self::Error>;
}

/// 不做推理的占位模型
pub struct NullModel;

impl Model for NullModel {
  type Error = Infallible;

  fn infer(&self, _frame: &Frame) -> Result<Vec<Prediction>, Self::Error> {
    Ok(Vec::new())
  }
}

pub trait Task<F: ?Sized, M>: Sized {
  type Error;
  /// 返回处理的帧数
  fn run_task(self, feed: &F, model: M) -> Result<usize, Self::Error>;
}

/// 帧率统计，每满一秒给出一次结果
pub struct FpsCounter {
  start: Instant,
  frames: u32,
  fps: f64,
}

impl Default for FpsCounter {
  fn default() -> Self {
    Self {
      start: Instant::now(),
      frames: 0,
      fps: 0.0,
    }
  }
}

impl FpsCounter {
  pub fn tick(&mut self) -> Option<f64> {
    self.frames += 1;
    let elapsed = self.start.elapsed();
    if elapsed < Duration::from_secs(1) {
      return None;
    }
    self.fps = self.frames as f64 / elapsed.as_secs_f64();
    self.frames = 0;
    self.start = Instant::now();
    Some(self.fps)
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<F, M, ME> Task<F, M> for ContinuousTask
where
  F: FrameFeed + ?Sized,
  M: Model<Error = ME>,
  ME: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, feed: &F, model: M) -> Result<usize, Self::Error> {
    info!("开始任务...");
    let mut frame_index = 0usize;
    let mut fps = FpsCounter::default();

    loop {
      let frame = match feed.next_frame() {
        Ok(frame) => frame,
        Err(StreamError::Ended) => {
          info!("输入已结束，退出任务循环");
          break;
        }
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
          warn!("输入出错，退出任务循环: {}", e);
          break;
        }
      };

      frame_index += 1;
      let now = Instant::now();
      let mut predictions = model.infer(&frame)?;
      predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
      feed.send_result(frame.metadata(), &predictions);

      info!(
        "第 {} 帧 {}x{} 推理完成，耗时: {:.2?}，结果 {} 个",
        frame_index,
        frame.width(),
        frame.height(),
        now.elapsed(),
        predictions.len()
      );
      if let Some(rate) = fps.tick() {
        info!("fps {:.1}", rate);
      }

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        feed.stop();
        break;
      }
    }

    info!("任务完成，退出");
    Ok(frame_index)
  }
}
