// 该文件是 Faune （野望） 项目的一部分。
// src/model.rs - 模型执行器与检测结果
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

use serde::Serialize;
use thiserror::Error;

use crate::frame::Tensor;

#[derive(Error, Debug)]
pub enum ExecutorError {
  #[error("输入形状不匹配: 期望 {expected} 个元素, 实际 {actual} 个")]
  InputShape { expected: usize, actual: usize },
  #[error("模型推理失败: {0}")]
  Inference(String),
  #[error("模型推理过程中发生 panic: {0}")]
  Panicked(String),
}

/// 不透明的模型执行器：输入张量，输出张量
///
/// 实现者可以是任意推理运行时的绑定；流水线只依赖扁平缓冲区。
pub trait ModelExecutor: Send + Sync {
  fn run(&self, input: &Tensor) -> Result<Tensor, ExecutorError>;
}

impl<T: ModelExecutor + ?Sized> ModelExecutor for Box<T> {
  fn run(&self, input: &Tensor) -> Result<Tensor, ExecutorError> {
    (**self).run(input)
  }
}

impl<T: ModelExecutor + ?Sized> ModelExecutor for std::sync::Arc<T> {
  fn run(&self, input: &Tensor) -> Result<Tensor, ExecutorError> {
    (**self).run(input)
  }
}

/// 模型输入像素空间中的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

impl BoundingBox {
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self {
      x: cx - w / 2.0,
      y: cy - h / 2.0,
      w,
      h,
    }
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.w / 2.0, self.y + self.h / 2.0)
  }
}

/// 单帧的最佳检测
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_index: usize,
  pub anchor_index: usize,
  pub label: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

/// 标签与置信度，本地检测和远程分析共用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
  pub label: String,
  pub confidence: f32,
}

impl Recognition {
  pub fn new(label: impl Into<String>, confidence: f32) -> Self {
    Self {
      label: label.into(),
      confidence,
    }
  }

  /// 以四舍五入的百分比显示，例如 `82%`
  pub fn percent(&self) -> String {
    format!("{}%", (self.confidence * 100.0).round() as i64)
  }
}

impl From<&Detection> for Recognition {
  fn from(detection: &Detection) -> Self {
    Self::new(detection.label.clone(), detection.confidence)
  }
}

mod replay;
pub use self::replay::{ReplayExecutor, ReplayExecutorError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bounding_box_round_trips_center() {
    let bbox = BoundingBox::from_center(100.0, 50.0, 40.0, 20.0);
    assert_eq!((bbox.x, bbox.y), (80.0, 40.0));
    assert_eq!(bbox.center(), (100.0, 50.0));
  }

  #[test]
  fn percent_is_rounded() {
    assert_eq!(Recognition::new("Renard", 0.824).percent(), "82%");
    assert_eq!(Recognition::new("Renard", 0.826).percent(), "83%");
    assert_eq!(Recognition::new("Renard", 1.0).percent(), "100%");
  }
}
