// 该文件是 Faune （野望） 项目的一部分。
// src/frame.rs - 帧与张量定义
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

use std::time::Instant;

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 一帧摄像头图像
///
/// 由输入源创建，流水线只消费一次，之后即被释放。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  index: u64,
  captured_at: Instant,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, captured_at: Instant) -> Self {
    Self {
      image,
      index,
      captured_at,
    }
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  /// 单调的采集时刻
  pub fn captured_at(&self) -> Instant {
    self.captured_at
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 扁平的 f32 张量，附带逻辑形状
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  data: Box<[f32]>,
  shape: Box<[usize]>,
}

impl Tensor {
  /// 以零填充创建给定形状的张量
  pub fn with_shape(shape: &[usize]) -> Self {
    let size = shape.iter().product();
    Self {
      data: vec![0.0f32; size].into_boxed_slice(),
      shape: shape.into(),
    }
  }

  /// 用已有数据构造张量，长度与形状不符时返回 `None`
  pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Option<Self> {
    if data.len() != shape.iter().product::<usize>() {
      return None;
    }
    Some(Self {
      data: data.into_boxed_slice(),
      shape: shape.into(),
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

impl AsRef<[f32]> for Tensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl From<Vec<f32>> for Tensor {
  fn from(data: Vec<f32>) -> Self {
    let len = data.len();
    Self {
      data: data.into_boxed_slice(),
      shape: Box::new([len]),
    }
  }
}
