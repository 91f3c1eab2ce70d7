// 该文件是 Faune （野望） 项目的一部分。
// src/preprocess.rs - 张量预处理
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

use std::borrow::Cow;

use image::{RgbImage, imageops::FilterType};
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use crate::frame::{Frame, RGB_CHANNELS, Tensor};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("空帧: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("无效的目标分辨率: {0}")]
  InvalidSize(u32),
}

/// 模型输入张量的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  /// 平面布局 3×S×S
  #[default]
  Nchw,
  /// 交错布局 S×S×3
  Nhwc,
}

/// 将帧缩放到 S×S 并归一化到 [0, 1]
///
/// 输出缓冲区只分配一次，每次调用复用。
pub struct Preprocessor {
  size: u32,
  layout: TensorLayout,
  tensor: Tensor,
}

impl Preprocessor {
  pub fn new(size: u32, layout: TensorLayout) -> Result<Self, PreprocessError> {
    if size == 0 {
      return Err(PreprocessError::InvalidSize(size));
    }
    let s = size as usize;
    let shape = match layout {
      TensorLayout::Nchw => [RGB_CHANNELS, s, s],
      TensorLayout::Nhwc => [s, s, RGB_CHANNELS],
    };
    Ok(Self {
      size,
      layout,
      tensor: Tensor::with_shape(&shape),
    })
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn process(&mut self, frame: &Frame) -> Result<&Tensor, PreprocessError> {
    self.process_image(frame.image())
  }

  /// 处理编码后的静态图片（JPEG/PNG 等）
  pub fn process_encoded(&mut self, bytes: &[u8]) -> Result<&Tensor, PreprocessError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    self.process_image(&image)
  }

  pub fn process_image(&mut self, image: &RgbImage) -> Result<&Tensor, PreprocessError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyFrame { width, height });
    }

    let resized: Cow<'_, RgbImage> = if (width, height) == (self.size, self.size) {
      Cow::Borrowed(image)
    } else {
      trace!("缩放 {}x{} -> {}x{}", width, height, self.size, self.size);
      Cow::Owned(image::imageops::resize(
        image,
        self.size,
        self.size,
        FilterType::Triangle,
      ))
    };

    let plane = (self.size as usize) * (self.size as usize);
    let data = self.tensor.as_mut();
    match self.layout {
      TensorLayout::Nchw => {
        for (i, pixel) in resized.pixels().enumerate() {
          for c in 0..RGB_CHANNELS {
            data[c * plane + i] = pixel[c] as f32 / 255.0;
          }
        }
      }
      TensorLayout::Nhwc => {
        for (dst, &src) in data.iter_mut().zip(resized.as_raw().iter()) {
          *dst = src as f32 / 255.0;
        }
      }
    }

    Ok(&self.tensor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn nchw_is_planar_and_normalized() {
    let mut preprocessor = Preprocessor::new(2, TensorLayout::Nchw).unwrap();
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(0, 0, Rgb([255, 0, 51]));
    image.put_pixel(1, 1, Rgb([0, 255, 102]));

    let tensor = preprocessor.process_image(&image).unwrap();
    assert_eq!(tensor.shape(), &[3, 2, 2]);
    let data = tensor.as_slice();
    // R 平面
    assert_eq!(&data[0..4], &[1.0, 0.0, 0.0, 0.0]);
    // G 平面
    assert_eq!(&data[4..8], &[0.0, 0.0, 0.0, 1.0]);
    // B 平面
    assert_eq!(&data[8..12], &[0.2, 0.0, 0.0, 0.4]);
  }

  #[test]
  fn nhwc_is_interleaved() {
    let mut preprocessor = Preprocessor::new(1, TensorLayout::Nhwc).unwrap();
    let image = RgbImage::from_pixel(1, 1, Rgb([255, 0, 51]));
    let tensor = preprocessor.process_image(&image).unwrap();
    assert_eq!(tensor.shape(), &[1, 1, 3]);
    assert_eq!(tensor.as_slice(), &[1.0, 0.0, 0.2]);
  }

  #[test]
  fn resizes_to_target_square() {
    let mut preprocessor = Preprocessor::new(4, TensorLayout::Nchw).unwrap();
    let image = RgbImage::from_pixel(16, 9, Rgb([255, 255, 255]));
    let tensor = preprocessor.process_image(&image).unwrap();
    assert_eq!(tensor.len(), 3 * 4 * 4);
    assert!(tensor.as_slice().iter().all(|&v| (v - 1.0).abs() < 0.01));
  }

  #[test]
  fn rejects_empty_frames_and_garbage_bytes() {
    let mut preprocessor = Preprocessor::new(4, TensorLayout::Nchw).unwrap();
    assert!(matches!(
      preprocessor.process_image(&RgbImage::new(0, 3)),
      Err(PreprocessError::EmptyFrame {
        width: 0,
        height: 3
      })
    ));
    assert!(matches!(
      preprocessor.process_encoded(b"not an image"),
      Err(PreprocessError::Decode(_))
    ));
    assert!(matches!(
      Preprocessor::new(0, TensorLayout::Nchw),
      Err(PreprocessError::InvalidSize(0))
    ));
  }

  #[test]
  fn decodes_encoded_png() {
    let image = RgbImage::from_pixel(3, 3, Rgb([0, 0, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();

    let mut preprocessor = Preprocessor::new(3, TensorLayout::Nchw).unwrap();
    let tensor = preprocessor.process_encoded(bytes.get_ref()).unwrap();
    assert!(tensor.as_slice()[18..27].iter().all(|&v| v == 1.0));
    assert!(tensor.as_slice()[0..18].iter().all(|&v| v == 0.0));
  }
}
