// 该文件是 Faune （野望） 项目的一部分。
// src/input.rs - 帧输入源
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

use std::{
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod image_directory;
mod read_image_file;

pub use self::image_directory::{ImageDirectoryInput, ImageDirectoryInputError};
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 帧输入源
///
/// 调用方可以以低于原生帧率的频率拉取帧，多余的帧由调度器丢弃。
pub trait FrameSource: Iterator<Item = Frame> {
  /// 帧尺寸 (宽, 高)
  fn size(&self) -> (u32, u32);
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("图像目录输入错误: {0}")]
  ImageDirectoryInputError(#[from] ImageDirectoryInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageDirectory(ImageDirectoryInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageDirectoryInput::SCHEME => Ok(InputWrapper::ImageDirectory(
        ImageDirectoryInput::from_url(url)?,
      )),
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::ImageDirectory(input) => input.next(),
    }
  }
}

impl FrameSource for InputWrapper {
  fn size(&self) -> (u32, u32) {
    match self {
      InputWrapper::ReadImageFile(input) => input.size(),
      InputWrapper::ImageDirectory(input) => input.size(),
    }
  }
}

/// 按固定帧率节拍产出帧，模拟摄像头
#[derive(Debug, Default)]
struct Pacer {
  period: Option<Duration>,
  next_due: Option<Instant>,
}

impl Pacer {
  fn new(fps: Option<f64>) -> Self {
    Self {
      period: fps.and_then(|fps| Duration::try_from_secs_f64(1.0 / fps).ok()),
      next_due: None,
    }
  }

  /// 等到下一帧的时刻并返回采集时刻
  fn wait(&mut self) -> Instant {
    let Some(period) = self.period else {
      return Instant::now();
    };
    if let Some(due) = self.next_due {
      let now = Instant::now();
      if due > now {
        thread::sleep(due - now);
      }
    }
    let captured_at = Instant::now();
    self.next_due = Some(captured_at + period);
    captured_at
  }
}

/// 解析 `fps` 查询参数，必须为正数
fn parse_fps(value: &str) -> Option<f64> {
  value.parse::<f64>().ok().filter(|fps| *fps > 0.0 && fps.is_finite())
}
