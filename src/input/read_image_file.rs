// 该文件是 Faune （野望） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

//! 把一张图片当作摄像头：`image:///path/to/fox.jpg?repeat=N&fps=F`
//!
//! `repeat` 缺省为 1，`repeat=0` 表示无限重复；设置 `fps` 时按该帧率节拍产出。

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::{FrameSource, Pacer, parse_fps};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("无效的查询参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
}

pub struct ImageFileInput {
  path: PathBuf,
  image: RgbImage,
  repeat: Option<u64>,
  next_index: u64,
  pacer: Pacer,
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.decode()?.into_rgb8();
    info!(
      "打开图像文件 {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );
    Ok(Self {
      path: path.to_path_buf(),
      image,
      repeat: Some(1),
      next_index: 0,
      pacer: Pacer::default(),
    })
  }

  /// `None` 表示无限重复
  pub fn with_repeat(mut self, repeat: Option<u64>) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.pacer = Pacer::new(fps);
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let mut input = Self::open(url.path())?;
    for (key, value) in url.query_pairs() {
      let invalid = || ImageFileInputError::InvalidQuery {
        key: key.to_string(),
        value: value.to_string(),
      };
      match key.as_ref() {
        "repeat" => {
          let n = value.parse::<u64>().map_err(|_| invalid())?;
          input = input.with_repeat((n > 0).then_some(n));
        }
        "fps" => {
          let fps = parse_fps(&value).ok_or_else(invalid)?;
          input = input.with_fps(Some(fps));
        }
        _ => return Err(invalid()),
      }
    }
    Ok(input)
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.repeat.is_some_and(|n| self.next_index >= n) {
      return None;
    }
    let captured_at = self.pacer.wait();
    let frame = Frame::new(self.image.clone(), self.next_index, captured_at);
    self.next_index += 1;
    Some(frame)
  }
}

impl FrameSource for ImageFileInput {
  fn size(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}
