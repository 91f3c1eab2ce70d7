// 该文件是 Faune （野望） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

//! 按文件名顺序回放目录中的图片：`folder:///path/to/frames?fps=F&loop=true`

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::{FrameSource, Pacer, parse_fps};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageDirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("目录 {0} 中没有可读取的图片")]
  Empty(PathBuf),
  #[error("无效的查询参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
}

pub struct ImageDirectoryInput {
  files: Vec<PathBuf>,
  size: (u32, u32),
  cursor: usize,
  looping: bool,
  next_index: u64,
  pacer: Pacer,
}

impl ImageDirectoryInput {
  pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, ImageDirectoryInputError> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
      if is_image {
        files.push(path);
      }
    }
    files.sort();

    // 以第一张可读图片的尺寸作为源尺寸
    let size = files
      .iter()
      .find_map(|path| match Self::dimensions(path) {
        Ok(size) => Some(size),
        Err(e) => {
          warn!("跳过无法读取的图片 {}: {}", path.display(), e);
          None
        }
      })
      .ok_or_else(|| ImageDirectoryInputError::Empty(dir.to_path_buf()))?;
    info!(
      "打开图像目录 {}: {} 张图片, {}x{}",
      dir.display(),
      files.len(),
      size.0,
      size.1
    );
    Ok(Self {
      files,
      size,
      cursor: 0,
      looping: false,
      next_index: 0,
      pacer: Pacer::default(),
    })
  }

  pub fn with_loop(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.pacer = Pacer::new(fps);
    self
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn dimensions(path: &Path) -> Result<(u32, u32), ImageDirectoryInputError> {
    Ok(ImageReader::open(path)?.into_dimensions()?)
  }

  fn load(path: &Path) -> Result<RgbImage, ImageDirectoryInputError> {
    Ok(ImageReader::open(path)?.decode()?.into_rgb8())
  }
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = ImageDirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageDirectoryInputError::SchemeMismatch);
    }

    let mut input = Self::open(url.path())?;
    for (key, value) in url.query_pairs() {
      let invalid = || ImageDirectoryInputError::InvalidQuery {
        key: key.to_string(),
        value: value.to_string(),
      };
      match key.as_ref() {
        "loop" => input = input.with_loop(value.parse::<bool>().map_err(|_| invalid())?),
        "fps" => input = input.with_fps(Some(parse_fps(&value).ok_or_else(invalid)?)),
        _ => return Err(invalid()),
      }
    }
    Ok(input)
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let mut failures = 0;
    while failures < self.files.len() {
      if self.cursor >= self.files.len() {
        if !self.looping {
          return None;
        }
        self.cursor = 0;
      }
      let path = &self.files[self.cursor];
      self.cursor += 1;
      match Self::load(path) {
        Ok(image) => {
          let captured_at = self.pacer.wait();
          let frame = Frame::new(image, self.next_index, captured_at);
          self.next_index += 1;
          return Some(frame);
        }
        Err(e) => {
          // 坏文件跳过，不中断回放
          warn!("跳过无法读取的图片 {}: {}", path.display(), e);
          failures += 1;
        }
      }
    }
    None
  }
}

impl FrameSource for ImageDirectoryInput {
  fn size(&self) -> (u32, u32) {
    self.size
  }
}
