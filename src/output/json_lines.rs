// 该文件是 Faune （野望） 项目的一部分。
// src/output/json_lines.rs - JSON 行输出
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

//! 每个结果一行 JSON，追加写入文件：`jsonl:///var/log/faune/results.jsonl`
//!
//! 路径为 `-` 时（`jsonl:-`）写到标准输出。

use std::{
  fs::OpenOptions,
  io::{self, Write},
  path::Path,
  sync::{Mutex, PoisonError},
};

use chrono::{Local, SecondsFormat};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{BoundingBox, Detection, Recognition},
  output::Render,
  stabilizer::DisplayState,
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct Record<'a> {
  timestamp: String,
  index: u64,
  #[serde(flatten)]
  event: Event<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Event<'a> {
  Detection {
    label: &'a str,
    confidence: f32,
    percent: String,
    class_index: usize,
    bbox: &'a BoundingBox,
  },
  NoDetection,
  Showing {
    label: &'a str,
    confidence: f32,
    percent: String,
  },
  Empty,
}

pub struct JsonLinesOutput {
  writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesOutput {
  pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
    Self {
      writer: Mutex::new(Box::new(writer)),
    }
  }

  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, JsonLinesOutputError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    info!("识别结果写入: {}", path.display());
    Ok(Self::new(file))
  }

  fn write(&self, index: u64, event: Event<'_>) -> Result<(), JsonLinesOutputError> {
    let record = Record {
      timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
      index,
      event,
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
  }
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }
    match url.path() {
      "-" | "" => Ok(Self::new(io::stdout())),
      path => Self::open(path),
    }
  }
}

impl Render<Option<Detection>> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(&self, index: u64, result: &Option<Detection>) -> Result<(), Self::Error> {
    let event = match result {
      Some(detection) => Event::Detection {
        label: &detection.label,
        confidence: detection.confidence,
        percent: Recognition::from(detection).percent(),
        class_index: detection.class_index,
        bbox: &detection.bbox,
      },
      None => Event::NoDetection,
    };
    self.write(index, event)
  }
}

impl Render<DisplayState> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(&self, index: u64, result: &DisplayState) -> Result<(), Self::Error> {
    let event = match result {
      DisplayState::Showing(result) => Event::Showing {
        label: &result.recognition.label,
        confidence: result.recognition.confidence,
        percent: result.recognition.percent(),
      },
      DisplayState::Empty => Event::Empty,
    };
    self.write(index, event)
  }
}
