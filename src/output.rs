// 该文件是 Faune （野望） 项目的一部分。
// src/output.rs - 识别结果输出
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Detection, stabilizer::DisplayState};

/// 呈现一个结果；`index` 为帧序号或远程请求号
pub trait Render<Output: ?Sized> {
  type Error;
  fn render_result(&self, index: u64, result: &Output) -> Result<(), Self::Error>;
}

mod json_lines;
mod log_output;

pub use self::json_lines::{JsonLinesOutput, JsonLinesOutputError};
pub use self::log_output::LogOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON 行输出错误: {0}")]
  JsonLinesOutputError(#[from] JsonLinesOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

impl From<Infallible> for OutputError {
  fn from(e: Infallible) -> Self {
    match e {}
  }
}

pub enum OutputWrapper {
  Log(LogOutput),
  JsonLines(JsonLinesOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      JsonLinesOutput::SCHEME => Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<Option<Detection>> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, index: u64, result: &Option<Detection>) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => Ok(output.render_result(index, result)?),
      OutputWrapper::JsonLines(output) => Ok(output.render_result(index, result)?),
    }
  }
}

impl Render<DisplayState> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, index: u64, result: &DisplayState) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => Ok(output.render_result(index, result)?),
      OutputWrapper::JsonLines(output) => Ok(output.render_result(index, result)?),
    }
  }
}
