// 该文件是 Faune （野望） 项目的一部分。
// src/model/replay.rs - 回放执行器
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

//! 回放执行器：每次推理都返回预先导出的同一个输出张量。
//!
//! 用于在没有推理运行时的机器上驱动整条流水线，例如：
//!
//! ```text
//! replay:///data/fox_output.json?delay_ms=120&input_len=1228800
//! ```
//!
//! `.json` 文件为浮点数数组，其他扩展名按小端序 f32 原始数据读取。

use std::{path::Path, thread, time::Duration};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Tensor,
  model::{ExecutorError, ModelExecutor},
};

#[derive(Error, Debug)]
pub enum ReplayExecutorError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("原始数据长度 {0} 不是 4 的倍数")]
  RawLength(usize),
  #[error("无效的查询参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
}

pub struct ReplayExecutor {
  output: Tensor,
  delay: Duration,
  input_len: Option<usize>,
}

impl ReplayExecutor {
  pub fn new(output: Tensor) -> Self {
    Self {
      output,
      delay: Duration::ZERO,
      input_len: None,
    }
  }

  /// 模拟推理耗时
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// 要求输入张量具有固定长度
  pub fn with_input_len(mut self, input_len: usize) -> Self {
    self.input_len = Some(input_len);
    self
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReplayExecutorError> {
    let path = path.as_ref();
    info!("加载回放输出: {}", path.display());
    let bytes = std::fs::read(path)?;
    let data: Vec<f32> = if path.extension().is_some_and(|ext| ext == "json") {
      serde_json::from_slice(&bytes)?
    } else {
      if bytes.len() % 4 != 0 {
        return Err(ReplayExecutorError::RawLength(bytes.len()));
      }
      bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
    };
    debug!("回放输出元素数: {}", data.len());
    Ok(Self::new(Tensor::from(data)))
  }
}

impl FromUrlWithScheme for ReplayExecutor {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayExecutor {
  type Error = ReplayExecutorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayExecutorError::SchemeMismatch);
    }

    let mut executor = Self::load(url.path())?;
    for (key, value) in url.query_pairs() {
      let invalid = || ReplayExecutorError::InvalidQuery {
        key: key.to_string(),
        value: value.to_string(),
      };
      match key.as_ref() {
        "delay_ms" => {
          let ms = value.parse::<u64>().map_err(|_| invalid())?;
          executor = executor.with_delay(Duration::from_millis(ms));
        }
        "input_len" => {
          let len = value.parse::<usize>().map_err(|_| invalid())?;
          executor = executor.with_input_len(len);
        }
        _ => return Err(invalid()),
      }
    }
    Ok(executor)
  }
}

impl ModelExecutor for ReplayExecutor {
  fn run(&self, input: &Tensor) -> Result<Tensor, ExecutorError> {
    if let Some(expected) = self.input_len {
      if input.len() != expected {
        return Err(ExecutorError::InputShape {
          expected,
          actual: input.len(),
        });
      }
    }
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }
    Ok(self.output.clone())
  }
}
