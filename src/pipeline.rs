// 该文件是 Faune （野望） 项目的一部分。
// src/pipeline.rs - 预处理、推理、解码流水线
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
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{Mutex, PoisonError},
};

use thiserror::Error;
use tracing::debug;

use crate::{
  decode::{DecodeError, Decoder},
  frame::{Frame, Tensor},
  labels::LabelTable,
  model::{Detection, ExecutorError, ModelExecutor},
  preprocess::{PreprocessError, Preprocessor},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("执行器错误: {0}")]
  Executor(#[from] ExecutorError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
}

/// 单次推理：帧 → 张量 → 模型 → 检测
pub struct Pipeline<E> {
  preprocessor: Mutex<Preprocessor>,
  executor: E,
  decoder: Decoder,
  labels: LabelTable,
}

impl<E: ModelExecutor> Pipeline<E> {
  pub fn new(preprocessor: Preprocessor, executor: E, decoder: Decoder, labels: LabelTable) -> Self {
    Self {
      preprocessor: Mutex::new(preprocessor),
      executor,
      decoder,
      labels,
    }
  }

  pub fn executor(&self) -> &E {
    &self.executor
  }

  pub fn decoder(&self) -> &Decoder {
    &self.decoder
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  /// 处理一帧；帧在预处理后即被释放
  pub fn run(&self, frame: Frame) -> Result<Option<Detection>, PipelineError> {
    let index = frame.index();
    let output = {
      let mut preprocessor = self
        .preprocessor
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      let input = preprocessor.process(&frame)?;
      drop(frame);
      self.execute(input)?
    };
    debug!("帧 {} 推理完成, 输出 {} 个元素", index, output.len());
    Ok(self.decoder.decode(output.as_slice(), &self.labels)?)
  }

  /// 处理编码后的静态照片
  pub fn run_encoded(&self, bytes: &[u8]) -> Result<Option<Detection>, PipelineError> {
    let output = {
      let mut preprocessor = self
        .preprocessor
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      let input = preprocessor.process_encoded(bytes)?;
      self.execute(input)?
    };
    Ok(self.decoder.decode(output.as_slice(), &self.labels)?)
  }

  // 执行器内部的 panic 在这里转换为错误，不会传到帧循环
  fn execute(&self, input: &Tensor) -> Result<Tensor, ExecutorError> {
    match panic::catch_unwind(AssertUnwindSafe(|| self.executor.run(input))) {
      Ok(result) => result,
      Err(payload) => Err(ExecutorError::Panicked(panic_message(payload.as_ref()))),
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    msg.to_string()
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    msg.clone()
  } else {
    "未知 panic".to_string()
  }
}
