// 该文件是 Faune （野望） 项目的一部分。
// src/config.rs - 配置文件
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

//! TOML 配置。所有字段都有默认值，配置文件只需写出要修改的部分：
//!
//! ```toml
//! [model]
//! input_size = 640
//! num_classes = 15
//! num_anchors = 8400
//! layout = "nchw"
//! labels = "labels/animals.toml"
//!
//! [decoder]
//! confidence_threshold = 0.55
//! coordinates = { mode = "auto", pixel_threshold = 2.0 }
//!
//! [scheduler]
//! target_fps = 1.0
//!
//! [stabilizer]
//! display_threshold = 0.70
//! dwell_ms = 3000
//!
//! [remote]
//! upload_url = "https://api.example.com/upload"
//! analyze_url = "https://api.example.com/analyze"
//! timeout_ms = 5000
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  decode::{
    CoordinateMode, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_NUM_ANCHORS,
    DEFAULT_NUM_CLASSES, DecodeError, Decoder, DecoderConfig,
  },
  labels::{LabelError, LabelTable},
  model::ModelExecutor,
  pipeline::Pipeline,
  preprocess::{PreprocessError, Preprocessor, TensorLayout},
  remote::RemoteConfig,
  scheduler::{MAX_TARGET_FPS, SchedulerConfig},
  stabilizer::StabilizerConfig,
};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("标签表错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("预处理配置错误: {0}")]
  PreprocessError(#[from] PreprocessError),
  #[error("解码配置错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("无效配置: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
  pub input_size: u32,
  pub num_classes: usize,
  pub num_anchors: usize,
  pub layout: TensorLayout,
  /// 标签文件；未设置时使用内置动物标签
  pub labels: Option<PathBuf>,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      input_size: DEFAULT_INPUT_SIZE,
      num_classes: DEFAULT_NUM_CLASSES,
      num_anchors: DEFAULT_NUM_ANCHORS,
      layout: TensorLayout::default(),
      labels: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecodeSection {
  pub confidence_threshold: f32,
  pub coordinates: CoordinateMode,
}

impl Default for DecodeSection {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      coordinates: CoordinateMode::default(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
  pub model: ModelConfig,
  pub decoder: DecodeSection,
  pub scheduler: SchedulerConfig,
  pub stabilizer: StabilizerConfig,
  pub remote: RemoteConfig,
}

impl Config {
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_toml_str(&text)
  }

  /// 未指定配置文件时使用默认配置
  pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::load(path),
      None => {
        info!("未指定配置文件，使用默认配置");
        Ok(Self::default())
      }
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let unit = |name: &str, value: f32| {
      if (0.0..=1.0).contains(&value) {
        Ok(())
      } else {
        Err(ConfigError::Invalid(format!("{} = {} 不在 [0, 1] 内", name, value)))
      }
    };
    unit("decoder.confidence_threshold", self.decoder.confidence_threshold)?;
    unit("stabilizer.display_threshold", self.stabilizer.display_threshold)?;

    let fps = self.scheduler.target_fps;
    if !(fps > 0.0 && fps <= MAX_TARGET_FPS) {
      return Err(ConfigError::Invalid(format!(
        "scheduler.target_fps = {} 不在 (0, {}] 内",
        fps, MAX_TARGET_FPS
      )));
    }
    if self.model.input_size == 0 || self.model.num_classes == 0 || self.model.num_anchors == 0 {
      return Err(ConfigError::Invalid(
        "model.input_size / num_classes / num_anchors 必须大于 0".into(),
      ));
    }
    if self.remote.timeout_ms == 0 {
      return Err(ConfigError::Invalid("remote.timeout_ms 必须大于 0".into()));
    }
    if self.stabilizer.display_threshold < self.decoder.confidence_threshold {
      warn!(
        "显示阈值 {} 低于解码阈值 {}，显示阈值实际不起作用",
        self.stabilizer.display_threshold, self.decoder.confidence_threshold
      );
    }
    Ok(())
  }

  pub fn decoder_config(&self) -> DecoderConfig {
    DecoderConfig {
      num_classes: self.model.num_classes,
      num_anchors: self.model.num_anchors,
      input_size: self.model.input_size,
      confidence_threshold: self.decoder.confidence_threshold,
      coordinates: self.decoder.coordinates,
    }
  }

  /// 读取标签表；标签数与类别数不一致时只给出警告，越界类别显示为 unknown
  pub fn labels(&self) -> Result<LabelTable, ConfigError> {
    let labels = match &self.model.labels {
      Some(path) => LabelTable::from_toml_file(path)?,
      None => LabelTable::default(),
    };
    if labels.len() != self.model.num_classes {
      warn!(
        "标签数 {} 与模型类别数 {} 不一致",
        labels.len(),
        self.model.num_classes
      );
    }
    Ok(labels)
  }

  /// 按配置组装流水线
  pub fn pipeline<E: ModelExecutor>(&self, executor: E) -> Result<Pipeline<E>, ConfigError> {
    let preprocessor = Preprocessor::new(self.model.input_size, self.model.layout)?;
    let decoder = Decoder::new(self.decoder_config())?;
    Ok(Pipeline::new(preprocessor, executor, decoder, self.labels()?))
  }
}
