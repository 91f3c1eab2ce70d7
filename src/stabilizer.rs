// 该文件是 Faune （野望） 项目的一部分。
// src/stabilizer.rs - 显示结果稳定器
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

//! 逐帧识别结果噪声很大，直接显示会闪烁。稳定器只接受置信度高于显示阈值的
//! 结果，并在驻留时间内保持显示；低于阈值或空的结果不会清除尚未过期的显示。
//!
//! 状态机：
//!
//! ```text
//! Empty   --合格结果-->   Showing
//! Showing --合格结果-->   Showing (替换并重置到期时间)
//! Showing --不合格/空-->  Showing (不变)
//! Showing --now > 到期--> Empty
//! ```

use std::{
  sync::{Arc, Mutex},
  time::{Duration, Instant},
};

use serde::Deserialize;
use tracing::debug;

use crate::model::Recognition;

pub const DEFAULT_DISPLAY_THRESHOLD: f32 = 0.70;
pub const DEFAULT_DWELL_MS: u64 = 3000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
  /// 显示阈值，独立于解码阈值
  pub display_threshold: f32,
  /// 驻留时间（毫秒）
  pub dwell_ms: u64,
}

impl Default for StabilizerConfig {
  fn default() -> Self {
    Self {
      display_threshold: DEFAULT_DISPLAY_THRESHOLD,
      dwell_ms: DEFAULT_DWELL_MS,
    }
  }
}

impl StabilizerConfig {
  pub fn dwell(&self) -> Duration {
    Duration::from_millis(self.dwell_ms)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilizedResult {
  pub recognition: Recognition,
  pub display_until: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayState {
  Empty,
  Showing(StabilizedResult),
}

#[derive(Debug)]
pub struct Stabilizer {
  config: StabilizerConfig,
  state: DisplayState,
}

/// 流水线写入、界面读取共用的稳定器
pub type SharedStabilizer = Arc<Mutex<Stabilizer>>;

impl Stabilizer {
  pub fn new(config: StabilizerConfig) -> Self {
    Self {
      config,
      state: DisplayState::Empty,
    }
  }

  pub fn shared(config: StabilizerConfig) -> SharedStabilizer {
    Arc::new(Mutex::new(Self::new(config)))
  }

  pub fn config(&self) -> &StabilizerConfig {
    &self.config
  }

  fn qualifies(&self, recognition: &Recognition) -> bool {
    recognition.confidence > self.config.display_threshold
  }

  fn expire(&mut self, now: Instant) {
    if let DisplayState::Showing(result) = &self.state {
      if now > result.display_until {
        debug!("显示结果已过期: {}", result.recognition.label);
        self.state = DisplayState::Empty;
      }
    }
  }

  /// 接收一个识别结果；返回是否替换了当前显示
  pub fn accept(&mut self, recognition: Option<&Recognition>, now: Instant) -> bool {
    self.expire(now);
    match recognition {
      Some(recognition) if self.qualifies(recognition) => {
        debug!(
          "显示结果更新: {} {}",
          recognition.label,
          recognition.percent()
        );
        self.state = DisplayState::Showing(StabilizedResult {
          recognition: recognition.clone(),
          display_until: now + self.config.dwell(),
        });
        true
      }
      _ => false,
    }
  }

  /// 当前显示的结果，已过期时返回 `None`
  pub fn current(&mut self, now: Instant) -> Option<&StabilizedResult> {
    self.expire(now);
    match &self.state {
      DisplayState::Showing(result) => Some(result),
      DisplayState::Empty => None,
    }
  }

  pub fn state(&mut self, now: Instant) -> DisplayState {
    self.expire(now);
    self.state.clone()
  }
}
