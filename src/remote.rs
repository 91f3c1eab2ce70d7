// 该文件是 Faune （野望） 项目的一部分。
// src/remote.rs - 远程分析路径
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

//! # 远程分析
//!
//! 帧先上传到对象存储，再把得到的公开 URL 交给远程分析接口。网络往返时间
//! 不固定，响应可能乱序到达，因此：
//!
//! - 每个请求在发出时获得严格递增的编号；
//! - 只有编号大于“最后接受编号”的响应才会写入稳定器，随后更新该编号；
//! - 其余响应作为过期响应丢弃，这不是错误。
//!
//! 上传与分析整体受超时约束，超时与其他失败一样直接丢弃，不在本周期内重试。

use std::{
  collections::BTreeMap,
  fmt,
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};

use async_trait::async_trait;
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  frame::Frame,
  model::Recognition,
  stabilizer::SharedStabilizer,
};

pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum RemoteError {
  #[error("HTTP 请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("远程分析超时 ({0:?})")]
  Timeout(Duration),
  #[error("无效的置信度字符串: {0:?}")]
  InvalidScore(String),
  #[error("无效的响应: {0}")]
  InvalidResponse(String),
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("URL 解析错误: {0}")]
  Url(#[from] url::ParseError),
  #[error("未配置远程地址: {0}")]
  NotConfigured(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  /// 对象存储上传地址（multipart）
  pub upload_url: Option<Url>,
  /// 上传表单中的额外字段，例如 `upload_preset`
  pub upload_fields: BTreeMap<String, String>,
  /// 远程分析接口地址
  pub analyze_url: Option<Url>,
  pub timeout_ms: u64,
  pub jpeg_quality: u8,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      upload_url: None,
      upload_fields: BTreeMap::new(),
      analyze_url: None,
      timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
  pub fn get(self) -> u64 {
    self.0
  }
}

impl fmt::Display for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest {
  pub id: RequestId,
  pub issued_at: Instant,
}

/// 严格递增的请求编号，从 1 开始
#[derive(Debug, Default)]
pub struct RequestSequencer {
  last: AtomicU64,
}

impl RequestSequencer {
  pub fn issue(&self) -> InferenceRequest {
    let id = self.last.fetch_add(1, Ordering::AcqRel) + 1;
    InferenceRequest {
      id: RequestId(id),
      issued_at: Instant::now(),
    }
  }
}

/// 记录最后接受的请求编号
#[derive(Debug, Default)]
pub struct OrderingGate {
  last_accepted: Mutex<u64>,
}

impl OrderingGate {
  /// 编号更新时执行 `apply` 并返回其结果，否则返回 `None`
  ///
  /// 比较、更新与 `apply` 都在同一把锁内完成，较旧的响应不可能覆盖较新的结果。
  pub fn admit_with<T>(&self, id: RequestId, apply: impl FnOnce() -> T) -> Option<T> {
    let mut last = self
      .last_accepted
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if id.0 <= *last {
      return None;
    }
    *last = id.0;
    Some(apply())
  }

  pub fn admit(&self, id: RequestId) -> bool {
    self.admit_with(id, || ()).is_some()
  }

  pub fn last_accepted(&self) -> u64 {
    *self
      .last_accepted
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
  pub image_url: String,
}

/// 远程分析接口的响应，`score` 形如 `"87%"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
  pub label: String,
  pub score: String,
}

/// 将 `"NN%"` 形式的置信度解析为 [0, 1]
pub fn parse_score(score: &str) -> Result<f32, RemoteError> {
  let invalid = || RemoteError::InvalidScore(score.to_string());
  let trimmed = score.trim();
  let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
  let value: f32 = number.parse().map_err(|_| invalid())?;
  if !value.is_finite() || !(0.0..=100.0).contains(&value) {
    return Err(invalid());
  }
  Ok(value / 100.0)
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
  /// 上传图片，返回可公开访问的 URL
  async fn upload(&self, image: Vec<u8>, file_name: &str) -> Result<Url, RemoteError>;
}

#[async_trait]
pub trait AnalysisEndpoint: Send + Sync {
  async fn analyze(&self, image_url: &Url) -> Result<AnalysisResponse, RemoteError>;
}

#[derive(Debug)]
pub enum RemoteOutcome {
  /// 响应已写入稳定器；`recognition` 为 `None` 表示低于解码阈值
  Applied {
    id: RequestId,
    recognition: Option<Recognition>,
    displayed: bool,
  },
  /// 已有更新的请求返回，本响应被丢弃
  Stale { id: RequestId, last_accepted: u64 },
  Failed { id: RequestId, error: RemoteError },
}

pub struct RemoteAnalyzer<S, A> {
  store: S,
  endpoint: A,
  sequencer: RequestSequencer,
  gate: OrderingGate,
  stabilizer: SharedStabilizer,
  confidence_threshold: f32,
  timeout: Duration,
  jpeg_quality: u8,
}

impl<S: ObjectStore, A: AnalysisEndpoint> RemoteAnalyzer<S, A> {
  pub fn new(
    store: S,
    endpoint: A,
    stabilizer: SharedStabilizer,
    confidence_threshold: f32,
    config: &RemoteConfig,
  ) -> Self {
    Self {
      store,
      endpoint,
      sequencer: RequestSequencer::default(),
      gate: OrderingGate::default(),
      stabilizer,
      confidence_threshold,
      timeout: config.timeout(),
      jpeg_quality: config.jpeg_quality.clamp(1, 100),
    }
  }

  pub fn stabilizer(&self) -> &SharedStabilizer {
    &self.stabilizer
  }

  pub fn last_accepted(&self) -> u64 {
    self.gate.last_accepted()
  }

  /// 为一次采集分配编号，应在发起请求的时刻调用
  pub fn issue(&self) -> InferenceRequest {
    self.sequencer.issue()
  }

  pub async fn analyze(&self, frame: Frame) -> RemoteOutcome {
    let request = self.issue();
    self.complete(request, frame).await
  }

  /// 完成一个已编号的请求：上传、分析、按编号决定是否写入稳定器
  pub async fn complete(&self, request: InferenceRequest, frame: Frame) -> RemoteOutcome {
    let id = request.id;
    let result = match tokio::time::timeout(self.timeout, self.round_trip(id, frame)).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::Timeout(self.timeout)),
    };

    let recognition = match result {
      Ok(recognition) => recognition,
      Err(error) => {
        warn!("远程分析 {} 失败: {}", id, error);
        return RemoteOutcome::Failed { id, error };
      }
    };

    let applied = self.gate.admit_with(id, || {
      let mut stabilizer = self
        .stabilizer
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      stabilizer.accept(recognition.as_ref(), Instant::now())
    });

    match applied {
      Some(displayed) => {
        info!(
          "远程分析 {} 完成 (耗时 {:.2?}): {}",
          id,
          request.issued_at.elapsed(),
          recognition
            .as_ref()
            .map(|r| format!("{} {}", r.label, r.percent()))
            .unwrap_or_else(|| "无结果".to_string())
        );
        RemoteOutcome::Applied {
          id,
          recognition,
          displayed,
        }
      }
      None => {
        let last_accepted = self.gate.last_accepted();
        debug!("丢弃过期响应 {} (最后接受 #{})", id, last_accepted);
        RemoteOutcome::Stale { id, last_accepted }
      }
    }
  }

  async fn round_trip(
    &self,
    id: RequestId,
    frame: Frame,
  ) -> Result<Option<Recognition>, RemoteError> {
    let jpeg = encode_jpeg(&frame.into_image(), self.jpeg_quality)?;
    let file_name = format!("frame-{}.jpg", id.get());
    let image_url = self.store.upload(jpeg, &file_name).await?;
    debug!("请求 {} 已上传: {}", id, image_url);

    let response = self.endpoint.analyze(&image_url).await?;
    let confidence = parse_score(&response.score)?;
    let label = response.label.trim();
    if label.is_empty() || !(confidence > self.confidence_threshold) {
      return Ok(None);
    }
    Ok(Some(Recognition::new(label, confidence)))
  }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, RemoteError> {
  let mut bytes = Vec::new();
  JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(image)?;
  Ok(bytes)
}

mod http;
pub use self::http::{HttpAnalysisEndpoint, HttpObjectStore};
