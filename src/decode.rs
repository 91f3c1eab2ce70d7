// 该文件是 Faune （野望） 项目的一部分。
// src/decode.rs - 检测输出解码
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

//! 将模型的扁平输出解码为单个最佳检测。
//!
//! 输出逻辑形状为 `(4 + C) × A`，按特征行优先存储：前 4 行是
//! `cx, cy, w, h`，其后 `C` 行是每个锚框的类别分数。

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
  labels::LabelTable,
  model::{BoundingBox, Detection},
};

const BOX_ROWS: usize = 4;

pub const DEFAULT_NUM_CLASSES: usize = 15;
pub const DEFAULT_NUM_ANCHORS: usize = 8400;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.55;
pub const DEFAULT_PIXEL_THRESHOLD: f32 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("输出张量长度不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("无效的解码配置: {0}")]
  InvalidConfig(String),
}

/// 框坐标的表示方式
///
/// 不同的模型导出流程会输出归一化坐标或像素坐标。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CoordinateMode {
  /// 四个坐标的绝对值都不超过 `pixel_threshold` 时视为归一化坐标
  Auto { pixel_threshold: f32 },
  Normalized,
  Pixels,
}

impl Default for CoordinateMode {
  fn default() -> Self {
    CoordinateMode::Auto {
      pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
    }
  }
}

impl CoordinateMode {
  fn scale(&self, coords: [f32; 4], input_size: f32) -> f32 {
    match *self {
      CoordinateMode::Normalized => input_size,
      CoordinateMode::Pixels => 1.0,
      CoordinateMode::Auto { pixel_threshold } => {
        if coords.iter().all(|v| v.abs() <= pixel_threshold) {
          input_size
        } else {
          1.0
        }
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
  pub num_classes: usize,
  pub num_anchors: usize,
  /// 预处理的方形分辨率 S
  pub input_size: u32,
  pub confidence_threshold: f32,
  pub coordinates: CoordinateMode,
}

impl Default for DecoderConfig {
  fn default() -> Self {
    Self {
      num_classes: DEFAULT_NUM_CLASSES,
      num_anchors: DEFAULT_NUM_ANCHORS,
      input_size: DEFAULT_INPUT_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      coordinates: CoordinateMode::default(),
    }
  }
}

impl DecoderConfig {
  /// 输出缓冲区应有的元素个数
  pub fn output_len(&self) -> usize {
    (BOX_ROWS + self.num_classes) * self.num_anchors
  }
}

#[derive(Debug, Clone)]
pub struct Decoder {
  config: DecoderConfig,
}

impl Decoder {
  pub fn new(config: DecoderConfig) -> Result<Self, DecodeError> {
    if config.num_classes == 0 || config.num_anchors == 0 {
      return Err(DecodeError::InvalidConfig(format!(
        "类别数与锚框数必须大于 0 (classes={}, anchors={})",
        config.num_classes, config.num_anchors
      )));
    }
    if config.input_size == 0 {
      return Err(DecodeError::InvalidConfig("输入分辨率必须大于 0".into()));
    }
    if !(0.0..=1.0).contains(&config.confidence_threshold) {
      return Err(DecodeError::InvalidConfig(format!(
        "置信度阈值 {} 不在 [0, 1] 内",
        config.confidence_threshold
      )));
    }
    if let CoordinateMode::Auto { pixel_threshold } = config.coordinates {
      if !(pixel_threshold > 0.0) {
        return Err(DecodeError::InvalidConfig(format!(
          "坐标判定阈值 {} 必须大于 0",
          pixel_threshold
        )));
      }
    }
    Ok(Self { config })
  }

  pub fn config(&self) -> &DecoderConfig {
    &self.config
  }

  /// 解码最佳检测；没有超过阈值的类别时返回 `Ok(None)`
  pub fn decode(
    &self,
    output: &[f32],
    labels: &LabelTable,
  ) -> Result<Option<Detection>, DecodeError> {
    let anchors = self.config.num_anchors;
    let expected = self.config.output_len();
    if output.len() != expected {
      return Err(DecodeError::ShapeMismatch {
        expected,
        actual: output.len(),
      });
    }

    // 按类别、再按锚框遍历；只有严格更大的分数才会替换，相等时保留先出现的
    let mut best_score = f32::NEG_INFINITY;
    let mut best_class = 0usize;
    let mut best_anchor = 0usize;
    for (class_index, row) in output[BOX_ROWS * anchors..]
      .chunks_exact(anchors)
      .enumerate()
    {
      for (anchor_index, &score) in row.iter().enumerate() {
        if score > best_score {
          best_score = score;
          best_class = class_index;
          best_anchor = anchor_index;
        }
      }
    }

    trace!(
      "最佳分数 {} (类别 {}, 锚框 {})",
      best_score, best_class, best_anchor
    );

    if !(best_score > self.config.confidence_threshold) {
      return Ok(None);
    }

    let coords = [
      output[best_anchor],
      output[anchors + best_anchor],
      output[2 * anchors + best_anchor],
      output[3 * anchors + best_anchor],
    ];
    let scale = self
      .config
      .coordinates
      .scale(coords, self.config.input_size as f32);
    let [cx, cy, w, h] = coords.map(|v| v * scale);

    let detection = Detection {
      class_index: best_class,
      anchor_index: best_anchor,
      label: labels.name(best_class).to_string(),
      confidence: best_score,
      bbox: BoundingBox::from_center(cx, cy, w, h),
    };
    debug!(
      "检测到 {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
      detection.label,
      detection.confidence * 100.0,
      detection.bbox.x,
      detection.bbox.y,
      detection.bbox.w,
      detection.bbox.h
    );
    Ok(Some(detection))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn decoder(classes: usize, anchors: usize, threshold: f32) -> Decoder {
    Decoder::new(DecoderConfig {
      num_classes: classes,
      num_anchors: anchors,
      input_size: 640,
      confidence_threshold: threshold,
      coordinates: CoordinateMode::default(),
    })
    .unwrap()
  }

  fn set(buffer: &mut [f32], anchors: usize, row: usize, anchor: usize, value: f32) {
    buffer[row * anchors + anchor] = value;
  }

  /// C=3, A=4：类别 1 在锚框 2 上得分 0.82，其余不超过 0.3
  fn scenario() -> Vec<f32> {
    let (classes, anchors) = (3, 4);
    let mut buffer = vec![0.1f32; (4 + classes) * anchors];
    for (i, v) in buffer[4 * anchors..].iter_mut().enumerate() {
      *v = 0.05 * (i % 7) as f32;
    }
    set(&mut buffer, anchors, 0, 2, 0.5);
    set(&mut buffer, anchors, 1, 2, 0.25);
    set(&mut buffer, anchors, 2, 2, 0.1);
    set(&mut buffer, anchors, 3, 2, 0.2);
    set(&mut buffer, anchors, 4 + 1, 2, 0.82);
    buffer
  }

  #[test]
  fn end_to_end_scenario() {
    let labels = LabelTable::new(vec!["Ours".into(), "Renard".into(), "Lynx".into()]);
    let buffer = scenario();

    let detection = decoder(3, 4, 0.5).decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.class_index, 1);
    assert_eq!(detection.anchor_index, 2);
    assert_eq!(detection.confidence, 0.82);
    assert_eq!(detection.label, "Renard");
    // 归一化坐标按 640 缩放
    assert_eq!(detection.bbox, BoundingBox::from_center(320.0, 160.0, 64.0, 128.0));

    assert_eq!(decoder(3, 4, 0.9).decode(&buffer, &labels).unwrap(), None);
  }

  #[test]
  fn decoding_is_deterministic() {
    let labels = LabelTable::default();
    let decoder = decoder(3, 4, 0.5);
    let buffer = scenario();
    let first = decoder.decode(&buffer, &labels).unwrap();
    let second = decoder.decode(&buffer, &labels).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn max_reduction_finds_the_single_hot_cell() {
    let (classes, anchors) = (5, 16);
    let decoder = decoder(classes, anchors, 0.5);
    let labels = LabelTable::default();
    for class in 0..classes {
      for anchor in 0..anchors {
        let mut buffer = vec![0.2f32; (4 + classes) * anchors];
        set(&mut buffer, anchors, 4 + class, anchor, 0.75);
        let detection = decoder.decode(&buffer, &labels).unwrap().unwrap();
        assert_eq!((detection.class_index, detection.anchor_index), (class, anchor));
        assert_eq!(detection.confidence, 0.75);
        assert_eq!(detection.label, labels.name(class));
      }
    }
  }

  #[test]
  fn threshold_is_strict() {
    let threshold = 0.55f32;
    let decoder = decoder(2, 3, threshold);
    let labels = LabelTable::default();

    let mut buffer = vec![0.0f32; 6 * 3];
    set(&mut buffer, 3, 5, 1, threshold);
    assert_eq!(decoder.decode(&buffer, &labels).unwrap(), None);

    let above = f32::from_bits(threshold.to_bits() + 1);
    set(&mut buffer, 3, 5, 1, above);
    let detection = decoder.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.confidence, above);
  }

  #[test]
  fn ties_keep_lowest_class_then_lowest_anchor() {
    let anchors = 4;
    let decoder = decoder(3, anchors, 0.5);
    let labels = LabelTable::default();
    let mut buffer = vec![0.0f32; 7 * anchors];
    set(&mut buffer, anchors, 4 + 2, 0, 0.9);
    set(&mut buffer, anchors, 4 + 1, 3, 0.9);
    set(&mut buffer, anchors, 4 + 1, 1, 0.9);
    let detection = decoder.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!((detection.class_index, detection.anchor_index), (1, 1));
  }

  #[test]
  fn wrong_length_is_a_decode_error() {
    let decoder = decoder(3, 4, 0.5);
    let labels = LabelTable::default();
    for len in [0, 27, 29, 56] {
      let err = decoder.decode(&vec![0.9; len], &labels).unwrap_err();
      assert_eq!(
        err,
        DecodeError::ShapeMismatch {
          expected: 28,
          actual: len
        }
      );
    }
  }

  #[test]
  fn nan_scores_never_win() {
    let decoder = decoder(1, 2, 0.5);
    let labels = LabelTable::default();
    let mut buffer = vec![0.0f32; 5 * 2];
    set(&mut buffer, 2, 4, 0, f32::NAN);
    assert_eq!(decoder.decode(&buffer, &labels).unwrap(), None);
    set(&mut buffer, 2, 4, 1, 0.6);
    let detection = decoder.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.anchor_index, 1);
  }

  #[test]
  fn pixel_coordinates_are_left_unscaled() {
    let decoder = decoder(1, 1, 0.5);
    let labels = LabelTable::default();
    let buffer = [320.0, 240.0, 100.0, 50.0, 0.9];
    let detection = decoder.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.bbox, BoundingBox::from_center(320.0, 240.0, 100.0, 50.0));
  }

  #[test]
  fn explicit_coordinate_modes_override_the_heuristic() {
    let labels = LabelTable::default();
    let buffer = [1.5, 1.0, 0.5, 0.5, 0.9];

    let pixels = Decoder::new(DecoderConfig {
      num_classes: 1,
      num_anchors: 1,
      coordinates: CoordinateMode::Pixels,
      ..DecoderConfig::default()
    })
    .unwrap();
    let detection = pixels.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.bbox, BoundingBox::from_center(1.5, 1.0, 0.5, 0.5));

    let normalized = Decoder::new(DecoderConfig {
      num_classes: 1,
      num_anchors: 1,
      input_size: 100,
      coordinates: CoordinateMode::Normalized,
      ..DecoderConfig::default()
    })
    .unwrap();
    let buffer = [3.0, 1.0, 0.5, 0.5, 0.9];
    let detection = normalized.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.bbox, BoundingBox::from_center(300.0, 100.0, 50.0, 50.0));
  }

  #[test]
  fn missing_label_maps_to_unknown() {
    let decoder = decoder(3, 1, 0.5);
    let labels = LabelTable::new(vec!["Ours".into()]);
    let buffer = [0.5, 0.5, 0.1, 0.1, 0.0, 0.0, 0.8];
    let detection = decoder.decode(&buffer, &labels).unwrap().unwrap();
    assert_eq!(detection.label, crate::labels::UNKNOWN_LABEL);
  }

  #[test]
  fn rejects_degenerate_configuration() {
    for config in [
      DecoderConfig {
        num_anchors: 0,
        ..DecoderConfig::default()
      },
      DecoderConfig {
        num_classes: 0,
        ..DecoderConfig::default()
      },
      DecoderConfig {
        confidence_threshold: 1.5,
        ..DecoderConfig::default()
      },
      DecoderConfig {
        coordinates: CoordinateMode::Auto {
          pixel_threshold: 0.0,
        },
        ..DecoderConfig::default()
      },
    ] {
      assert!(matches!(
        Decoder::new(config),
        Err(DecodeError::InvalidConfig(_))
      ));
    }
  }
}
