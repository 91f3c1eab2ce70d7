// 该文件是 Faune （野望） 项目的一部分。
// src/output/log_output.rs - 日志输出
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
  convert::Infallible,
  sync::{Mutex, PoisonError},
};

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detection, Recognition},
  output::Render,
  stabilizer::DisplayState,
};

/// 通过 `tracing` 输出；显示内容变化时才以 info 级别记录
#[derive(Debug, Default)]
pub struct LogOutput {
  shown: Mutex<Option<String>>,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(_url: &Url) -> Result<Self, Self::Error> {
    Ok(Self::default())
  }
}

impl LogOutput {
  /// 更新当前显示内容，返回是否发生变化
  fn update(&self, shown: Option<String>) -> bool {
    let mut current = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
    if *current == shown {
      false
    } else {
      *current = shown;
      true
    }
  }
}

impl Render<Option<Detection>> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, index: u64, result: &Option<Detection>) -> Result<(), Self::Error> {
    match result {
      Some(detection) => info!(
        "[{}] 识别结果: {} {} (类别 {}, 锚点 {}, 框 {:.0},{:.0} {:.0}x{:.0})",
        index,
        detection.label,
        Recognition::from(detection).percent(),
        detection.class_index,
        detection.anchor_index,
        detection.bbox.x,
        detection.bbox.y,
        detection.bbox.w,
        detection.bbox.h
      ),
      None => info!("[{}] 未识别到动物", index),
    }
    Ok(())
  }
}

impl Render<DisplayState> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, index: u64, result: &DisplayState) -> Result<(), Self::Error> {
    match result {
      DisplayState::Showing(result) => {
        let text = format!(
          "{} {}",
          result.recognition.label,
          result.recognition.percent()
        );
        if self.update(Some(text.clone())) {
          info!("[{}] 显示: {}", index, text);
        } else {
          debug!("[{}] 保持显示: {}", index, text);
        }
      }
      DisplayState::Empty => {
        if self.update(None) {
          info!("[{}] 显示清空", index);
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::time::Instant;

  use super::*;
  use crate::stabilizer::StabilizedResult;

  #[test]
  fn tracks_display_changes() {
    let output = LogOutput::default();
    let showing = DisplayState::Showing(StabilizedResult {
      recognition: Recognition::new("Renard", 0.9),
      display_until: Instant::now(),
    });

    assert!(output.update(Some("Renard 90%".into())));
    assert!(!output.update(Some("Renard 90%".into())));
    output.render_result(1, &showing).unwrap();
    assert_eq!(
      output.shown.lock().unwrap().as_deref(),
      Some("Renard 90%")
    );

    output.render_result(2, &DisplayState::Empty).unwrap();
    assert!(output.shown.lock().unwrap().is_none());
  }
}
