// 该文件是 Faune （野望） 项目的一部分。
// src/labels.rs - 类别标签表
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

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// 越界类别索引对应的标签
pub const UNKNOWN_LABEL: &str = "unknown";

/// 动物模型的类别名称，顺序与模型输出一致
pub const ANIMAL_CLASSES: [&str; 15] = [
  "Ours",
  "Guépard",
  "Crocodile",
  "Éléphant",
  "Renard",
  "Girafe",
  "Hérisson",
  "Humain",
  "Léopard",
  "Lion",
  "Lynx",
  "Autruche",
  "Rhinocéros",
  "Tigre",
  "Zèbre",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("标签表为空")]
  Empty,
}

#[derive(Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

/// 类别索引到名称的查找表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  names: Vec<String>,
}

impl Default for LabelTable {
  fn default() -> Self {
    Self::new(ANIMAL_CLASSES.iter().map(|s| s.to_string()).collect())
  }
}

impl LabelTable {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// 从 TOML 文本读取，格式为 `names = ["...", ...]`
  pub fn from_toml_str(text: &str) -> Result<Self, LabelError> {
    let file: LabelFile = toml::from_str(text)?;
    if file.names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self::new(file.names))
  }

  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    debug!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_toml_str(&text)
  }

  /// 查找类别名称，越界时返回 [`UNKNOWN_LABEL`]
  pub fn name(&self, class_index: usize) -> &str {
    self
      .names
      .get(class_index)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_table_matches_model_order() {
    let labels = LabelTable::default();
    assert_eq!(labels.len(), 15);
    assert_eq!(labels.name(0), "Ours");
    assert_eq!(labels.name(4), "Renard");
    assert_eq!(labels.name(14), "Zèbre");
  }

  #[test]
  fn out_of_range_index_is_unknown() {
    let labels = LabelTable::default();
    assert_eq!(labels.name(15), UNKNOWN_LABEL);
    assert_eq!(labels.name(usize::MAX), UNKNOWN_LABEL);
  }

  #[test]
  fn loads_names_from_toml() {
    let labels = LabelTable::from_toml_str(r#"names = ["cat", "dog"]"#).unwrap();
    assert_eq!(labels.name(1), "dog");
    assert!(matches!(
      LabelTable::from_toml_str("names = []"),
      Err(LabelError::Empty)
    ));
    assert!(LabelTable::from_toml_str("names = 3").is_err());
  }

  #[test]
  fn loads_names_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.toml");
    std::fs::write(&path, "names = [\"fox\"]\n").unwrap();
    let labels = LabelTable::from_toml_file(&path).unwrap();
    assert_eq!(labels.name(0), "fox");
  }
}
