// 该文件是 Faune （野望） 项目的一部分。
// src/bin/simple_oneshot.rs - 照片识别
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use faune::{
  FromUrl,
  config::Config,
  model::{Recognition, ReplayExecutor},
  output::OutputWrapper,
  task::{OneShotTask, Task},
};

/// Faune 照片识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型执行器，例如 replay:///data/output.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 照片文件 (JPEG/PNG)
  #[arg(long, value_name = "PHOTO")]
  pub photo: PathBuf,
  /// 输出，例如 log: 或 jsonl:///tmp/results.jsonl
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  /// TOML 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 覆盖解码置信度阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence_threshold: Option<f32>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("照片: {}", args.photo.display());
  info!("输出: {}", args.output);

  let mut config = Config::load_or_default(args.config.as_ref())?;
  if let Some(threshold) = args.confidence_threshold {
    config.decoder.confidence_threshold = threshold;
  }
  config.validate()?;

  let pipeline = config.pipeline(ReplayExecutor::from_url(&args.model)?)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let photo = std::fs::read(&args.photo)?;

  match OneShotTask.run_task(photo, &pipeline, output)? {
    Some(detection) => println!(
      "{} {}",
      detection.label,
      Recognition::from(&detection).percent()
    ),
    None => println!("未识别到动物"),
  }

  Ok(())
}
