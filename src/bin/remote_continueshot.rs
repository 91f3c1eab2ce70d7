// 该文件是 Faune （野望） 项目的一部分。
// src/bin/remote_continueshot.rs - 远程连续识别
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use faune::{
  FromUrl,
  config::Config,
  input::InputWrapper,
  output::OutputWrapper,
  remote::{HttpAnalysisEndpoint, HttpObjectStore, RemoteAnalyzer, RemoteError},
  stabilizer::Stabilizer,
  task::{RemoteTask, Task, interrupt_flag},
};

/// Faune 远程连续识别：上传采集帧并调用远程分析服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，例如 image:///data/fox.jpg?repeat=0&fps=30
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 log: 或 jsonl:///tmp/results.jsonl
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  /// TOML 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 覆盖对象存储上传地址
  #[arg(long, value_name = "URL")]
  pub upload_url: Option<Url>,
  /// 覆盖远程分析地址
  #[arg(long, value_name = "URL")]
  pub analyze_url: Option<Url>,
  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 覆盖每秒请求次数
  #[arg(long, value_name = "FPS")]
  pub target_fps: Option<f32>,
  /// 覆盖识别置信度阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence_threshold: Option<f32>,
  /// 覆盖显示阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub display_threshold: Option<f32>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  let mut config = Config::load_or_default(args.config.as_ref())?;
  if args.upload_url.is_some() {
    config.remote.upload_url = args.upload_url;
  }
  if args.analyze_url.is_some() {
    config.remote.analyze_url = args.analyze_url;
  }
  if let Some(fps) = args.target_fps {
    config.scheduler.target_fps = fps;
  }
  if let Some(threshold) = args.confidence_threshold {
    config.decoder.confidence_threshold = threshold;
  }
  if let Some(threshold) = args.display_threshold {
    config.stabilizer.display_threshold = threshold;
  }
  config.validate()?;

  let upload_url = config
    .remote
    .upload_url
    .clone()
    .ok_or(RemoteError::NotConfigured("upload_url"))?;
  let analyze_url = config
    .remote
    .analyze_url
    .clone()
    .ok_or(RemoteError::NotConfigured("analyze_url"))?;
  info!("输入来源: {}", args.input);
  info!("上传地址: {}", upload_url);
  info!("分析地址: {}", analyze_url);

  let timeout = config.remote.timeout();
  let store =
    HttpObjectStore::new(upload_url, timeout)?.with_fields(config.remote.upload_fields.clone());
  let endpoint = HttpAnalysisEndpoint::new(analyze_url, timeout)?;
  let analyzer = Arc::new(RemoteAnalyzer::new(
    store,
    endpoint,
    Stabilizer::shared(config.stabilizer.clone()),
    config.decoder.confidence_threshold,
    &config.remote,
  ));

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let runtime = tokio::runtime::Runtime::new()?;

  RemoteTask::new(runtime.handle().clone(), &config.scheduler)
    .with_frame_number(args.frame_number)
    .with_stop_signal(interrupt_flag()?)
    .run_task(input, analyzer, output)?;

  Ok(())
}
