// 该文件是 Faune （野望） 项目的一部分。
// src/task.rs - 识别任务
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
  fmt,
  sync::{
    Arc, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::{Detection, ModelExecutor, Recognition},
  output::Render,
  pipeline::Pipeline,
  remote::{AnalysisEndpoint, ObjectStore, RemoteAnalyzer, RemoteOutcome},
  scheduler::{Scheduler, SchedulerConfig, Throttle, TickOutcome},
  stabilizer::{DisplayState, Stabilizer, StabilizerConfig},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 安装 Ctrl-C 处理器，返回中断标志；30 秒内未退出则强制结束进程
pub fn interrupt_flag() -> anyhow::Result<Arc<AtomicBool>> {
  let flag = Arc::new(AtomicBool::new(false));
  let handler_flag = Arc::clone(&flag);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(flag)
}

/// 连续任务的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  /// 读到的帧数
  pub frames: u64,
  /// 实际发起的推理或远程请求数
  pub runs: u64,
  /// 得到识别结果的次数
  pub detections: u64,
  pub failures: u64,
  /// 被更新的响应取代而丢弃的远程响应数
  pub stale: u64,
  /// 连续解码失败达到上限，模型输出与配置多半不匹配
  pub persistent_failure: bool,
}

impl TaskSummary {
  fn record_tick(&mut self, outcome: &TickOutcome) {
    match outcome {
      TickOutcome::Detected(_) => self.detections += 1,
      TickOutcome::Failed { persistent, .. } => {
        self.failures += 1;
        self.persistent_failure |= *persistent;
      }
      _ => {}
    }
  }

  fn record_remote(&mut self, outcome: &RemoteOutcome) {
    match outcome {
      RemoteOutcome::Applied {
        recognition: Some(_),
        ..
      } => self.detections += 1,
      RemoteOutcome::Applied { .. } => {}
      RemoteOutcome::Stale { .. } => self.stale += 1,
      RemoteOutcome::Failed { .. } => self.failures += 1,
    }
  }
}

impl fmt::Display for TaskSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "帧 {}, 推理 {}, 识别 {}, 失败 {}, 过期 {}",
      self.frames, self.runs, self.detections, self.failures, self.stale
    )?;
    if self.persistent_failure {
      write!(f, " (解码持续失败)")?;
    }
    Ok(())
  }
}

#[derive(Debug, Default, Clone)]
struct StopCondition {
  frame_number: Option<u64>,
  stop: Option<Arc<AtomicBool>>,
}

impl StopCondition {
  fn reached(&self, frames: u64) -> bool {
    if self.frame_number.is_some_and(|n| frames >= n) {
      info!("达到指定帧数 {}, 退出任务循环", frames);
      return true;
    }
    if self.stop.as_ref().is_some_and(|s| s.load(Ordering::SeqCst)) {
      warn!("中断信号接收，退出任务循环");
      return true;
    }
    false
  }
}

/// 识别一张静态照片（拍照流程）
pub struct OneShotTask;

impl<B, E, O, RE> Task<B, &Pipeline<E>, O> for OneShotTask
where
  B: AsRef<[u8]>,
  E: ModelExecutor,
  O: Render<Option<Detection>, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Output = Option<Detection>;
  type Error = anyhow::Error;

  fn run_task(self, input: B, pipeline: &Pipeline<E>, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始识别照片...");
    let now = Instant::now();
    let result = pipeline.run_encoded(input.as_ref())?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(0, &result)?;
    Ok(result)
  }
}

/// 设备端连续识别：帧 → 调度器 → 稳定器 → 输出
///
/// 稳定器以帧的采集时刻为时钟。
#[derive(Debug, Default)]
pub struct ContinuousTask {
  stabilizer: StabilizerConfig,
  stop: StopCondition,
}

impl ContinuousTask {
  pub fn new(stabilizer: StabilizerConfig) -> Self {
    Self {
      stabilizer,
      stop: StopCondition::default(),
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.stop.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop.stop = Some(stop);
    self
  }
}

impl<I, E, O, RE> Task<I, &Scheduler<E>, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  E: ModelExecutor,
  O: Render<DisplayState, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(self, input: I, scheduler: &Scheduler<E>, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始连续识别任务...");
    let mut stabilizer = Stabilizer::new(self.stabilizer);
    let mut summary = TaskSummary::default();

    for frame in input {
      let index = frame.index();
      let now = frame.captured_at();
      summary.frames += 1;

      let outcome = scheduler.tick(frame);
      if outcome.ran() {
        summary.runs += 1;
        summary.record_tick(&outcome);
        let recognition = outcome.detection().map(Recognition::from);
        if stabilizer.accept(recognition.as_ref(), now) {
          debug!("帧 {} 更新显示", index);
        }
      }
      output.render_result(index, &stabilizer.state(now))?;

      if self.stop.reached(summary.frames) {
        break;
      }
    }

    if summary.persistent_failure {
      warn!("解码持续失败, 请检查模型输出形状与类别配置");
    }
    info!("任务完成: {}", summary);
    Ok(summary)
  }
}

/// 远程连续识别：按节流间隔上传采集帧，每个请求一个异步任务，
/// 响应按请求编号决定是否写入稳定器
///
/// 帧循环在调用线程上同步运行，请求在 `handle` 所属的运行时上执行；
/// 因此不能在异步上下文中调用。
pub struct RemoteTask {
  handle: Handle,
  interval: Duration,
  stop: StopCondition,
}

impl RemoteTask {
  pub fn new(handle: Handle, scheduler: &SchedulerConfig) -> Self {
    Self {
      handle,
      interval: scheduler.interval(),
      stop: StopCondition::default(),
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.stop.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop.stop = Some(stop);
    self
  }

  fn collect_finished(
    &self,
    in_flight: &mut Vec<JoinHandle<RemoteOutcome>>,
    summary: &mut TaskSummary,
  ) {
    let (finished, pending): (Vec<_>, Vec<_>) =
      in_flight.drain(..).partition(JoinHandle::is_finished);
    *in_flight = pending;
    for handle in finished {
      self.join(handle, summary);
    }
  }

  /// 等待一个请求结束；请求内部 panic 计为失败，不中断任务
  fn join(&self, handle: JoinHandle<RemoteOutcome>, summary: &mut TaskSummary) {
    match self.handle.block_on(handle) {
      Ok(outcome) => summary.record_remote(&outcome),
      Err(e) => {
        warn!("远程请求异常结束: {}", e);
        summary.failures += 1;
      }
    }
  }
}

impl<I, S, A, O, RE> Task<I, Arc<RemoteAnalyzer<S, A>>, O> for RemoteTask
where
  I: Iterator<Item = Frame>,
  S: ObjectStore + 'static,
  A: AnalysisEndpoint + 'static,
  O: Render<DisplayState, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    analyzer: Arc<RemoteAnalyzer<S, A>>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始远程识别任务, 请求间隔 {:.2?}", self.interval);
    let throttle = Throttle::new(self.interval);
    let mut in_flight = Vec::new();
    let mut summary = TaskSummary::default();
    let mut last_index = 0;

    for frame in input {
      let index = frame.index();
      last_index = index;
      summary.frames += 1;

      if throttle.try_acquire(frame.captured_at()) {
        let request = analyzer.issue();
        debug!("帧 {} 发起远程分析 {}", index, request.id);
        summary.runs += 1;
        let analyzer = Arc::clone(&analyzer);
        in_flight.push(
          self
            .handle
            .spawn(async move { analyzer.complete(request, frame).await }),
        );
      }
      self.collect_finished(&mut in_flight, &mut summary);

      let state = analyzer
        .stabilizer()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .state(Instant::now());
      output.render_result(index, &state)?;

      if self.stop.reached(summary.frames) {
        break;
      }
    }

    if !in_flight.is_empty() {
      info!("等待 {} 个进行中的远程请求", in_flight.len());
    }
    for handle in in_flight {
      self.join(handle, &mut summary);
    }
    let state = analyzer
      .stabilizer()
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .state(Instant::now());
    output.render_result(last_index, &state)?;

    info!(
      "任务完成: {}, 最后接受的请求 #{}",
      summary,
      analyzer.last_accepted()
    );
    Ok(summary)
  }
}
