// 该文件是 Faune （野望） 项目的一部分。
// src/scheduler.rs - 节流与单飞调度
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

//! 摄像头每秒可能送来 30 帧以上，而模型只能承受每秒数次推理。
//! 调度器在每一帧上被调用，只有同时满足以下两点才真正推理：
//!
//! 1. 距上一次推理已经过了 `1 / target_fps` 秒；
//! 2. 当前没有正在进行的推理。
//!
//! 不满足条件的帧直接丢弃，不排队。

use std::{
  sync::{
    Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};

use serde::Deserialize;
use tracing::{error, trace, warn};

use crate::{
  frame::Frame,
  model::{Detection, ModelExecutor},
  pipeline::{Pipeline, PipelineError},
};

pub const DEFAULT_TARGET_FPS: f32 = 1.0;
pub const MAX_TARGET_FPS: f32 = 60.0;
pub const DEFAULT_DECODE_ERROR_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// 每秒最多推理次数
  pub target_fps: f32,
  /// 连续解码失败达到该次数时视为持续性错误
  pub decode_error_limit: u32,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      target_fps: DEFAULT_TARGET_FPS,
      decode_error_limit: DEFAULT_DECODE_ERROR_LIMIT,
    }
  }
}

impl SchedulerConfig {
  pub fn interval(&self) -> Duration {
    let fps = self.target_fps.min(MAX_TARGET_FPS) as f64;
    Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX)
  }
}

/// 间隔节流：记录上一次放行的时刻
#[derive(Debug)]
pub struct Throttle {
  interval: Duration,
  last_run: Mutex<Option<Instant>>,
}

impl Throttle {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      last_run: Mutex::new(None),
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// 间隔已到时记录 `now` 并放行；判断与更新在同一把锁内完成
  pub fn try_acquire(&self, now: Instant) -> bool {
    let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
    match *last_run {
      Some(prev) if now.saturating_duration_since(prev) < self.interval => false,
      _ => {
        *last_run = Some(now);
        true
      }
    }
  }
}

/// 单飞标志：同一时刻最多一个持有者
#[derive(Debug, Default)]
pub struct SingleFlight {
  busy: AtomicBool,
}

/// 持有期间标志为忙，离开作用域（包括出错或 panic）时自动清除
#[derive(Debug)]
pub struct FlightGuard<'a> {
  busy: &'a AtomicBool,
}

impl SingleFlight {
  pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
    self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| FlightGuard { busy: &self.busy })
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }
}

impl Drop for FlightGuard<'_> {
  fn drop(&mut self) {
    self.busy.store(false, Ordering::Release);
  }
}

/// 一次 tick 的结果
#[derive(Debug)]
pub enum TickOutcome {
  /// 距上次推理不足一个间隔，帧被丢弃
  Throttled,
  /// 已有推理在进行，帧被丢弃
  Busy,
  NoDetection,
  Detected(Detection),
  /// 本次推理失败，按无检测处理
  Failed {
    error: PipelineError,
    /// 连续解码失败已达上限，多半是模型与标签表不匹配
    persistent: bool,
  },
}

impl TickOutcome {
  pub fn detection(&self) -> Option<&Detection> {
    match self {
      TickOutcome::Detected(detection) => Some(detection),
      _ => None,
    }
  }

  /// 是否真正执行了推理
  pub fn ran(&self) -> bool {
    !matches!(self, TickOutcome::Throttled | TickOutcome::Busy)
  }
}

pub struct Scheduler<E> {
  pipeline: Pipeline<E>,
  throttle: Throttle,
  flight: SingleFlight,
  decode_error_limit: u32,
  decode_failures: AtomicU32,
  runs: AtomicU64,
}

impl<E: ModelExecutor> Scheduler<E> {
  pub fn new(pipeline: Pipeline<E>, config: &SchedulerConfig) -> Self {
    Self {
      pipeline,
      throttle: Throttle::new(config.interval()),
      flight: SingleFlight::default(),
      decode_error_limit: config.decode_error_limit.max(1),
      decode_failures: AtomicU32::new(0),
      runs: AtomicU64::new(0),
    }
  }

  pub fn pipeline(&self) -> &Pipeline<E> {
    &self.pipeline
  }

  pub fn is_busy(&self) -> bool {
    self.flight.is_busy()
  }

  /// 已执行的推理次数
  pub fn runs(&self) -> u64 {
    self.runs.load(Ordering::Relaxed)
  }

  /// 每一帧调用一次，按需运行推理；任何错误都不会向外传播
  pub fn tick(&self, frame: Frame) -> TickOutcome {
    let index = frame.index();
    let Some(_guard) = self.flight.try_begin() else {
      trace!("帧 {} 丢弃: 推理进行中", index);
      return TickOutcome::Busy;
    };
    if !self.throttle.try_acquire(frame.captured_at()) {
      trace!("帧 {} 丢弃: 未到推理间隔", index);
      return TickOutcome::Throttled;
    }

    self.runs.fetch_add(1, Ordering::Relaxed);
    match self.pipeline.run(frame) {
      Ok(detection) => {
        self.decode_failures.store(0, Ordering::Relaxed);
        match detection {
          Some(detection) => TickOutcome::Detected(detection),
          None => TickOutcome::NoDetection,
        }
      }
      Err(error) => {
        let persistent = self.record_failure(index, &error);
        TickOutcome::Failed { error, persistent }
      }
    }
  }

  fn record_failure(&self, index: u64, error: &PipelineError) -> bool {
    match error {
      PipelineError::Decode(_) => {
        let streak = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if streak == self.decode_error_limit {
          error!(
            "连续 {} 次解码失败, 模型输出与配置可能不匹配: {}",
            streak, error
          );
        } else {
          warn!("帧 {} 解码失败: {}", index, error);
        }
        streak >= self.decode_error_limit
      }
      _ => {
        warn!("帧 {} 推理失败: {}", index, error);
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc, Barrier,
      atomic::{AtomicUsize, Ordering},
    },
    thread,
  };

  use image::RgbImage;

  use super::*;
  use crate::{
    decode::{Decoder, DecoderConfig},
    frame::Tensor,
    labels::LabelTable,
    model::ExecutorError,
    preprocess::{Preprocessor, TensorLayout},
  };

  /// 输出固定张量，可选择在推理中等待栅栏
  struct StubExecutor {
    calls: AtomicUsize,
    output: Vec<f32>,
    gate: Option<Arc<Barrier>>,
    fail: bool,
  }

  impl StubExecutor {
    fn new(output: Vec<f32>) -> Self {
      Self {
        calls: AtomicUsize::new(0),
        output,
        gate: None,
        fail: false,
      }
    }
  }

  impl ModelExecutor for StubExecutor {
    fn run(&self, _input: &Tensor) -> Result<Tensor, ExecutorError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.gate {
        // 第一次等待：通知测试推理已开始；第二次等待：测试放行
        gate.wait();
        gate.wait();
      }
      if self.fail {
        return Err(ExecutorError::Inference("simulated".into()));
      }
      Ok(Tensor::from(self.output.clone()))
    }
  }

  fn scheduler(executor: StubExecutor, target_fps: f32) -> Scheduler<StubExecutor> {
    let decoder = Decoder::new(DecoderConfig {
      num_classes: 1,
      num_anchors: 1,
      input_size: 2,
      confidence_threshold: 0.5,
      ..DecoderConfig::default()
    })
    .unwrap();
    let pipeline = Pipeline::new(
      Preprocessor::new(2, TensorLayout::Nchw).unwrap(),
      executor,
      decoder,
      LabelTable::new(vec!["Renard".into()]),
    );
    Scheduler::new(
      pipeline,
      &SchedulerConfig {
        target_fps,
        decode_error_limit: 3,
      },
    )
  }

  fn frame(index: u64, at: Instant) -> Frame {
    Frame::new(RgbImage::new(2, 2), index, at)
  }

  #[test]
  fn throttle_admits_once_per_interval() {
    let throttle = Throttle::new(Duration::from_millis(100));
    let t0 = Instant::now();
    assert!(throttle.try_acquire(t0));
    assert!(!throttle.try_acquire(t0 + Duration::from_millis(99)));
    assert!(throttle.try_acquire(t0 + Duration::from_millis(100)));
    // 早于上次时刻的帧同样被拒绝
    assert!(!throttle.try_acquire(t0));
  }

  #[test]
  fn guard_clears_flag_on_drop() {
    let flight = SingleFlight::default();
    let guard = flight.try_begin().unwrap();
    assert!(flight.is_busy());
    assert!(flight.try_begin().is_none());
    drop(guard);
    assert!(!flight.is_busy());
    assert!(flight.try_begin().is_some());
  }

  #[test]
  fn frames_inside_interval_are_dropped() {
    let scheduler = scheduler(StubExecutor::new(vec![0.5, 0.5, 0.1, 0.1, 0.9]), 2.0);
    let t0 = Instant::now();

    let first = scheduler.tick(frame(0, t0));
    assert_eq!(first.detection().unwrap().label, "Renard");
    for i in 1..15 {
      let at = t0 + Duration::from_millis(33 * i);
      assert!(matches!(scheduler.tick(frame(i, at)), TickOutcome::Throttled));
    }
    assert!(scheduler.tick(frame(15, t0 + Duration::from_millis(500))).ran());
    assert_eq!(scheduler.runs(), 2);
  }

  #[test]
  fn ticks_during_slow_inference_are_dropped() {
    let gate = Arc::new(Barrier::new(2));
    let mut executor = StubExecutor::new(vec![0.5, 0.5, 0.1, 0.1, 0.9]);
    executor.gate = Some(gate.clone());
    let scheduler = Arc::new(scheduler(executor, 60.0));
    let t0 = Instant::now();

    let worker = {
      let scheduler = scheduler.clone();
      thread::spawn(move || scheduler.tick(frame(0, t0)))
    };

    gate.wait();
    assert!(scheduler.is_busy());
    for i in 1..=50 {
      let at = t0 + Duration::from_secs(i);
      assert!(matches!(scheduler.tick(frame(i, at)), TickOutcome::Busy));
    }
    gate.wait();

    let outcome = worker.join().unwrap();
    assert!(outcome.detection().is_some());
    assert_eq!(scheduler.pipeline().executor().calls.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.runs(), 1);
    assert!(!scheduler.is_busy());
  }

  #[test]
  fn executor_failure_clears_busy_flag() {
    let mut executor = StubExecutor::new(vec![]);
    executor.fail = true;
    let scheduler = scheduler(executor, 10.0);
    let t0 = Instant::now();

    let outcome = scheduler.tick(frame(0, t0));
    assert!(matches!(
      outcome,
      TickOutcome::Failed {
        error: PipelineError::Executor(_),
        persistent: false
      }
    ));
    assert!(!scheduler.is_busy());
    assert!(scheduler.tick(frame(1, t0 + Duration::from_secs(1))).ran());
  }

  #[test]
  fn repeated_decode_failures_become_persistent() {
    let scheduler = scheduler(StubExecutor::new(vec![0.9; 7]), 10.0);
    let t0 = Instant::now();

    let persistent: Vec<bool> = (0..4)
      .map(|i| match scheduler.tick(frame(i, t0 + Duration::from_secs(i))) {
        TickOutcome::Failed { persistent, .. } => persistent,
        other => panic!("unexpected outcome: {other:?}"),
      })
      .collect();
    assert_eq!(persistent, vec![false, false, true, true]);
  }
}
