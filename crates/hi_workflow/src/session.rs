// crates/hi_workflow/src/session.rs

//! 运行会话
//!
//! 顶层事件循环：从初始条件流逐个拉取事件，先写检查点再执行，
//! 按终局分派产出与检查点生命周期，维护失败预算熔断，
//! 在事件边界响应中断请求。
//!
//! # 熔断规则
//!
//! 每次失败后检查：累计失败数大于 3 **且** 失败率超过 0.5 时
//! 停止处理后续事件（典型场景是外部引擎持续性损坏）。
//!
//! # 最终状态
//!
//! 会话"成功"当且仅当 `events > failures`。提前终止的事件计入
//! `events` 而不计入 `failures`——物理上预期的空事件不是失败。

use std::path::Path;

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{error, info, warn};
use uuid::Uuid;

use hi_config::RunConfig;
use hi_core::{CancelToken, GridSpec, HiError, HiResult};
use hi_io::{CheckpointManager, ParticleWriter, ResultsWriter};
use hi_obs::ParticleSink;
use hi_stages::{
    ExternalEngine, FreeStreamer, HydroEngine, InitialConditionSource, ParticleSampler,
    ProcessGenerator, ProcessHydro, ProcessSampler, ProcessStreamer, ThermalReference,
};

use crate::event::{EventDriver, EventOutcome};

/// 熔断的最低失败数
const BREAKER_MIN_FAILURES: usize = 3;

/// 熔断的失败率阈值
const BREAKER_RATIO: f64 = 0.5;

/// 会话摘要
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// 运行标识
    pub run_id: Uuid,
    /// 启动时刻 (UTC)
    pub started_at: DateTime<Utc>,
    /// 结束时刻 (UTC)
    pub finished_at: Option<DateTime<Utc>>,
    /// 已处理事件数（含提前终止与失败）
    pub events: usize,
    /// 失败事件数
    pub failures: usize,
    /// 成功产出记录的事件数
    pub completed: usize,
    /// 提前终止的事件数
    pub early_stopped: usize,
    /// 是否因中断请求而结束
    pub interrupted: bool,
}

impl SessionSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            events: 0,
            failures: 0,
            completed: 0,
            early_stopped: 0,
            interrupted: false,
        }
    }

    /// 会话是否成功: `events > failures`
    pub fn successful(&self) -> bool {
        self.events > self.failures
    }
}

/// 运行会话
///
/// 生命周期等于一次进程调用；正常结束或被中断后统一收尾。
pub struct RunSession {
    config: RunConfig,
    grid: GridSpec,
    source: Box<dyn InitialConditionSource>,
    streamer: Box<dyn FreeStreamer>,
    hydro: Box<dyn HydroEngine>,
    sampler: Box<dyn ParticleSampler>,
    results: ResultsWriter,
    particles: Option<ParticleWriter>,
    checkpoint: CheckpointManager,
    cancel: CancelToken,
    /// 私有暂存目录，会话结束时连同内容一起移除
    scratch: Option<TempDir>,
}

impl RunSession {
    /// 以显式引擎构造会话
    ///
    /// 输出流在此打开；路径不可写是启动期硬错误，不会运行任何事件。
    pub fn new(
        config: RunConfig,
        source: Box<dyn InitialConditionSource>,
        streamer: Box<dyn FreeStreamer>,
        hydro: Box<dyn HydroEngine>,
        sampler: Box<dyn ParticleSampler>,
        cancel: CancelToken,
    ) -> HiResult<Self> {
        config.validate()?;
        let grid = config.grid();

        let results = ResultsWriter::open(&config.results_path)
            .map_err(|e| HiError::io_with_source("无法打开结果流", e))?;
        let particles = match &config.particles_path {
            Some(path) => Some(
                ParticleWriter::open(path)
                    .map_err(|e| HiError::io_with_source("无法打开粒子明细流", e))?,
            ),
            None => None,
        };
        let checkpoint = CheckpointManager::new(&config.checkpoint_path);

        Ok(Self {
            config,
            grid,
            source,
            streamer,
            hydro,
            sampler,
            results,
            particles,
            checkpoint,
            cancel,
            scratch: None,
        })
    }

    /// 以子进程引擎构造会话
    ///
    /// 为全部外部阶段建立共享的私有暂存目录作为文件交换区。
    pub fn with_process_engines(config: RunConfig, cancel: CancelToken) -> HiResult<Self> {
        let scratch = tempfile::tempdir()
            .map_err(|e| HiError::io_with_source("无法创建暂存目录", e))?;
        let workdir = scratch.path().to_path_buf();
        let grid = config.grid();

        let source = Box::new(ProcessGenerator::new(
            ExternalEngine::new(&config.generator.program, &workdir),
            config.generator.args.clone(),
            grid,
            config.nevents,
        ));
        let streamer = Box::new(ProcessStreamer::new(
            ExternalEngine::new(&config.freestream.program, &workdir),
            config.freestream.args.clone(),
        ));
        let hydro = Box::new(ProcessHydro::new(
            ExternalEngine::new(&config.hydro.program, &workdir),
            config.sampler.shear,
            config.sampler.bulk,
        ));
        let thermal = ThermalReference::new(config.sampler.tswitch)
            .with_viscous(config.sampler.shear, config.sampler.bulk);
        let sampler = Box::new(ProcessSampler::new(
            ExternalEngine::new(&config.sampler_engine.program, &workdir),
            thermal,
        ));

        let mut session = Self::new(config, source, streamer, hydro, sampler, cancel)?;
        session.scratch = Some(scratch);
        Ok(session)
    }

    /// 替换初始条件源
    ///
    /// 检查点续跑用：以恢复出的单个初始条件取代生成器流。
    pub fn with_source(mut self, source: Box<dyn InitialConditionSource>) -> Self {
        self.source = source;
        self
    }

    /// 检查点路径（诊断用）
    pub fn checkpoint_path(&self) -> &Path {
        self.checkpoint.path()
    }

    /// 执行会话循环直至完成、熔断或中断
    ///
    /// 中断请求不是错误：停止启动新事件、完成收尾，并返回
    /// 截至中断时刻的摘要。
    pub fn run(mut self) -> HiResult<SessionSummary> {
        let mut summary = SessionSummary::new();
        info!(
            "会话启动: run_id={}, nevents={}, grid: step={:.4} n={} max={:.2}",
            summary.run_id, self.config.nevents, self.grid.step, self.grid.cell_count,
            self.grid.physical_max
        );

        // 最近处理的检查点事件是否要求保留文件
        let mut keep_checkpoint = false;

        loop {
            if self.cancel.is_cancelled() {
                info!("在事件边界收到中断请求, 停止启动新事件");
                summary.interrupted = true;
                break;
            }
            if summary.events >= self.config.nevents {
                break;
            }
            let ic = match self.source.next() {
                Ok(Some(ic)) => ic,
                Ok(None) => break,
                Err(e) => {
                    return Err(HiError::runtime(format!("初始条件流失败: {e}")));
                }
            };

            let event_number = summary.events + 1;

            // 事件开始前写检查点: 中途被强杀仍可续跑
            self.checkpoint
                .save(&self.config, &ic)
                .map_err(|e| HiError::runtime(format!("检查点写入失败: {e}")))?;
            keep_checkpoint = false;

            let outcome = {
                let mut driver = EventDriver::new(
                    &self.config,
                    self.grid,
                    self.streamer.as_ref(),
                    self.hydro.as_mut(),
                    self.sampler.as_mut(),
                );
                let sink = self
                    .particles
                    .as_mut()
                    .map(|w| w as &mut dyn ParticleSink);
                driver.run(&ic, sink, &self.cancel)
            };

            match outcome {
                Ok(EventOutcome::Completed(record)) => {
                    summary.events += 1;
                    summary.completed += 1;
                    self.results
                        .append(&record)
                        .map_err(|e| HiError::io_with_source("结果流写入失败", e))?;
                    if let Some(writer) = self.particles.as_mut() {
                        writer
                            .end_event()
                            .map_err(|e| HiError::io_with_source("粒子明细流写入失败", e))?;
                    }
                    self.delete_checkpoint();
                    info!(
                        "事件 {} 完成: {} 个样本, dNch/deta = {:.1}",
                        event_number, record.nsamples, record.dnch_deta
                    );
                }
                Ok(EventOutcome::EarlyStopped(reason)) => {
                    summary.events += 1;
                    summary.early_stopped += 1;
                    if let Some(writer) = self.particles.as_mut() {
                        writer
                            .write_empty_event()
                            .map_err(|e| HiError::io_with_source("粒子明细流写入失败", e))?;
                    }
                    self.delete_checkpoint();
                    info!("事件 {} 提前终止: {}", event_number, reason);
                }
                Ok(EventOutcome::Interrupted) => {
                    summary.interrupted = true;
                    keep_checkpoint = true;
                    if let Some(writer) = self.particles.as_mut() {
                        writer.discard_event();
                    }
                    info!("事件 {} 在采样中被中断, 检查点保留以供续跑", event_number);
                    break;
                }
                Err(e) => {
                    summary.events += 1;
                    summary.failures += 1;
                    keep_checkpoint = true;
                    if let Some(writer) = self.particles.as_mut() {
                        writer.discard_event();
                    }
                    error!("事件 {} 失败: {}", event_number, e);

                    if summary.failures > BREAKER_MIN_FAILURES
                        && summary.failures as f64 / summary.events as f64 > BREAKER_RATIO
                    {
                        error!(
                            "失败率熔断: {}/{} — 外部引擎疑似持续性损坏, 停止处理后续事件",
                            summary.failures, summary.events
                        );
                        break;
                    }
                }
            }
        }

        // 收尾: 刷新产出流; 干净关停时移除检查点,
        // 但失败/中断的检查点事件保留文件
        self.results
            .flush()
            .map_err(|e| HiError::io_with_source("结果流刷新失败", e))?;
        if let Some(writer) = self.particles.as_mut() {
            writer
                .flush()
                .map_err(|e| HiError::io_with_source("粒子明细流刷新失败", e))?;
        }
        if !keep_checkpoint {
            self.delete_checkpoint();
        }
        // 暂存目录随会话一起移除
        drop(self.scratch.take());

        summary.finished_at = Some(Utc::now());
        info!(
            "会话结束: {} 个事件 ({} 完成, {} 提前终止, {} 失败), 状态: {}",
            summary.events,
            summary.completed,
            summary.early_stopped,
            summary.failures,
            if summary.successful() { "成功" } else { "失败" }
        );
        Ok(summary)
    }

    fn delete_checkpoint(&self) {
        if let Err(e) = self.checkpoint.delete() {
            warn!("检查点删除失败: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;
    use hi_io::{read_event_counts, read_results};
    use hi_stages::{
        FixedYieldSampler, ParticleBatch, StageError, StageOutcome, StaticHydro, Surface,
        SurfaceCell, VecSource, ZeroFlowStreamer,
    };
    use hi_core::InitialCondition;
    use ndarray::Array2;

    fn test_config(dir: &Path, nevents: usize) -> RunConfig {
        RunConfig::new(nevents, 0.5)
            .with_grid_step(10.0)
            .with_rank_paths(dir, "0")
    }

    fn uniform_ic(grid: &GridSpec, value: f64) -> InitialCondition {
        InitialCondition::new(
            Array2::from_elem((grid.cell_count, grid.cell_count), value),
            grid.step,
        )
    }

    fn test_surface(r: f64) -> Surface {
        Surface {
            cells: vec![SurfaceCell {
                tau: 1.0,
                position: DVec2::new(r, 0.0),
                sigma: [1.0, 0.0, 0.0],
                velocity: DVec2::ZERO,
                pi: [0.0; 4],
                bulk: 0.0,
            }],
            shear: true,
            bulk: false,
        }
    }

    fn completed_pass() -> [Result<StageOutcome<Surface>, String>; 2] {
        [
            Ok(StageOutcome::Complete(test_surface(5.0))),
            Ok(StageOutcome::Complete(test_surface(5.0))),
        ]
    }

    fn build_session(
        config: &RunConfig,
        ics: Vec<InitialCondition>,
        hydro: StaticHydro,
        sampler: impl ParticleSampler + 'static,
    ) -> RunSession {
        RunSession::new(
            config.clone(),
            Box::new(VecSource::new(ics)),
            Box::new(ZeroFlowStreamer),
            Box::new(hydro),
            Box::new(sampler),
            CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_completed_event_appends_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1);
        let grid = config.grid();
        let ic = uniform_ic(&grid, 1.0);
        let expected_entropy = ic.total_entropy();

        let session = build_session(
            &config,
            vec![ic],
            StaticHydro::new(completed_pass()),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(20_000)),
        );
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failures, 0);
        assert!(summary.successful());
        assert!(summary.finished_at.is_some());

        let records = read_results(&config.results_path).unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].initial_entropy - expected_entropy).abs() < 1e-12);
        // 成功事件的检查点被删除
        assert!(!config.checkpoint_path.exists());
    }

    #[test]
    fn test_zero_ic_event_early_stops_whole_run() {
        // 全零初始条件 -> 粗遍即为空冻结面 -> 恰好一次提前终止,
        // 结果流零条记录; 按 n > nfail 规则会话状态为成功
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1);
        let grid = config.grid();

        let session = build_session(
            &config,
            vec![uniform_ic(&grid, 0.0)],
            StaticHydro::new([Ok(StageOutcome::EarlyStop(
                hi_stages::EarlyStop::EmptySurface,
            ))]),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(1)),
        );
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 1);
        assert_eq!(summary.early_stopped, 1);
        assert_eq!(summary.failures, 0);
        assert!(summary.successful());

        let records = read_results(&config.results_path).unwrap();
        assert!(records.is_empty());
        assert!(!config.checkpoint_path.exists());
    }

    #[test]
    fn test_early_stop_writes_particle_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1).with_particle_output(true);
        let grid = config.grid();

        let session = build_session(
            &config,
            vec![uniform_ic(&grid, 0.0)],
            StaticHydro::new([Ok(StageOutcome::EarlyStop(
                hi_stages::EarlyStop::EmptySurface,
            ))]),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(1)),
        );
        session.run().unwrap();

        let counts = read_event_counts(config.particles_path.as_ref().unwrap()).unwrap();
        assert_eq!(counts, vec![0]);
    }

    #[test]
    fn test_failed_event_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1);
        let grid = config.grid();

        let session = build_session(
            &config,
            vec![uniform_ic(&grid, 1.0)],
            StaticHydro::new([Err("engine blew up".to_string())]),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(1)),
        );
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 1);
        assert_eq!(summary.failures, 1);
        assert!(!summary.successful());
        // 失败事件的检查点保留, 供诊断与重试
        assert!(config.checkpoint_path.exists());
    }

    #[test]
    fn test_circuit_breaker_stops_run() {
        // 序列 [F, F, F, S, F]: 第 3 次失败后 nfail=3 不触发,
        // 第 5 个事件失败后 nfail=4 > 3 且 4/5 > 0.5 -> 熔断,
        // 事件 6、7 不再处理
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 7);
        let grid = config.grid();
        let ics = (0..7).map(|_| uniform_ic(&grid, 1.0)).collect();

        let mut script: Vec<Result<StageOutcome<Surface>, String>> = vec![
            Err("f1".into()),
            Err("f2".into()),
            Err("f3".into()),
        ];
        script.extend(completed_pass());
        script.push(Err("f5".into()));
        // 事件 6/7 若被处理将耗尽脚本并失败, 下方断言排除该情况

        let session = build_session(
            &config,
            ics,
            StaticHydro::new(script),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(20_000)),
        );
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 5);
        assert_eq!(summary.failures, 4);
        assert_eq!(summary.completed, 1);
        // n > nfail: 唯一的成功事件使会话整体仍为成功
        assert!(summary.successful());
        assert_eq!(read_results(&config.results_path).unwrap().len(), 1);
    }

    #[test]
    fn test_three_failures_do_not_trip_breaker() {
        // nfail 必须大于 3 才可能熔断
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 4);
        let grid = config.grid();
        let ics = (0..4).map(|_| uniform_ic(&grid, 1.0)).collect();

        let mut script: Vec<Result<StageOutcome<Surface>, String>> = vec![
            Err("f1".into()),
            Err("f2".into()),
            Err("f3".into()),
        ];
        script.extend(completed_pass());

        let session = build_session(
            &config,
            ics,
            StaticHydro::new(script),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(20_000)),
        );
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 4);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.completed, 1);
    }

    #[test]
    fn test_pre_cancelled_session_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 3);
        let grid = config.grid();

        let cancel = CancelToken::new();
        cancel.cancel();
        let session = RunSession::new(
            config.clone(),
            Box::new(VecSource::new(vec![uniform_ic(&grid, 1.0)])),
            Box::new(ZeroFlowStreamer),
            Box::new(StaticHydro::new([])),
            Box::new(FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(1))),
            cancel,
        )
        .unwrap();
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 0);
        assert!(summary.interrupted);
        // 没有任何事件完成: 状态为失败
        assert!(!summary.successful());
    }

    /// 首次采样后触发取消的采样器
    struct CancellingSampler {
        inner: FixedYieldSampler,
        cancel: CancelToken,
    }

    impl ParticleSampler for CancellingSampler {
        fn begin_event(&mut self, surface: &Surface) -> Result<(), StageError> {
            self.inner.begin_event(surface)
        }

        fn sample(&mut self) -> Result<ParticleBatch, StageError> {
            self.cancel.cancel();
            self.inner.sample()
        }
    }

    #[test]
    fn test_interrupt_mid_sampling_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1);
        let grid = config.grid();

        let cancel = CancelToken::new();
        let sampler = CancellingSampler {
            inner: FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(1)),
            cancel: cancel.clone(),
        };
        let session = RunSession::new(
            config.clone(),
            Box::new(VecSource::new(vec![uniform_ic(&grid, 1.0)])),
            Box::new(ZeroFlowStreamer),
            Box::new(StaticHydro::new(completed_pass())),
            Box::new(sampler),
            cancel,
        )
        .unwrap();
        let summary = session.run().unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.completed, 0);
        // 被中断的事件不产出记录, 检查点保留以供续跑
        assert!(read_results(&config.results_path).unwrap().is_empty());
        assert!(config.checkpoint_path.exists());
    }

    #[test]
    fn test_checkpoint_resume_single_event() {
        // 从检查点恢复: VecSource 单事件 + nevents 原值,
        // 源耗尽后会话自然结束
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 10);
        let grid = config.grid();
        let ic = uniform_ic(&grid, 1.0);

        let session = build_session(
            &config,
            vec![ic],
            StaticHydro::new(completed_pass()),
            FixedYieldSampler::repeating(FixedYieldSampler::uniform_batch(20_000)),
        );
        let summary = session.run().unwrap();

        assert_eq!(summary.events, 1);
        assert_eq!(summary.completed, 1);
        assert!(summary.successful());
    }
}
