// crates/hi_workflow/src/event.rs

//! 单事件驱动器
//!
//! 把一个初始条件按阶段顺序推进到终局：
//!
//! ```text
//! Init -> Stream -> CoarseHydro -> RefinedHydro -> Sampling
//! ```
//!
//! 终局三分：`Completed`（产出记录）、`EarlyStopped`（预期的
//! 物理性空结局）、`Err(EventError)`（硬失败，计入失败预算）。
//! 中断只在样本边界被观察到，表现为 `Interrupted`。
//!
//! # 两遍网格定界
//!
//! 精细流体网格的物理范围事先未知。先以固定 27 fm、三倍步长的
//! 粗网格做一次无粘演化，从粗冻结面取横向最大半径 `rmax`，
//! 再以 `rmax` 为范围做全分辨率精细演化。粗遍强制低切换温度，
//! 保证冻结面完整包络。

use thiserror::Error;
use tracing::debug;

use hi_config::RunConfig;
use hi_core::field::{decimate, resize_centered};
use hi_core::{CancelToken, GridSpec, HiError, InitialCondition};
use hi_obs::{accumulate, AccumulateOutcome, EventRecord, ParticleSink};
use hi_stages::{
    EarlyStop, FreeStreamer, HydroEngine, HydroParams, ParticleSampler, StageError, StageInput,
    StageOutcome, StreamedFields, Surface,
};

/// 粗遍物理范围 [fm]
const COARSE_EXTENT: f64 = 27.0;

/// 粗遍步长倍率
const COARSE_STRIDE: usize = 3;

/// 粗遍强制的低切换温度 [GeV]
const COARSE_TSWITCH: f64 = 0.110;

/// 时间步长与网格步长之比
///
/// 下游有限差分格式要求该比值低于 0.5，这是数值稳定性硬约束。
const DT_RATIO: f64 = 0.25;

/// 事件阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    /// 初始校验与熵积分
    Init,
    /// 自由流推进
    Stream,
    /// 粗网格流体遍
    CoarseHydro,
    /// 精细流体遍
    RefinedHydro,
    /// 采样累积
    Sampling,
}

impl std::fmt::Display for EventPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "Init",
            Self::Stream => "Stream",
            Self::CoarseHydro => "CoarseHydro",
            Self::RefinedHydro => "RefinedHydro",
            Self::Sampling => "Sampling",
        };
        write!(f, "{}", s)
    }
}

/// 事件终局
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// 成功：记录已终结
    Completed(EventRecord),
    /// 预期的提前终止，不产出记录，不计入失败
    EarlyStopped(EarlyStop),
    /// 在样本边界被取消，事件被放弃（检查点保留）
    Interrupted,
}

/// 事件失败
#[derive(Debug, Error)]
pub enum EventError {
    /// 外部阶段失败
    #[error("阶段失败: {0}")]
    Stage(#[from] StageError),

    /// 数据一致性失败（如初始条件形状不匹配）
    #[error(transparent)]
    Core(#[from] HiError),
}

/// 单事件驱动器
///
/// 借用会话的引擎，对一个初始条件执行完整阶段序列。
pub struct EventDriver<'a> {
    config: &'a RunConfig,
    grid: GridSpec,
    streamer: &'a dyn FreeStreamer,
    hydro: &'a mut dyn HydroEngine,
    sampler: &'a mut dyn ParticleSampler,
}

impl<'a> EventDriver<'a> {
    /// 创建驱动器
    pub fn new(
        config: &'a RunConfig,
        grid: GridSpec,
        streamer: &'a dyn FreeStreamer,
        hydro: &'a mut dyn HydroEngine,
        sampler: &'a mut dyn ParticleSampler,
    ) -> Self {
        Self {
            config,
            grid,
            streamer,
            hydro,
            sampler,
        }
    }

    /// 执行一个事件
    pub fn run(
        &mut self,
        ic: &InitialCondition,
        sink: Option<&mut dyn ParticleSink>,
        cancel: &CancelToken,
    ) -> Result<EventOutcome, EventError> {
        debug!("阶段 {}", EventPhase::Init);
        ic.validate_shape(&self.grid)?;
        let initial_entropy = ic.total_entropy();
        debug!("初始熵: {:.4}", initial_entropy);

        debug!("阶段 {}", EventPhase::Stream);
        let fields = self
            .streamer
            .stream(ic, self.grid.physical_max, self.config.tau_fs)?;

        debug!("阶段 {}", EventPhase::CoarseHydro);
        let coarse_args = vec![
            "--etas".into(),
            "0".into(),
            "--zetas".into(),
            "0".into(),
            "--tswitch".into(),
            COARSE_TSWITCH.to_string(),
        ];
        let coarse = match self.run_hydro(&fields, COARSE_EXTENT, COARSE_STRIDE, coarse_args)? {
            StageOutcome::Complete(surface) => surface,
            StageOutcome::EarlyStop(reason) => return Ok(EventOutcome::EarlyStopped(reason)),
        };
        let rmax = coarse.rmax();
        debug!("粗遍确定 rmax = {:.2} fm ({} 个面单元)", rmax, coarse.len());

        debug!("阶段 {}", EventPhase::RefinedHydro);
        let refined_args = self.config.hydro.args.clone();
        let surface = match self.run_hydro(&fields, rmax, 1, refined_args)? {
            StageOutcome::Complete(surface) => surface,
            StageOutcome::EarlyStop(reason) => return Ok(EventOutcome::EarlyStopped(reason)),
        };
        debug!("精细冻结面: {} 个单元", surface.len());

        debug!("阶段 {}", EventPhase::Sampling);
        self.sampler.begin_event(&surface)?;
        drop(surface);

        match accumulate(self.sampler, initial_entropy, cancel, sink)? {
            AccumulateOutcome::Finished(record) => Ok(EventOutcome::Completed(record)),
            AccumulateOutcome::NoParticles => {
                Ok(EventOutcome::EarlyStopped(EarlyStop::NoParticles))
            }
            AccumulateOutcome::Interrupted => Ok(EventOutcome::Interrupted),
        }
    }

    /// 执行一遍流体演化
    ///
    /// 输入场先按倍率抽取，再居中调整到 `2*ls+1` 方阵；
    /// 时间步长固定为步长的 [`DT_RATIO`] 倍。
    fn run_hydro(
        &mut self,
        fields: &StreamedFields,
        event_size: f64,
        stride: usize,
        args: Vec<String>,
    ) -> Result<StageOutcome<Surface>, StageError> {
        let dxy = self.grid.step * stride as f64;
        let ls = (event_size / dxy).ceil() as usize;
        let n = 2 * ls + 1;

        let mut input = StageInput::new();
        for (name, field) in fields.named() {
            let reduced = decimate(field, stride);
            input = input.with_field(name, resize_centered(&reduced, n));
        }

        let params = HydroParams {
            t0: self.config.tau_fs,
            dt: DT_RATIO * dxy,
            dxy,
            ls,
            args,
        };
        self.hydro.evolve(&input, &params)
    }
}
