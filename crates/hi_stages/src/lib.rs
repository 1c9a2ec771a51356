// crates/hi_stages/src/lib.rs

//! HIonFlow Stages Layer
//!
//! 阶段层，封装与外部模拟引擎的全部交互。
//!
//! # 模块概览
//!
//! - [`outcome`]: 阶段结果分类（完成 / 提前终止 / 阶段失败）
//! - [`runner`]: 外部引擎运行器（文件契约 + 同步子进程调用）
//! - [`generator`]: 初始条件流
//! - [`freestream`]: 自由流变换
//! - [`hydro`]: 流体引擎
//! - [`surface`]: 冻结面模型
//! - [`sampler`]: 粒子采样器
//!
//! # 设计原则
//!
//! 1. **契约即接口**: 外部引擎只通过工作目录中的平坦二进制文件
//!    和命令行参数交互，其数值方法不在本层范围内
//! 2. **显式结局**: 空冻结面是预期的物理结局，以
//!    [`StageOutcome::EarlyStop`] 表达，绝不借错误通道传播
//! 3. **可替换**: 每个阶段以 trait 抽象，测试用内存替身实现

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod freestream;
pub mod generator;
pub mod hydro;
pub mod outcome;
pub mod runner;
pub mod sampler;
pub mod surface;

// 重导出核心类型
pub use freestream::{FreeStreamer, ProcessStreamer, StreamedFields, ZeroFlowStreamer};
pub use generator::{InitialConditionSource, ProcessGenerator, VecSource};
pub use hydro::{HydroEngine, HydroParams, ProcessHydro, StageInput, StaticHydro};
pub use outcome::{EarlyStop, StageError, StageOutcome};
pub use runner::ExternalEngine;
pub use sampler::{
    FixedYieldSampler, Particle, ParticleBatch, ParticleSampler, ProcessSampler, ThermalReference,
};
pub use surface::{Surface, SurfaceCell, SURFACE_COLS};
