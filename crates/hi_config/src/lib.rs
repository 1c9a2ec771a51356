// crates/hi_config/src/lib.rs

//! HIonFlow Config Layer
//!
//! 配置层，提供一次装配、全程只读的运行配置。
//!
//! # 设计原则
//!
//! 1. **不可变**: `RunConfig` 构造后不再修改；按 rank 的路径重写
//!    在装配阶段一次完成，而非运行中途
//! 2. **全 f64 配置**: 所有数值参数使用 f64
//! 3. **可序列化**: 整个配置随检查点一起持久化，使事件可独立重启

#![warn(missing_docs)]
#![warn(clippy::all)]

mod run_config;

pub use run_config::{rank_from_env, EngineConfig, RunConfig, SamplerConfig};
