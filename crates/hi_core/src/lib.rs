// crates/hi_core/src/lib.rs

//! HIonFlow Core Layer
//!
//! 基础层，提供整个项目的基础抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型
//! - [`grid`]: 计算网格规格（步长、单元数、物理范围）
//! - [`field`]: 二维场操作（居中裁剪/填充、抽取、积分）
//! - [`species`]: 强子物种表与电荷判定
//! - [`cancel`]: 协作式取消令牌
//!
//! # 设计原则
//!
//! 1. **最小依赖**: 仅依赖 ndarray、serde 和 thiserror
//! 2. **只读共享**: `GridSpec` 每进程计算一次，事件间只读共享
//! 3. **精确几何**: 场尺寸调整必须逐单元精确，居中偏移错一格会污染
//!    所有下游观测量

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod field;
pub mod grid;
pub mod species;

// 重导出常用类型
pub use cancel::CancelToken;
pub use error::{HiError, HiResult};
pub use field::{Field2, InitialCondition};
pub use grid::GridSpec;
