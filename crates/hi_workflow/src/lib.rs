// crates/hi_workflow/src/lib.rs

//! HIonFlow Workflow Layer
//!
//! 工作流层，提供事件级状态机与运行级会话循环。
//!
//! # 模块概览
//!
//! - [`event`]: 单事件驱动器（两遍网格定界、阶段排序、结局折算）
//! - [`session`]: 会话循环（事件迭代、熔断、检查点生命周期、
//!   中断处理、产出流管理）
//!
//! # 示例
//!
//! ```rust,ignore
//! use hi_workflow::{RunSession, SessionSummary};
//!
//! let session = RunSession::with_process_engines(config, cancel)?;
//! let summary = session.run()?;
//! std::process::exit(if summary.successful() { 0 } else { 1 });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event;
pub mod session;

// 重导出核心类型
pub use event::{EventDriver, EventError, EventOutcome, EventPhase};
pub use session::{RunSession, SessionSummary};
