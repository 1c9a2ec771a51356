// crates/hi_stages/src/outcome.rs

//! 阶段结果分类
//!
//! 阶段操作的返回类型是 `Result<StageOutcome<T>, StageError>`：
//!
//! - `Ok(Complete(t))` — 阶段正常产出
//! - `Ok(EarlyStop(reason))` — 预期的非致命终止（如边缘碰撞从未达到
//!   相变温度，冻结面为空），事件不产出记录，也不计入失败预算
//! - `Err(StageError)` — 该事件的硬失败，计入失败预算
//!
//! 提前终止绝不以错误通道表达，调用方以模式匹配区分三种结局。

use std::path::PathBuf;
use thiserror::Error;

/// 阶段成功结局
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// 阶段正常完成并产出
    Complete(T),
    /// 预期的提前终止
    EarlyStop(EarlyStop),
}

impl<T> StageOutcome<T> {
    /// 是否为提前终止
    pub fn is_early_stop(&self) -> bool {
        matches!(self, Self::EarlyStop(_))
    }

    /// 对产出应用映射，提前终止原样传递
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            Self::Complete(t) => StageOutcome::Complete(f(t)),
            Self::EarlyStop(reason) => StageOutcome::EarlyStop(reason),
        }
    }
}

/// 提前终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStop {
    /// 冻结面为空
    EmptySurface,
    /// 采样循环从未产出任何粒子
    NoParticles,
}

impl std::fmt::Display for EarlyStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySurface => write!(f, "empty surface"),
            Self::NoParticles => write!(f, "no particles sampled"),
        }
    }
}

/// 阶段失败
///
/// 外部引擎的非零退出码或不符合契约的输出。附带引擎诊断输出，
/// 便于在运行日志中完整呈现。
#[derive(Debug, Error)]
pub enum StageError {
    /// 引擎以非零状态退出
    #[error("引擎退出异常: {program} (exit {status})\n{stderr}")]
    EngineExit {
        /// 程序名
        program: String,
        /// 退出码
        status: i32,
        /// 捕获的标准错误尾部
        stderr: String,
    },

    /// 引擎被信号终止
    #[error("引擎被信号终止: {program}")]
    EngineKilled {
        /// 程序名
        program: String,
    },

    /// 引擎输出不符合契约
    #[error("输出格式错误: {path}: {reason}")]
    MalformedOutput {
        /// 输出文件路径
        path: PathBuf,
        /// 具体原因
        reason: String,
    },

    /// IO 错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_map() {
        let done: StageOutcome<i32> = StageOutcome::Complete(2);
        assert_eq!(done.map(|v| v * 2), StageOutcome::Complete(4));

        let stop: StageOutcome<i32> = StageOutcome::EarlyStop(EarlyStop::EmptySurface);
        assert!(stop.map(|v| v * 2).is_early_stop());
    }

    #[test]
    fn test_early_stop_display() {
        assert_eq!(EarlyStop::EmptySurface.to_string(), "empty surface");
        assert_eq!(EarlyStop::NoParticles.to_string(), "no particles sampled");
    }
}
