// crates/hi_core/src/cancel.rs

//! 协作式取消令牌
//!
//! 外部终止请求（如 SIGTERM）被映射为一次性置位的标志，
//! 仅在定义好的挂起点（事件之间、完整样本之间）被轮询。
//! 置位后再次收到信号不产生额外效果，保证清理阶段不被打断。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 取消令牌
///
/// 可克隆的共享标志。置位是单向的，不提供复位操作。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// 创建未置位的令牌
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// 是否已请求取消
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
