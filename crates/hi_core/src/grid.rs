// crates/hi_core/src/grid.rs

//! 计算网格规格
//!
//! 由核子宽度（或显式步长）推导整场模拟使用的离散化参数。
//! 规格在进程启动时计算一次，之后所有事件只读共享。
//!
//! # 不变量
//!
//! - `physical_max >= TARGET_HALF_EXTENT` 恒成立
//! - `cell_count` 是满足 `step * cell_count >= 2 * TARGET_HALF_EXTENT`
//!   的最小单元数
//!
//! # 使用示例
//!
//! ```
//! use hi_core::grid::GridSpec;
//!
//! let grid = GridSpec::from_nucleon_width(0.5);
//! assert!(grid.physical_max >= 15.0);
//! ```

use serde::{Deserialize, Serialize};

/// 网格目标半宽 [fm]
///
/// 初始条件生成器与精细流体网格共用的目标物理范围。
pub const TARGET_HALF_EXTENT: f64 = 15.0;

/// 由核子宽度推导步长的比例系数
const STEP_PER_NUCLEON_WIDTH: f64 = 0.15;

/// 网格规格
///
/// `{步长, 单元数, 物理半宽}` 三元组。构造后不可变。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// 网格步长 [fm]
    pub step: f64,
    /// 每个方向的单元数
    pub cell_count: usize,
    /// 实际物理半宽 [fm]，总不小于目标半宽
    pub physical_max: f64,
}

impl GridSpec {
    /// 从核子宽度推导规格
    ///
    /// 步长取 `0.15 * w`，保证初始条件相对核子尺度有足够分辨率。
    pub fn from_nucleon_width(w: f64) -> Self {
        Self::from_step(STEP_PER_NUCLEON_WIDTH * w)
    }

    /// 从显式步长构造规格
    ///
    /// `cell_count = ceil(2 * TARGET_HALF_EXTENT / step)`，
    /// `physical_max = 0.5 * cell_count * step`。
    pub fn from_step(step: f64) -> Self {
        let cell_count = (2.0 * TARGET_HALF_EXTENT / step).ceil() as usize;
        Self {
            step,
            cell_count,
            physical_max: 0.5 * cell_count as f64 * step,
        }
    }
}
