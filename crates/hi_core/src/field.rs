// crates/hi_core/src/field.rs

//! 二维场操作
//!
//! 提供事件网格与外部引擎输出网格之间的几何调和：
//! 居中裁剪、零填充、整数步抽取，以及场的网格积分。
//!
//! # 精确性要求
//!
//! 居中偏移必须逐单元精确。`start = floor(|diff| / 2)` 的约定
//! 与裁剪/填充双向一致，使往返操作保持中心子区域不变。

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{HiError, HiResult};
use crate::grid::GridSpec;

/// 二维数值场（行主序方阵）
pub type Field2 = Array2<f64>;

/// 初始条件
///
/// 单个事件的熵密度场及其网格步长。由外部生成器产出，产出后不可变，
/// 在被事件消费前由该事件独占（检查点持有其唯一副本）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialCondition {
    /// 熵密度场（方阵）
    pub field: Field2,
    /// 网格步长 [fm]
    pub step: f64,
}

impl InitialCondition {
    /// 创建初始条件
    pub fn new(field: Field2, step: f64) -> Self {
        Self { field, step }
    }

    /// 校验场形状与网格规格一致
    ///
    /// 形状不匹配是该事件的硬错误，不做静默调整。
    pub fn validate_shape(&self, grid: &GridSpec) -> HiResult<()> {
        HiError::check_size("initial_condition.rows", grid.cell_count, self.field.nrows())?;
        HiError::check_size("initial_condition.cols", grid.cell_count, self.field.ncols())?;
        Ok(())
    }

    /// 网格积分总熵: `sum(field) * step^2`
    pub fn total_entropy(&self) -> f64 {
        integrate(&self.field, self.step)
    }
}

/// 将方形场调整到目标尺寸
///
/// - 源大于目标：裁剪居中的目标尺寸方块，`start = (src - target) / 2`
/// - 源小于目标：分配零填充的目标场，将源居中粘贴
/// - 尺寸相等：原样克隆
pub fn resize_centered(src: &Field2, target_n: usize) -> Field2 {
    let src_n = src.nrows();
    if src_n == target_n {
        return src.clone();
    }
    if src_n > target_n {
        let start = (src_n - target_n) / 2;
        src.slice(s![start..start + target_n, start..start + target_n])
            .to_owned()
    } else {
        let start = (target_n - src_n) / 2;
        let mut out = Array2::zeros((target_n, target_n));
        out.slice_mut(s![start..start + src_n, start..start + src_n])
            .assign(src);
        out
    }
}

/// 以整数步长抽取场（粗化）
///
/// 等价于 `src[::stride, ::stride]`。`stride = 1` 时原样克隆。
pub fn decimate(src: &Field2, stride: usize) -> Field2 {
    if stride <= 1 {
        return src.clone();
    }
    let step = stride as isize;
    src.slice(s![..;step, ..;step]).to_owned()
}

/// 场的网格积分: `sum(field) * step^2`
pub fn integrate(field: &Field2, step: f64) -> f64 {
    field.sum() * step * step
}
