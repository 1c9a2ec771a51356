// crates/hi_stages/src/freestream.rs

//! 自由流变换
//!
//! 在流体演化开始前，把初始条件按无相互作用传播推进到目标时间，
//! 并以按需查询的方式暴露能量密度、流速与剪切分量场。

use ndarray::Array2;

use crate::outcome::StageError;
use crate::runner::ExternalEngine;
use hi_core::{Field2, InitialCondition};

/// 自由流输出场
///
/// 流体引擎入口所需的命名场集合。仅在一次流体调用期间存活。
#[derive(Debug, Clone)]
pub struct StreamedFields {
    /// 能量密度
    pub ed: Field2,
    /// 流速分量 u1
    pub u1: Field2,
    /// 流速分量 u2
    pub u2: Field2,
    /// 剪切分量 pi11
    pub pi11: Field2,
    /// 剪切分量 pi12
    pub pi12: Field2,
    /// 剪切分量 pi22
    pub pi22: Field2,
}

impl StreamedFields {
    /// 以 (名称, 场) 对的形式遍历
    pub fn named(&self) -> [(&'static str, &Field2); 6] {
        [
            ("ed", &self.ed),
            ("u1", &self.u1),
            ("u2", &self.u2),
            ("pi11", &self.pi11),
            ("pi12", &self.pi12),
            ("pi22", &self.pi22),
        ]
    }
}

/// 自由流变换
pub trait FreeStreamer {
    /// 把初始条件推进到 `tau` 时刻
    fn stream(
        &self,
        ic: &InitialCondition,
        grid_max: f64,
        tau: f64,
    ) -> Result<StreamedFields, StageError>;
}

// ============================================================
// 外部变换
// ============================================================

/// 子进程自由流变换
pub struct ProcessStreamer {
    engine: ExternalEngine,
    extra_args: Vec<String>,
}

impl ProcessStreamer {
    /// 创建变换绑定
    pub fn new(engine: ExternalEngine, extra_args: Vec<String>) -> Self {
        Self { engine, extra_args }
    }
}

impl FreeStreamer for ProcessStreamer {
    fn stream(
        &self,
        ic: &InitialCondition,
        grid_max: f64,
        tau: f64,
    ) -> Result<StreamedFields, StageError> {
        let n = ic.field.nrows();
        self.engine.write_field("ic", &ic.field)?;

        let mut args = vec![
            "--grid-max".into(),
            grid_max.to_string(),
            "--time".into(),
            tau.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        self.engine.run(&args)?;

        Ok(StreamedFields {
            ed: self.engine.read_matrix("ed", n)?,
            u1: self.engine.read_matrix("u1", n)?,
            u2: self.engine.read_matrix("u2", n)?,
            pi11: self.engine.read_matrix("pi11", n)?,
            pi12: self.engine.read_matrix("pi12", n)?,
            pi22: self.engine.read_matrix("pi22", n)?,
        })
    }
}

// ============================================================
// 静态变换（测试用）
// ============================================================

/// 零流速变换
///
/// 能量密度取初始条件本身，流速与剪切全零。用于测试。
#[derive(Debug, Default)]
pub struct ZeroFlowStreamer;

impl FreeStreamer for ZeroFlowStreamer {
    fn stream(
        &self,
        ic: &InitialCondition,
        _grid_max: f64,
        _tau: f64,
    ) -> Result<StreamedFields, StageError> {
        let n = ic.field.nrows();
        let zeros = || Array2::zeros((n, n));
        Ok(StreamedFields {
            ed: ic.field.clone(),
            u1: zeros(),
            u2: zeros(),
            pi11: zeros(),
            pi12: zeros(),
            pi22: zeros(),
        })
    }
}
