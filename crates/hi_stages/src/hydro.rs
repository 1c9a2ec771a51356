// crates/hi_stages/src/hydro.rs

//! 流体引擎
//!
//! 以命名输入场与数值参数调用外部流体演化，产出冻结面。
//! 空冻结面是预期结局（见 [`crate::outcome`]）。

use std::collections::VecDeque;

use crate::outcome::{EarlyStop, StageError, StageOutcome};
use crate::runner::ExternalEngine;
use crate::surface::{Surface, SURFACE_COLS};
use hi_core::Field2;

/// 阶段输入
///
/// 命名二维场的集合，仅在一次引擎调用期间存活。
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    /// (名称, 场) 对
    pub fields: Vec<(&'static str, Field2)>,
}

impl StageInput {
    /// 创建空输入
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加命名场
    pub fn with_field(mut self, name: &'static str, field: Field2) -> Self {
        self.fields.push((name, field));
        self
    }
}

/// 流体调用参数
///
/// `dt / dxy` 必须保持在 0.5 以下，这是下游有限差分格式的数值
/// 稳定性硬约束，不是可调缺省值。
#[derive(Debug, Clone, PartialEq)]
pub struct HydroParams {
    /// 起始时间 [fm/c]
    pub t0: f64,
    /// 时间步长 [fm/c]
    pub dt: f64,
    /// 网格步长 [fm]
    pub dxy: f64,
    /// 半单元数（网格为 2*ls+1 方阵）
    pub ls: usize,
    /// 引擎物理参数（粘滞系数、冻结能量密度等，透传）
    pub args: Vec<String>,
}

impl HydroParams {
    /// 组装命令行参数
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--t0".into(),
            self.t0.to_string(),
            "--dt".into(),
            self.dt.to_string(),
            "--dxy".into(),
            self.dxy.to_string(),
            "--nls".into(),
            self.ls.to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }
}

/// 流体引擎
pub trait HydroEngine {
    /// 执行一次流体演化
    fn evolve(
        &mut self,
        input: &StageInput,
        params: &HydroParams,
    ) -> Result<StageOutcome<Surface>, StageError>;
}

// ============================================================
// 外部引擎
// ============================================================

/// 子进程流体引擎
pub struct ProcessHydro {
    engine: ExternalEngine,
    shear: bool,
    bulk: bool,
}

impl ProcessHydro {
    /// 创建引擎绑定
    ///
    /// `shear`/`bulk` 决定冻结面是否携带对应粘性修正。
    pub fn new(engine: ExternalEngine, shear: bool, bulk: bool) -> Self {
        Self { engine, shear, bulk }
    }
}

impl HydroEngine for ProcessHydro {
    fn evolve(
        &mut self,
        input: &StageInput,
        params: &HydroParams,
    ) -> Result<StageOutcome<Surface>, StageError> {
        for (name, field) in &input.fields {
            self.engine.write_field(name, field)?;
        }
        self.engine.run(&params.to_args())?;

        let rows = self.engine.read_matrix("surface", SURFACE_COLS)?;
        if rows.nrows() == 0 {
            return Ok(StageOutcome::EarlyStop(EarlyStop::EmptySurface));
        }
        Ok(StageOutcome::Complete(Surface::from_rows(
            &rows, self.shear, self.bulk,
        )?))
    }
}

// ============================================================
// 静态引擎（测试用）
// ============================================================

/// 静态流体引擎
///
/// 按预置序列交付结局（含脚本化失败），用于事件状态机与
/// 熔断逻辑测试。
#[derive(Debug, Default)]
pub struct StaticHydro {
    outcomes: VecDeque<Result<StageOutcome<Surface>, String>>,
    /// 收到的调用参数记录
    pub calls: Vec<HydroParams>,
}

impl StaticHydro {
    /// 由结局序列创建
    ///
    /// `Err(msg)` 项在对应调用上转为引擎退出错误。
    pub fn new(
        outcomes: impl IntoIterator<Item = Result<StageOutcome<Surface>, String>>,
    ) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            calls: Vec::new(),
        }
    }
}

impl HydroEngine for StaticHydro {
    fn evolve(
        &mut self,
        _input: &StageInput,
        params: &HydroParams,
    ) -> Result<StageOutcome<Surface>, StageError> {
        self.calls.push(params.clone());
        match self.outcomes.pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(stderr)) => Err(StageError::EngineExit {
                program: "static-hydro".into(),
                status: 1,
                stderr,
            }),
            None => Err(StageError::MalformedOutput {
                path: "surface.dat".into(),
                reason: "静态引擎结局序列已耗尽".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_to_args() {
        let params = HydroParams {
            t0: 0.5,
            dt: 0.05,
            dxy: 0.2,
            ls: 100,
            args: vec!["etas=0.08".into()],
        };
        let args = params.to_args();
        assert_eq!(args[0], "--t0");
        assert_eq!(args[7], "100");
        assert_eq!(args.last().unwrap(), "etas=0.08");
        // 稳定性约束
        assert!(params.dt / params.dxy < 0.5);
    }

    #[test]
    fn test_static_hydro_sequence() {
        let mut hydro = StaticHydro::new([Ok(StageOutcome::EarlyStop(EarlyStop::EmptySurface))]);
        let params = HydroParams {
            t0: 0.5,
            dt: 0.05,
            dxy: 0.2,
            ls: 10,
            args: vec![],
        };
        let outcome = hydro.evolve(&StageInput::new(), &params).unwrap();
        assert!(outcome.is_early_stop());
        assert_eq!(hydro.calls.len(), 1);

        // 序列耗尽后为硬错误
        assert!(hydro.evolve(&StageInput::new(), &params).is_err());
    }
}
