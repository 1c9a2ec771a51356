// crates/hi_stages/src/sampler.rs

//! 粒子采样器
//!
//! 对固定冻结面反复抽取独立的粒子实现（oversampling），
//! 以降低观测量的统计噪声。每次调用产出一个批次；
//! 空批次是合法返回，由累积器决定如何处理。

use std::collections::VecDeque;

use crate::outcome::StageError;
use crate::runner::ExternalEngine;
use crate::surface::Surface;

/// 粒子输出的固定列宽: id + 位置 4 + 动量 4
const PARTICLE_COLS: usize = 9;

/// 采样粒子
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    /// 带符号 PDG 编号
    pub id: i32,
    /// 时空位置 (t, x, y, z)
    pub position: [f64; 4],
    /// 四动量 (E, px, py, pz)
    pub momentum: [f64; 4],
}

/// 粒子批次
///
/// 一次采样调用的产物；被折叠进累积器后立即丢弃。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleBatch {
    /// 粒子列表
    pub particles: Vec<Particle>,
}

impl ParticleBatch {
    /// 批次大小
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
}

/// 热参考系
///
/// 由粒子化温度与粘性修正开关构成，传递给外部采样器。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalReference {
    /// 粒子化温度 [GeV]
    pub tswitch: f64,
    /// 是否应用剪切修正
    pub shear: bool,
    /// 是否应用体粘修正
    pub bulk: bool,
}

impl ThermalReference {
    /// 创建热参考系
    pub fn new(tswitch: f64) -> Self {
        Self {
            tswitch,
            shear: true,
            bulk: false,
        }
    }

    /// 设置粘性修正开关
    pub fn with_viscous(mut self, shear: bool, bulk: bool) -> Self {
        self.shear = shear;
        self.bulk = bulk;
        self
    }
}

/// 粒子采样器
///
/// `begin_event` 绑定一个事件的冻结面，随后 `sample` 可被调用
/// 任意多次，每次产出一个独立批次。
pub trait ParticleSampler {
    /// 绑定本事件的冻结面
    fn begin_event(&mut self, surface: &Surface) -> Result<(), StageError>;

    /// 抽取一个粒子批次
    fn sample(&mut self) -> Result<ParticleBatch, StageError>;
}

// ============================================================
// 外部采样器
// ============================================================

/// 子进程采样器
///
/// 冻结面在 `begin_event` 时写入一次，之后每次 `sample`
/// 只调用引擎并读回粒子文件。随机种子由引擎自理。
pub struct ProcessSampler {
    engine: ExternalEngine,
    thermal: ThermalReference,
}

impl ProcessSampler {
    /// 创建采样器绑定
    pub fn new(engine: ExternalEngine, thermal: ThermalReference) -> Self {
        Self { engine, thermal }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--tswitch".into(),
            self.thermal.tswitch.to_string(),
            "--output".into(),
            "particles.dat".into(),
        ];
        if self.thermal.shear {
            args.push("--shear".into());
        }
        if self.thermal.bulk {
            args.push("--bulk".into());
        }
        args
    }
}

impl ParticleSampler for ProcessSampler {
    fn begin_event(&mut self, surface: &Surface) -> Result<(), StageError> {
        let rows = surface.to_rows();
        self.engine.write_f64s("surface", rows.iter().copied())
    }

    fn sample(&mut self) -> Result<ParticleBatch, StageError> {
        self.engine.run(&self.args())?;
        let rows = self.engine.read_matrix("particles", PARTICLE_COLS)?;

        let particles = rows
            .rows()
            .into_iter()
            .map(|r| Particle {
                id: r[0].round() as i32,
                position: [r[1], r[2], r[3], r[4]],
                momentum: [r[5], r[6], r[7], r[8]],
            })
            .collect();
        Ok(ParticleBatch { particles })
    }
}

// ============================================================
// 固定产额采样器（测试用）
// ============================================================

/// 固定产额采样器
///
/// 每次交付同一模板批次；可按预置序列插入空批次。
/// 用于累积器停采规则与折叠交换律测试。
#[derive(Debug, Default)]
pub struct FixedYieldSampler {
    template: ParticleBatch,
    /// 预置批次序列（优先于模板交付）
    scripted: VecDeque<ParticleBatch>,
    /// 已收到的采样调用数
    pub calls: usize,
}

impl FixedYieldSampler {
    /// 每次交付 `template` 的采样器
    pub fn repeating(template: ParticleBatch) -> Self {
        Self {
            template,
            scripted: VecDeque::new(),
            calls: 0,
        }
    }

    /// 先按脚本序列交付，之后重复模板
    pub fn scripted(
        batches: impl IntoIterator<Item = ParticleBatch>,
        template: ParticleBatch,
    ) -> Self {
        Self {
            template,
            scripted: batches.into_iter().collect(),
            calls: 0,
        }
    }

    /// 构造 `size` 个同模板粒子的批次
    pub fn uniform_batch(size: usize) -> ParticleBatch {
        let particle = Particle {
            id: 211,
            position: [1.0, 0.0, 0.0, 0.0],
            momentum: [0.7, 0.3, 0.4, 0.2],
        };
        ParticleBatch {
            particles: vec![particle; size],
        }
    }
}

impl ParticleSampler for FixedYieldSampler {
    fn begin_event(&mut self, _surface: &Surface) -> Result<(), StageError> {
        Ok(())
    }

    fn sample(&mut self) -> Result<ParticleBatch, StageError> {
        self.calls += 1;
        Ok(self
            .scripted
            .pop_front()
            .unwrap_or_else(|| self.template.clone()))
    }
}
