// crates/hi_obs/src/accumulator.rs

//! 样本累积器
//!
//! 对固定冻结面反复抽取粒子批次，把每个非空批次在线折叠进
//! 运行和，直到自适应停采规则满足，再恰好终结一次。
//!
//! # 停采规则
//!
//! 累计粒子数达到 [`MIN_PARTICLES`] **且** 样本数达到
//! [`MIN_SAMPLES`] 后停止。规则之上没有显式上限：批次产额
//! 病态地低时采样会持续进行，这里接受该行为，调用方可自行
//! 加安全上限。空批次被跳过，不计入样本数。
//!
//! # 折叠窗口
//!
//! - dNch/deta: 带电, |eta| < 0.5
//! - dET/deta:  全部, |eta| < 0.6, 除以 1.2
//! - dN/dy, mean_pT: 按物种, |y| < 0.5
//! - pT 涨落: 带电, |eta| < 0.8, 0.15 < pT < 2.0
//! - 流谐波:  带电, |eta| < 0.8, 0.2 < pT < 5.0

use num_complex::Complex64;
use tracing::debug;

use crate::kinematics::Kinematics;
use crate::record::{species_index, EventRecord};
use hi_core::species::is_charged;
use hi_core::CancelToken;
use hi_stages::{ParticleBatch, ParticleSampler, StageError};

/// 最少样本数
pub const MIN_SAMPLES: u64 = 10;

/// 最少累计粒子数
pub const MIN_PARTICLES: u64 = 100_000;

/// 累积结局
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulateOutcome {
    /// 停采规则满足，记录已终结
    Finished(EventRecord),
    /// 从未折叠任何粒子
    NoParticles,
    /// 在样本边界观察到取消请求，事件被放弃
    Interrupted,
}

/// 样本累积器
///
/// 每事件新建一份；`fold` 任意多次，`finish` 恰好一次。
#[derive(Debug, Clone)]
pub struct SampleAccumulator {
    record: EventRecord,
    total_particles: u64,
}

impl SampleAccumulator {
    /// 创建空累积器
    pub fn new(initial_entropy: f64) -> Self {
        Self {
            record: EventRecord::new(initial_entropy),
            total_particles: 0,
        }
    }

    /// 累计粒子数
    pub fn total_particles(&self) -> u64 {
        self.total_particles
    }

    /// 已折叠的样本数
    pub fn samples(&self) -> u64 {
        self.record.nsamples
    }

    /// 停采规则是否尚未满足
    pub fn needs_more(&self) -> bool {
        self.total_particles < MIN_PARTICLES || self.record.nsamples < MIN_SAMPLES
    }

    /// 折叠一个批次
    ///
    /// 空批次是无操作，不计入样本数。
    pub fn fold(&mut self, batch: &ParticleBatch) {
        if batch.is_empty() {
            return;
        }
        self.record.nsamples += 1;
        self.total_particles += batch.len() as u64;

        for particle in &batch.particles {
            let kin = Kinematics::from_momentum(particle.momentum);
            let charged = is_charged(particle.id);
            let abs_eta = kin.eta.abs();

            if charged && abs_eta < 0.5 {
                self.record.dnch_deta += 1.0;
            }
            if abs_eta < 0.6 {
                self.record.det_deta += kin.mt / 1.2;
            }
            if kin.rapidity.abs() < 0.5 {
                if let Some(s) = species_index(particle.id) {
                    // dn_dy 终结前保存原始计数, mean_pt 保存 pT 原始和
                    self.record.dn_dy[s] += 1.0;
                    self.record.mean_pt[s] += kin.pt;
                }
            }
            if charged && abs_eta < 0.8 {
                if kin.pt > 0.15 && kin.pt < 2.0 {
                    self.record.pt_fluct.n += 1;
                    self.record.pt_fluct.sum_pt += kin.pt;
                    self.record.pt_fluct.sum_ptsq += kin.pt * kin.pt;
                }
                if kin.pt > 0.2 && kin.pt < 5.0 {
                    self.record.flow.n += 1;
                    for n in 1..=self.record.flow.qn.len() {
                        self.record.flow.qn[n - 1] +=
                            Complex64::from_polar(1.0, n as f64 * kin.phi);
                    }
                }
            }
        }
    }

    /// 终结累积
    ///
    /// 从未折叠任何粒子时返回 [`AccumulateOutcome::NoParticles`]。
    /// 除法恰好执行一次：dNch/deta、dET/deta、dN/dy 除以样本数；
    /// mean_pT 除以该物种自身计数（计数为零时保持 0，不产生 NaN）。
    /// pT 涨落与流累积和保持原始形式。
    pub fn finish(mut self) -> AccumulateOutcome {
        if self.record.nsamples == 0 {
            return AccumulateOutcome::NoParticles;
        }
        let nsamples = self.record.nsamples as f64;

        self.record.dnch_deta /= nsamples;
        self.record.det_deta /= nsamples;
        for s in 0..self.record.dn_dy.len() {
            let count = self.record.dn_dy[s];
            self.record.dn_dy[s] = count / nsamples;
            if count > 0.0 {
                self.record.mean_pt[s] /= count;
            }
        }
        AccumulateOutcome::Finished(self.record)
    }
}

/// 粒子明细接收端
///
/// 采样循环把每个非空批次原样交给接收端（若启用），
/// 由接收端决定持久化形式。
pub trait ParticleSink {
    /// 记录一个非空批次
    fn record_batch(&mut self, batch: &ParticleBatch) -> std::io::Result<()>;
}

/// 驱动采样循环直到停采或取消
///
/// 取消令牌只在完整样本之间被轮询；取消后事件被放弃，
/// 不产出记录。
pub fn accumulate(
    sampler: &mut dyn ParticleSampler,
    initial_entropy: f64,
    cancel: &CancelToken,
    mut sink: Option<&mut dyn ParticleSink>,
) -> Result<AccumulateOutcome, StageError> {
    let mut acc = SampleAccumulator::new(initial_entropy);
    while acc.needs_more() {
        if cancel.is_cancelled() {
            debug!("采样循环在 {} 个样本后被取消", acc.samples());
            return Ok(AccumulateOutcome::Interrupted);
        }
        let batch = sampler.sample()?;
        if !batch.is_empty() {
            if let Some(sink) = sink.as_deref_mut() {
                sink.record_batch(&batch)?;
            }
        }
        acc.fold(&batch);
    }
    debug!(
        "停采: {} 个样本, {} 个粒子",
        acc.samples(),
        acc.total_particles()
    );
    Ok(acc.finish())
}
