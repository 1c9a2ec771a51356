// crates/hi_obs/src/record.rs

//! 事件记录
//!
//! 每个成功事件产出一条固定模式记录：标量观测量、按物种数组、
//! pT 涨落和流谐波累积和。记录每事件新建一份，填充后恰好
//! 终结一次，再以固定长度的小端序二进制写入结果流。
//!
//! # 布局 (240 bytes)
//!
//! ```text
//! [initial_entropy: f64]
//! [nsamples: u64]
//! [dNch_deta: f64]
//! [dET_deta: f64]
//! [dN_dy: 3 * f64]
//! [mean_pT: 3 * f64]
//! [pT_fluct: N u64, sum_pT f64, sum_pTsq f64]
//! [flow: N u64, Q1..Q8 各 (re f64, im f64)]
//! ```
//!
//! pT 涨落与流累积和**不做**样本数除法——它们以原始和加计数的
//! 形式保存，供下游跨多事件正确组合比值与累积量。

use std::io::{Read, Write};

use num_complex::Complex64;

use hi_core::species::IDENTIFIED;

/// 鉴别谱物种数
pub const N_SPECIES: usize = IDENTIFIED.len();

/// 流谐波阶数 (n = 1..=8)
pub const N_HARMONICS: usize = 8;

/// 单条记录的固定字节数
pub const RECORD_BYTES: usize = 8 + 8 + 8 + 8
    + N_SPECIES * 8 * 2
    + (8 + 8 + 8)
    + (8 + N_HARMONICS * 16);

/// pT 涨落累积和
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PtFluctSums {
    /// 入选粒子数
    pub n: u64,
    /// pT 之和
    pub sum_pt: f64,
    /// pT^2 之和
    pub sum_ptsq: f64,
}

/// 流谐波累积和
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSums {
    /// 入选粒子数
    pub n: u64,
    /// 复数累积和 Q_n = sum(exp(i*n*phi)), n = 1..=8
    pub qn: [Complex64; N_HARMONICS],
}

impl Default for FlowSums {
    fn default() -> Self {
        Self {
            n: 0,
            qn: [Complex64::new(0.0, 0.0); N_HARMONICS],
        }
    }
}

/// 事件记录
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// 初始熵（初始条件的网格积分）
    pub initial_entropy: f64,
    /// 折叠的样本数
    pub nsamples: u64,
    /// 带电粒子赝快度密度 dNch/deta, |eta| < 0.5
    pub dnch_deta: f64,
    /// 横能量密度 dET/deta, |eta| < 0.6
    pub det_deta: f64,
    /// 按物种快度密度 dN/dy, |y| < 0.5
    pub dn_dy: [f64; N_SPECIES],
    /// 按物种平均横动量
    pub mean_pt: [f64; N_SPECIES],
    /// pT 涨落累积和
    pub pt_fluct: PtFluctSums,
    /// 流谐波累积和
    pub flow: FlowSums,
}

impl EventRecord {
    /// 创建空记录
    pub fn new(initial_entropy: f64) -> Self {
        Self {
            initial_entropy,
            nsamples: 0,
            dnch_deta: 0.0,
            det_deta: 0.0,
            dn_dy: [0.0; N_SPECIES],
            mean_pt: [0.0; N_SPECIES],
            pt_fluct: PtFluctSums::default(),
            flow: FlowSums::default(),
        }
    }

    /// 以固定布局写入
    pub fn write_to(&self, writer: &mut impl Write) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(RECORD_BYTES);
        buf.extend_from_slice(&self.initial_entropy.to_le_bytes());
        buf.extend_from_slice(&self.nsamples.to_le_bytes());
        buf.extend_from_slice(&self.dnch_deta.to_le_bytes());
        buf.extend_from_slice(&self.det_deta.to_le_bytes());
        for v in self.dn_dy {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.mean_pt {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&self.pt_fluct.n.to_le_bytes());
        buf.extend_from_slice(&self.pt_fluct.sum_pt.to_le_bytes());
        buf.extend_from_slice(&self.pt_fluct.sum_ptsq.to_le_bytes());
        buf.extend_from_slice(&self.flow.n.to_le_bytes());
        for q in self.flow.qn {
            buf.extend_from_slice(&q.re.to_le_bytes());
            buf.extend_from_slice(&q.im.to_le_bytes());
        }
        debug_assert_eq!(buf.len(), RECORD_BYTES);
        writer.write_all(&buf)
    }

    /// 以固定布局读回
    pub fn read_from(reader: &mut impl Read) -> std::io::Result<Self> {
        let mut buf = [0u8; RECORD_BYTES];
        reader.read_exact(&mut buf)?;
        let mut offset = 0;

        let read_f64 = |offset: &mut usize| {
            let v = f64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap());
            *offset += 8;
            v
        };
        let initial_entropy = read_f64(&mut offset);
        let nsamples = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let dnch_deta = read_f64(&mut offset);
        let det_deta = read_f64(&mut offset);

        let mut dn_dy = [0.0; N_SPECIES];
        for v in dn_dy.iter_mut() {
            *v = read_f64(&mut offset);
        }
        let mut mean_pt = [0.0; N_SPECIES];
        for v in mean_pt.iter_mut() {
            *v = read_f64(&mut offset);
        }

        let pt_n = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let sum_pt = read_f64(&mut offset);
        let sum_ptsq = read_f64(&mut offset);

        let flow_n = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let mut qn = [Complex64::new(0.0, 0.0); N_HARMONICS];
        for q in qn.iter_mut() {
            let re = read_f64(&mut offset);
            let im = read_f64(&mut offset);
            *q = Complex64::new(re, im);
        }

        Ok(Self {
            initial_entropy,
            nsamples,
            dnch_deta,
            det_deta,
            dn_dy,
            mean_pt,
            pt_fluct: PtFluctSums {
                n: pt_n,
                sum_pt,
                sum_ptsq,
            },
            flow: FlowSums { n: flow_n, qn },
        })
    }
}

/// 带符号 PDG 编号到鉴别谱物种下标
pub fn species_index(id: i32) -> Option<usize> {
    IDENTIFIED.iter().position(|(pdg, _)| *pdg == id.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_bytes() {
        assert_eq!(RECORD_BYTES, 240);
    }

    #[test]
    fn test_binary_roundtrip() {
        let mut record = EventRecord::new(42.5);
        record.nsamples = 12;
        record.dnch_deta = 601.3;
        record.det_deta = 700.1;
        record.dn_dy = [212.0, 31.5, 17.25];
        record.mean_pt = [0.45, 0.68, 0.89];
        record.pt_fluct = PtFluctSums {
            n: 5000,
            sum_pt: 2750.0,
            sum_ptsq: 1600.5,
        };
        record.flow.n = 6000;
        record.flow.qn[1] = Complex64::new(120.0, -40.0);

        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), RECORD_BYTES);

        let back = EventRecord::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_species_index() {
        assert_eq!(species_index(211), Some(0));
        assert_eq!(species_index(-321), Some(1));
        assert_eq!(species_index(2212), Some(2));
        assert_eq!(species_index(22), None);
    }
}
