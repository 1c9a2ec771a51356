// crates/hi_io/src/results.rs

//! 结果流与粒子明细流
//!
//! 两条输出流都由会话打开一次、顺序追加：
//!
//! - **结果流**: 固定长度的事件记录序列，无文件头。每个成功
//!   事件恰好一条；提前终止事件不产出记录。
//! - **粒子明细流**（可选）: 按事件分块，块头是粒子数 u64，
//!   之后每粒子一行 `[id i32, charge i32, pT, mT, phi, y, eta]`。
//!   提前终止事件写出显式的零计数占位块。

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use hi_core::species::charge_of;
use hi_obs::{EventRecord, Kinematics, ParticleSink, RECORD_BYTES};
use hi_stages::ParticleBatch;

/// 每粒子行字节数: id i32 + charge i32 + 5 * f64
const PARTICLE_LINE_BYTES: usize = 4 + 4 + 5 * 8;

// ============================================================
// 结果流
// ============================================================

/// 结果流写入器
///
/// 追加模式打开，已有内容（续跑场景）保持不动。
#[derive(Debug)]
pub struct ResultsWriter {
    writer: BufWriter<File>,
}

impl ResultsWriter {
    /// 打开（或创建）结果流
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// 追加一条事件记录
    pub fn append(&mut self, record: &EventRecord) -> std::io::Result<()> {
        record.write_to(&mut self.writer)
    }

    /// 刷新缓冲
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// 读回结果流中的全部记录
pub fn read_results(path: &Path) -> std::io::Result<Vec<EventRecord>> {
    let metadata = std::fs::metadata(path)?;
    let count = metadata.len() as usize / RECORD_BYTES;

    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(EventRecord::read_from(&mut reader)?);
    }
    Ok(records)
}

// ============================================================
// 粒子明细流
// ============================================================

/// 粒子明细流写入器
///
/// 事件内的批次先缓冲，事件终局确定后一次成块写出：
/// 成功事件调用 [`end_event`](Self::end_event)，提前终止事件
/// 调用 [`write_empty_event`](Self::write_empty_event)，失败或
/// 被放弃的事件调用 [`discard_event`](Self::discard_event)。
#[derive(Debug)]
pub struct ParticleWriter {
    writer: BufWriter<File>,
    pending: Vec<u8>,
    pending_count: u64,
}

impl ParticleWriter {
    /// 打开（或创建）粒子明细流
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            pending: Vec::new(),
            pending_count: 0,
        })
    }

    /// 写出当前事件的粒子块
    pub fn end_event(&mut self) -> std::io::Result<()> {
        self.writer.write_all(&self.pending_count.to_le_bytes())?;
        self.writer.write_all(&self.pending)?;
        debug!("粒子明细: 写出 {} 个粒子", self.pending_count);
        self.pending.clear();
        self.pending_count = 0;
        Ok(())
    }

    /// 写出显式的空事件占位块
    pub fn write_empty_event(&mut self) -> std::io::Result<()> {
        self.discard_event();
        self.end_event()
    }

    /// 丢弃当前事件已缓冲的粒子
    pub fn discard_event(&mut self) {
        self.pending.clear();
        self.pending_count = 0;
    }

    /// 刷新缓冲
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl ParticleSink for ParticleWriter {
    fn record_batch(&mut self, batch: &ParticleBatch) -> std::io::Result<()> {
        self.pending
            .reserve(batch.len() * PARTICLE_LINE_BYTES);
        for particle in &batch.particles {
            let kin = Kinematics::from_momentum(particle.momentum);
            self.pending.extend_from_slice(&particle.id.to_le_bytes());
            self.pending
                .extend_from_slice(&charge_of(particle.id).to_le_bytes());
            self.pending.extend_from_slice(&kin.pt.to_le_bytes());
            self.pending.extend_from_slice(&kin.mt.to_le_bytes());
            self.pending.extend_from_slice(&kin.phi.to_le_bytes());
            self.pending.extend_from_slice(&kin.rapidity.to_le_bytes());
            self.pending.extend_from_slice(&kin.eta.to_le_bytes());
        }
        self.pending_count += batch.len() as u64;
        Ok(())
    }
}

/// 读回粒子明细流中每个事件块的粒子数
pub fn read_event_counts(path: &Path) -> std::io::Result<Vec<u64>> {
    let bytes = std::fs::read(path)?;
    let mut counts = Vec::new();
    let mut offset = 0usize;
    while offset + 8 <= bytes.len() {
        let count = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8 + count as usize * PARTICLE_LINE_BYTES;
        counts.push(count);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hi_stages::Particle;

    fn record_with_entropy(s: f64) -> EventRecord {
        let mut record = EventRecord::new(s);
        record.nsamples = 10;
        record
    }

    #[test]
    fn test_results_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.results");

        let mut writer = ResultsWriter::open(&path).unwrap();
        writer.append(&record_with_entropy(1.0)).unwrap();
        writer.append(&record_with_entropy(2.0)).unwrap();
        writer.flush().unwrap();

        let records = read_results(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].initial_entropy, 1.0);
        assert_eq!(records[1].initial_entropy, 2.0);
    }

    #[test]
    fn test_results_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.results");

        {
            let mut writer = ResultsWriter::open(&path).unwrap();
            writer.append(&record_with_entropy(1.0)).unwrap();
            writer.flush().unwrap();
        }
        {
            let mut writer = ResultsWriter::open(&path).unwrap();
            writer.append(&record_with_entropy(2.0)).unwrap();
            writer.flush().unwrap();
        }

        assert_eq!(read_results(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_particle_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.particles");

        let batch = ParticleBatch {
            particles: vec![
                Particle {
                    id: 211,
                    position: [0.0; 4],
                    momentum: [0.7, 0.3, 0.4, 0.2],
                };
                3
            ],
        };

        let mut writer = ParticleWriter::open(&path).unwrap();
        writer.record_batch(&batch).unwrap();
        writer.record_batch(&batch).unwrap();
        writer.end_event().unwrap();
        // 提前终止事件: 显式空块
        writer.write_empty_event().unwrap();
        writer.flush().unwrap();

        assert_eq!(read_event_counts(&path).unwrap(), vec![6, 0]);
    }

    #[test]
    fn test_discard_event_drops_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.particles");

        let batch = ParticleBatch {
            particles: vec![Particle {
                id: 211,
                position: [0.0; 4],
                momentum: [0.7, 0.3, 0.4, 0.2],
            }],
        };

        let mut writer = ParticleWriter::open(&path).unwrap();
        writer.record_batch(&batch).unwrap();
        writer.discard_event();
        writer.end_event().unwrap();
        writer.flush().unwrap();

        assert_eq!(read_event_counts(&path).unwrap(), vec![0]);
    }
}
