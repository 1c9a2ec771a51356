// crates/hi_stages/src/generator.rs

//! 初始条件流
//!
//! 外部生成器按请求的事件数一次性产出初始条件容器，
//! 本模块将其解析为逐事件拉取的流。
//!
//! # 容器格式
//!
//! ```text
//! [魔数: 4 bytes] "HIIC"
//! [版本: u32]
//! [事件数: u64]
//! [单元数: u64]
//! [步长: f64]
//! [场数据: count * n * n * f64]
//! ```

use std::collections::VecDeque;

use ndarray::Array2;
use tracing::info;

use crate::outcome::StageError;
use crate::runner::ExternalEngine;
use hi_core::{GridSpec, InitialCondition};

/// 容器魔数
const CONTAINER_MAGIC: &[u8; 4] = b"HIIC";

/// 支持的容器版本
const CONTAINER_VERSION: u32 = 1;

/// 初始条件源
///
/// 每次 `next` 交出一个初始条件的所有权；流耗尽后返回 `None`。
pub trait InitialConditionSource {
    /// 拉取下一个初始条件
    fn next(&mut self) -> Result<Option<InitialCondition>, StageError>;
}

// ============================================================
// 外部生成器
// ============================================================

/// 子进程生成器
///
/// 首次拉取时调用一次外部生成器产出全部事件，之后从队列交付。
pub struct ProcessGenerator {
    engine: ExternalEngine,
    extra_args: Vec<String>,
    grid: GridSpec,
    nevents: usize,
    queue: VecDeque<InitialCondition>,
    generated: bool,
}

impl ProcessGenerator {
    /// 创建生成器
    pub fn new(
        engine: ExternalEngine,
        extra_args: Vec<String>,
        grid: GridSpec,
        nevents: usize,
    ) -> Self {
        Self {
            engine,
            extra_args,
            grid,
            nevents,
            queue: VecDeque::new(),
            generated: false,
        }
    }

    fn generate(&mut self) -> Result<(), StageError> {
        let mut args = vec![
            "--number-events".into(),
            self.nevents.to_string(),
            "--grid-step".into(),
            self.grid.step.to_string(),
            "--grid-max".into(),
            self.grid.physical_max.to_string(),
            "--output".into(),
            "ic.dat".into(),
        ];
        args.extend(self.extra_args.iter().cloned());
        self.engine.run(&args)?;

        let path = self.engine.workdir().join("ic.dat");
        let bytes = std::fs::read(&path)?;
        self.queue = parse_container(&bytes).map_err(|reason| StageError::MalformedOutput {
            path,
            reason,
        })?;

        info!("生成器产出 {} 个初始条件", self.queue.len());
        Ok(())
    }
}

impl InitialConditionSource for ProcessGenerator {
    fn next(&mut self) -> Result<Option<InitialCondition>, StageError> {
        if !self.generated {
            self.generate()?;
            self.generated = true;
        }
        Ok(self.queue.pop_front())
    }
}

/// 解析初始条件容器
fn parse_container(bytes: &[u8]) -> Result<VecDeque<InitialCondition>, String> {
    let mut cursor = Cursor { bytes, offset: 0 };

    let magic = cursor.take(4)?;
    if magic != CONTAINER_MAGIC {
        return Err("无效的容器魔数".into());
    }
    let version = cursor.read_u32()?;
    if version > CONTAINER_VERSION {
        return Err(format!("不支持的容器版本 {version}"));
    }

    let count = cursor.read_u64()? as usize;
    let n = cursor.read_u64()? as usize;
    let step = cursor.read_f64()?;

    let mut queue = VecDeque::with_capacity(count);
    for _ in 0..count {
        let mut data = Vec::with_capacity(n * n);
        for _ in 0..n * n {
            data.push(cursor.read_f64()?);
        }
        let field = Array2::from_shape_vec((n, n), data)
            .map_err(|e| format!("场形状错误: {e}"))?;
        queue.push_back(InitialCondition::new(field, step));
    }

    if cursor.offset != bytes.len() {
        return Err(format!("容器尾部有 {} 个多余字节", bytes.len() - cursor.offset));
    }
    Ok(queue)
}

/// 简单字节游标
struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        if self.offset + len > self.bytes.len() {
            return Err("容器被截断".into());
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, String> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64, String> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

// ============================================================
// 内存源（测试用）
// ============================================================

/// 内存初始条件源
///
/// 直接从预置队列交付，用于测试与检查点续跑。
#[derive(Debug, Default)]
pub struct VecSource {
    queue: VecDeque<InitialCondition>,
}

impl VecSource {
    /// 由初始条件列表创建
    pub fn new(ics: impl IntoIterator<Item = InitialCondition>) -> Self {
        Self {
            queue: ics.into_iter().collect(),
        }
    }

    /// 剩余数量
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl InitialConditionSource for VecSource {
    fn next(&mut self) -> Result<Option<InitialCondition>, StageError> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按容器格式编码
    fn encode_container(ics: &[InitialCondition]) -> Vec<u8> {
        let n = ics.first().map_or(0, |ic| ic.field.nrows());
        let step = ics.first().map_or(0.0, |ic| ic.step);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(CONTAINER_MAGIC);
        bytes.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(ics.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(n as u64).to_le_bytes());
        bytes.extend_from_slice(&step.to_le_bytes());
        for ic in ics {
            for v in ic.field.iter() {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn test_container_roundtrip() {
        let ics = vec![
            InitialCondition::new(Array2::from_elem((3, 3), 1.0), 0.1),
            InitialCondition::new(Array2::from_elem((3, 3), 2.0), 0.1),
        ];
        let bytes = encode_container(&ics);
        let parsed = parse_container(&bytes).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], ics[0]);
        assert_eq!(parsed[1], ics[1]);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode_container(&[]);
        bytes[0] = b'X';
        assert!(parse_container(&bytes).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let ics = vec![InitialCondition::new(Array2::zeros((2, 2)), 0.1)];
        let bytes = encode_container(&ics);
        assert!(parse_container(&bytes[..bytes.len() - 4]).is_err());
    }

    #[test]
    fn test_vec_source_drains() {
        let mut source = VecSource::new(vec![InitialCondition::new(
            Array2::zeros((2, 2)),
            0.1,
        )]);
        assert!(source.next().unwrap().is_some());
        assert!(source.next().unwrap().is_none());
    }
}
