// crates/hi_io/src/checkpoint.rs

//! 检查点保存/恢复系统
//!
//! 使单个事件在中断后可独立重启。检查点在事件开始执行**之前**
//! 写入，强制终止发生在事件中途时文件仍然完整可续。
//!
//! # 文件格式 (v1)
//!
//! ```text
//! [魔数: 4 bytes] "HICK"
//! [版本: u32]
//! [配置长度: u64]
//! [配置: JSON bytes]
//! [单元数: u64]
//! [步长: f64]
//! [场数据: n * n * f64]
//! [CRC32: u32]
//! ```
//!
//! # 完整性校验
//!
//! 配置中记录的检查点路径必须与实际打开的文件的绝对路径一致，
//! 防止改名/复制后的文件恢复到错误的运行状态。
//!
//! # 删除策略
//!
//! 检查点事件成功完成时删除；会话干净关停时删除——除非刚处理的
//! 检查点事件失败了，此时保留文件供诊断与重试。

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;
use tracing::{debug, info};

use hi_config::RunConfig;
use hi_core::InitialCondition;

/// 检查点文件格式版本
const CHECKPOINT_VERSION: u32 = 1;

/// 检查点魔数
const CHECKPOINT_MAGIC: &[u8; 4] = b"HICK";

/// 检查点错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// 版本不兼容
    #[error("版本不兼容: 文件版本 {file}, 当前版本 {current}")]
    Version {
        /// 文件中的版本号
        file: u32,
        /// 当前支持的版本号
        current: u32,
    },

    /// 校验和错误
    #[error("校验和错误: 期望 {expected:08x}, 实际 {found:08x}")]
    Checksum {
        /// 文件尾部记录的校验和
        expected: u32,
        /// 重新计算的校验和
        found: u32,
    },

    /// 路径不一致
    #[error("检查点路径不一致: 配置记录 {recorded}, 实际打开 {actual}")]
    PathMismatch {
        /// 配置中记录的路径
        recorded: PathBuf,
        /// 实际打开的路径
        actual: PathBuf,
    },

    /// 配置反序列化失败
    #[error("配置反序列化失败: {0}")]
    Config(String),
}

/// 检查点操作结果
pub type CheckpointResult<T> = Result<T, CheckpointError>;

// ============================================================
// 序列化
// ============================================================

/// 编码检查点内容（不含 CRC）
fn encode(config: &RunConfig, ic: &InitialCondition) -> CheckpointResult<Vec<u8>> {
    let config_json =
        serde_json::to_vec(config).map_err(|e| CheckpointError::Config(e.to_string()))?;

    let n = ic.field.nrows();
    let mut data = Vec::with_capacity(32 + config_json.len() + n * n * 8);
    data.extend_from_slice(CHECKPOINT_MAGIC);
    data.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
    data.extend_from_slice(&(config_json.len() as u64).to_le_bytes());
    data.extend_from_slice(&config_json);
    data.extend_from_slice(&(n as u64).to_le_bytes());
    data.extend_from_slice(&ic.step.to_le_bytes());
    for v in ic.field.iter() {
        data.extend_from_slice(&v.to_le_bytes());
    }
    Ok(data)
}

/// 顺序读取 `len` 个字节并推进偏移
fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> CheckpointResult<&'a [u8]> {
    if *offset + len > data.len() {
        return Err(CheckpointError::Format("文件被截断".into()));
    }
    let slice = &data[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

/// 解码检查点内容（已剥离 CRC）
fn decode(data: &[u8]) -> CheckpointResult<(RunConfig, InitialCondition)> {
    let mut offset = 0usize;

    if take(data, &mut offset, 4)? != CHECKPOINT_MAGIC {
        return Err(CheckpointError::Format("无效的检查点文件格式".into()));
    }
    let version = u32::from_le_bytes(take(data, &mut offset, 4)?.try_into().unwrap());
    if version > CHECKPOINT_VERSION {
        return Err(CheckpointError::Version {
            file: version,
            current: CHECKPOINT_VERSION,
        });
    }

    let config_len = u64::from_le_bytes(take(data, &mut offset, 8)?.try_into().unwrap()) as usize;
    let config: RunConfig = serde_json::from_slice(take(data, &mut offset, config_len)?)
        .map_err(|e| CheckpointError::Config(e.to_string()))?;

    let n = u64::from_le_bytes(take(data, &mut offset, 8)?.try_into().unwrap()) as usize;
    let step = f64::from_le_bytes(take(data, &mut offset, 8)?.try_into().unwrap());

    let mut values = Vec::with_capacity(n * n);
    for _ in 0..n * n {
        values.push(f64::from_le_bytes(take(data, &mut offset, 8)?.try_into().unwrap()));
    }
    if offset != data.len() {
        return Err(CheckpointError::Format(format!(
            "尾部有 {} 个多余字节",
            data.len() - offset
        )));
    }
    let field = Array2::from_shape_vec((n, n), values)
        .map_err(|e| CheckpointError::Format(e.to_string()))?;

    Ok((config, InitialCondition::new(field, step)))
}

// ============================================================
// 检查点管理器
// ============================================================

/// 检查点管理器
///
/// 管理单一检查点文件的生命周期：同一时刻最多一个存活文件。
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    /// 绑定检查点路径
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 检查点路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件是否存在
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 保存检查点（覆盖既有内容）
    ///
    /// 写临时文件后原子改名，保证文件要么是旧的完整内容、
    /// 要么是新的完整内容。
    pub fn save(&self, config: &RunConfig, ic: &InitialCondition) -> CheckpointResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = encode(config, ic)?;
        let crc = compute_crc32(&data);

        let temp_path = self.path.with_extension("checkpoint.tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            writer.write_all(&data)?;
            writer.write_all(&crc.to_le_bytes())?;
            writer.flush()?;
        }
        std::fs::rename(&temp_path, &self.path)?;

        debug!("检查点已写入: {}", self.path.display());
        Ok(())
    }

    /// 从文件加载并执行完整性校验
    pub fn load(path: &Path) -> CheckpointResult<(RunConfig, InitialCondition)> {
        let mut all_data = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut all_data)?;

        if all_data.len() < 12 {
            return Err(CheckpointError::Format("文件太小".into()));
        }

        // 分离并验证 CRC
        let crc_offset = all_data.len() - 4;
        let data = &all_data[..crc_offset];
        let stored_crc = u32::from_le_bytes(all_data[crc_offset..].try_into().unwrap());
        let computed_crc = compute_crc32(data);
        if stored_crc != computed_crc {
            return Err(CheckpointError::Checksum {
                expected: stored_crc,
                found: computed_crc,
            });
        }

        let (config, ic) = decode(data)?;

        // 完整性校验: 记录的路径必须就是打开的文件
        let actual = std::fs::canonicalize(path)?;
        let recorded = std::fs::canonicalize(&config.checkpoint_path)
            .unwrap_or_else(|_| config.checkpoint_path.clone());
        if recorded != actual {
            return Err(CheckpointError::PathMismatch {
                recorded: config.checkpoint_path.clone(),
                actual,
            });
        }

        info!("检查点已恢复: {}", path.display());
        Ok((config, ic))
    }

    /// 删除检查点文件（不存在时无操作）
    pub fn delete(&self) -> CheckpointResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("检查点已删除: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================
// CRC32
// ============================================================

/// 计算 CRC32 校验和（IEEE 多项式）
fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = CRC32_TABLE[index] ^ (crc >> 8);
    }
    !crc
}

/// 生成 CRC32 查找表（编译期计算）
const fn generate_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = 0xEDB88320 ^ (crc >> 1);
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC32 查找表
const CRC32_TABLE: [u32; 256] = generate_crc32_table();

// ============================================================
// 测试
// ============================================================
