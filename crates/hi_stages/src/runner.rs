// crates/hi_stages/src/runner.rs

//! 外部引擎运行器
//!
//! 与外部模拟引擎的文件契约：命名输入场以平坦 f64 LE 二进制写入
//! 工作目录，引擎被同步阻塞调用，输出以固定列宽的平坦缓冲读回。
//!
//! # 契约
//!
//! - 输入: `<name>.dat`，行主序 f64 小端序
//! - 调用: `program <args...>`，工作目录即文件交换目录，无超时
//! - 输出: 平坦 f64 缓冲，总长必须是列宽整数倍；空缓冲由调用方
//!   解释（流体面场景下表示提前终止）
//! - 非零退出码是硬错误，附带标准错误尾部

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use ndarray::Array2;
use tracing::debug;

use crate::outcome::StageError;
use hi_core::Field2;

/// 保留的标准错误尾部长度
const STDERR_TAIL: usize = 4096;

/// 外部引擎
///
/// 一个可执行程序与其私有工作目录的绑定。
#[derive(Debug, Clone)]
pub struct ExternalEngine {
    program: PathBuf,
    workdir: PathBuf,
}

impl ExternalEngine {
    /// 创建引擎绑定
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    /// 工作目录
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// 程序名（用于诊断）
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// 写入命名二维场: `<name>.dat`
    pub fn write_field(&self, name: &str, field: &Field2) -> Result<(), StageError> {
        self.write_f64s(name, field.iter().copied())
    }

    /// 写入平坦 f64 序列: `<name>.dat`
    pub fn write_f64s(
        &self,
        name: &str,
        values: impl Iterator<Item = f64>,
    ) -> Result<(), StageError> {
        let path = self.data_path(name);
        let mut writer = BufWriter::new(File::create(&path)?);
        for v in values {
            writer.write_all(&v.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 同步调用引擎
    ///
    /// 阻塞至引擎退出；编排器在此期间完全挂起。非零退出码转为
    /// [`StageError::EngineExit`]，标准错误保留尾部供日志呈现。
    pub fn run(&self, args: &[String]) -> Result<(), StageError> {
        debug!("调用引擎: {} {}", self.program.display(), args.join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.workdir)
            .output()?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = tail_utf8(&output.stderr, STDERR_TAIL);
        match output.status.code() {
            Some(status) => Err(StageError::EngineExit {
                program: self.program_name(),
                status,
                stderr,
            }),
            None => Err(StageError::EngineKilled {
                program: self.program_name(),
            }),
        }
    }

    /// 读回固定列宽的平坦 f64 缓冲: `<name>.dat`
    ///
    /// 返回 `(rows, width)` 形状的矩阵。空缓冲返回 0 行矩阵；
    /// 总长不是列宽整数倍视为契约违约。
    pub fn read_matrix(&self, name: &str, width: usize) -> Result<Array2<f64>, StageError> {
        let path = self.data_path(name);
        let mut bytes = Vec::new();
        BufReader::new(File::open(&path)?).read_to_end(&mut bytes)?;

        if bytes.len() % 8 != 0 {
            return Err(StageError::MalformedOutput {
                path,
                reason: format!("字节数 {} 不是 8 的整数倍", bytes.len()),
            });
        }
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().expect("chunk width is 8")))
            .collect();

        if values.len() % width != 0 {
            return Err(StageError::MalformedOutput {
                path,
                reason: format!("元素数 {} 不是列宽 {} 的整数倍", values.len(), width),
            });
        }
        let rows = values.len() / width;
        Array2::from_shape_vec((rows, width), values).map_err(|e| StageError::MalformedOutput {
            path: self.data_path(name),
            reason: e.to_string(),
        })
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.workdir.join(format!("{name}.dat"))
    }
}

/// 截取字节串尾部并转为 UTF-8（有损）
fn tail_utf8(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn engine_in(dir: &Path) -> ExternalEngine {
        ExternalEngine::new("/bin/true", dir)
    }

    #[test]
    fn test_field_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());

        let field = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        engine.write_field("ed", &field).unwrap();

        let back = engine.read_matrix("ed", 2).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn test_empty_output_is_zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());

        engine.write_f64s("surface", std::iter::empty()).unwrap();
        let matrix = engine.read_matrix("surface", 16).unwrap();
        assert_eq!(matrix.nrows(), 0);
    }

    #[test]
    fn test_ragged_output_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());

        engine.write_f64s("surface", [1.0, 2.0, 3.0].into_iter()).unwrap();
        let err = engine.read_matrix("surface", 2).unwrap_err();
        assert!(matches!(err, StageError::MalformedOutput { .. }));
    }

    #[test]
    fn test_nonzero_exit_is_stage_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ExternalEngine::new("/bin/false", dir.path());

        let err = engine.run(&[]).unwrap_err();
        assert!(matches!(err, StageError::EngineExit { status, .. } if status != 0));
    }

    #[test]
    fn test_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        assert!(engine.run(&[]).is_ok());
    }
}
