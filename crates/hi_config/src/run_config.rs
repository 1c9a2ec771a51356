// crates/hi_config/src/run_config.rs

//! 运行配置
//!
//! 单次进程调用的全部参数：事件数、网格与物理参数、外部引擎
//! 程序及其透传参数、按 rank 装配的输出路径。
//!
//! # 装配流程
//!
//! ```rust,ignore
//! let rank = rank_from_env()?;
//! let config = RunConfig::new(nevents, nucleon_width)
//!     .with_rank_paths("results", &rank)
//!     .with_particle_output(true);
//! config.validate()?;
//! ```

use hi_core::{GridSpec, HiError, HiResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 外部引擎配置
///
/// 程序路径加透传参数。参数的语义属于外部引擎，本系统不解释。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 可执行程序路径
    pub program: PathBuf,
    /// 透传参数
    pub args: Vec<String>,
}

impl EngineConfig {
    /// 创建引擎配置
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// 追加透传参数
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// 采样器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// 粒子化温度 [GeV]
    pub tswitch: f64,
    /// 是否启用剪切修正
    pub shear: bool,
    /// 是否启用体粘修正
    pub bulk: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            tswitch: 0.151,
            shear: true,
            bulk: false,
        }
    }
}

/// 运行配置
///
/// 构造后不可变；所有组件按引用共享同一份实例。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// 本次运行的事件数
    pub nevents: usize,
    /// 核子宽度 [fm]，决定网格步长
    pub nucleon_width: f64,
    /// 显式步长覆盖 [fm]（可选）
    pub grid_step_override: Option<f64>,
    /// 自由流时间 [fm/c]
    pub tau_fs: f64,
    /// 初始条件生成器
    pub generator: EngineConfig,
    /// 自由流变换
    pub freestream: EngineConfig,
    /// 流体引擎（精细遍使用的完整物理参数）
    pub hydro: EngineConfig,
    /// 粒子采样器
    pub sampler_engine: EngineConfig,
    /// 采样参数
    pub sampler: SamplerConfig,
    /// 结果流路径
    pub results_path: PathBuf,
    /// 粒子明细流路径（可选）
    pub particles_path: Option<PathBuf>,
    /// 检查点路径
    pub checkpoint_path: PathBuf,
}

impl RunConfig {
    /// 创建配置骨架
    ///
    /// 引擎程序默认取 PATH 中的约定名，输出路径在
    /// [`with_rank_paths`](Self::with_rank_paths) 中装配。
    pub fn new(nevents: usize, nucleon_width: f64) -> Self {
        Self {
            nevents,
            nucleon_width,
            grid_step_override: None,
            tau_fs: 0.5,
            generator: EngineConfig::new("trento"),
            freestream: EngineConfig::new("freestream"),
            hydro: EngineConfig::new("osu-hydro"),
            sampler_engine: EngineConfig::new("frzout-sample"),
            sampler: SamplerConfig::default(),
            results_path: PathBuf::new(),
            particles_path: None,
            checkpoint_path: PathBuf::new(),
        }
    }

    /// 设置自由流时间
    pub fn with_tau_fs(mut self, tau_fs: f64) -> Self {
        self.tau_fs = tau_fs;
        self
    }

    /// 覆盖网格步长
    pub fn with_grid_step(mut self, step: f64) -> Self {
        self.grid_step_override = Some(step);
        self
    }

    /// 设置生成器
    pub fn with_generator(mut self, generator: EngineConfig) -> Self {
        self.generator = generator;
        self
    }

    /// 设置自由流变换
    pub fn with_freestream(mut self, freestream: EngineConfig) -> Self {
        self.freestream = freestream;
        self
    }

    /// 设置流体引擎
    pub fn with_hydro(mut self, hydro: EngineConfig) -> Self {
        self.hydro = hydro;
        self
    }

    /// 设置采样器引擎
    pub fn with_sampler_engine(mut self, engine: EngineConfig) -> Self {
        self.sampler_engine = engine;
        self
    }

    /// 设置采样参数
    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    /// 按 rank 装配输出路径
    ///
    /// 路径重写只发生在这里，之后配置不再变化。
    pub fn with_rank_paths(mut self, output_dir: impl AsRef<Path>, rank: &str) -> Self {
        let dir = output_dir.as_ref();
        self.results_path = dir.join(format!("{rank}.results"));
        self.particles_path = None;
        self.checkpoint_path = dir.join(format!("{rank}.checkpoint"));
        self
    }

    /// 启用粒子明细输出
    ///
    /// 必须在 [`with_rank_paths`](Self::with_rank_paths) 之后调用。
    pub fn with_particle_output(mut self, enable: bool) -> Self {
        self.particles_path = if enable {
            self.results_path
                .parent()
                .zip(self.results_path.file_stem())
                .map(|(dir, stem)| {
                    dir.join(format!("{}.particles", stem.to_string_lossy()))
                })
        } else {
            None
        };
        self
    }

    /// 推导网格规格
    pub fn grid(&self) -> GridSpec {
        match self.grid_step_override {
            Some(step) => GridSpec::from_step(step),
            None => GridSpec::from_nucleon_width(self.nucleon_width),
        }
    }

    /// 验证配置
    pub fn validate(&self) -> HiResult<()> {
        if self.nevents == 0 {
            return Err(HiError::invalid_config(
                "nevents",
                self.nevents.to_string(),
                "事件数必须大于零",
            ));
        }
        if self.nucleon_width <= 0.0 {
            return Err(HiError::invalid_config(
                "nucleon_width",
                self.nucleon_width.to_string(),
                "核子宽度必须为正",
            ));
        }
        if let Some(step) = self.grid_step_override {
            if step <= 0.0 {
                return Err(HiError::invalid_config(
                    "grid_step_override",
                    step.to_string(),
                    "步长必须为正",
                ));
            }
        }
        if self.tau_fs <= 0.0 {
            return Err(HiError::invalid_config(
                "tau_fs",
                self.tau_fs.to_string(),
                "自由流时间必须为正",
            ));
        }
        if self.sampler.tswitch <= 0.0 {
            return Err(HiError::invalid_config(
                "tswitch",
                self.sampler.tswitch.to_string(),
                "粒子化温度必须为正",
            ));
        }
        if self.results_path.as_os_str().is_empty() {
            return Err(HiError::missing_config("results_path"));
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(HiError::missing_config("checkpoint_path"));
        }
        Ok(())
    }
}

/// 从环境变量读取任务 rank
///
/// 依次尝试 `OMPI_COMM_WORLD_RANK`、`SLURM_PROCID`。
/// 两者皆未设置是启动期硬错误，不允许任何事件开始。
pub fn rank_from_env() -> HiResult<String> {
    for key in ["OMPI_COMM_WORLD_RANK", "SLURM_PROCID"] {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }
    Err(HiError::missing_config("OMPI_COMM_WORLD_RANK/SLURM_PROCID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled() -> RunConfig {
        RunConfig::new(10, 0.5).with_rank_paths("/tmp/out", "3")
    }

    #[test]
    fn test_rank_paths() {
        let config = assembled();
        assert_eq!(config.results_path, PathBuf::from("/tmp/out/3.results"));
        assert_eq!(
            config.checkpoint_path,
            PathBuf::from("/tmp/out/3.checkpoint")
        );
        assert!(config.particles_path.is_none());
    }

    #[test]
    fn test_particle_output_path() {
        let config = assembled().with_particle_output(true);
        assert_eq!(
            config.particles_path,
            Some(PathBuf::from("/tmp/out/3.particles"))
        );
    }

    #[test]
    fn test_validate_ok() {
        assert!(assembled().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_events() {
        let config = RunConfig::new(0, 0.5).with_rank_paths("/tmp/out", "0");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_paths() {
        let config = RunConfig::new(1, 0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_grid_override() {
        let config = assembled().with_grid_step(0.1);
        assert!((config.grid().step - 0.1).abs() < 1e-12);

        let derived = assembled();
        assert!((derived.grid().step - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = assembled().with_particle_output(true);
        let json = serde_json::to_string(&config).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
