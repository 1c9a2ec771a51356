// apps/hi_cli/src/commands/run.rs

//! 运行事件管线命令

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use hi_config::{rank_from_env, EngineConfig, RunConfig, SamplerConfig};
use hi_core::CancelToken;
use hi_workflow::RunSession;

/// 配置参数（run 与 validate 共享）
#[derive(Args)]
pub struct ConfigArgs {
    /// 事件数
    #[arg(short, long, default_value = "10")]
    pub nevents: usize,

    /// 核子宽度 [fm]
    #[arg(short = 'w', long, default_value = "0.5")]
    pub nucleon_width: f64,

    /// 显式网格步长覆盖 [fm]
    #[arg(long)]
    pub grid_step: Option<f64>,

    /// 自由流时间 [fm/c]
    #[arg(long, default_value = "0.5")]
    pub tau_fs: f64,

    /// 粒子化温度 [GeV]
    #[arg(long, default_value = "0.151")]
    pub tswitch: f64,

    /// 启用体粘修正
    #[arg(long)]
    pub bulk: bool,

    /// 输出目录
    #[arg(short, long, default_value = "results")]
    pub output: PathBuf,

    /// 任务 rank（缺省时读取调度器环境变量）
    #[arg(long)]
    pub rank: Option<String>,

    /// 启用粒子明细输出
    #[arg(long)]
    pub particles: bool,

    /// 初始条件生成器程序
    #[arg(long, default_value = "trento")]
    pub generator_bin: PathBuf,

    /// 生成器透传参数
    #[arg(long, num_args = 0.., allow_hyphen_values = true)]
    pub generator_args: Vec<String>,

    /// 自由流变换程序
    #[arg(long, default_value = "freestream")]
    pub freestream_bin: PathBuf,

    /// 流体引擎程序
    #[arg(long, default_value = "osu-hydro")]
    pub hydro_bin: PathBuf,

    /// 流体引擎物理参数（精细遍透传）
    #[arg(long, num_args = 0.., allow_hyphen_values = true)]
    pub hydro_args: Vec<String>,

    /// 粒子采样器程序
    #[arg(long, default_value = "frzout-sample")]
    pub sampler_bin: PathBuf,
}

impl ConfigArgs {
    /// 装配不可变运行配置
    ///
    /// rank 来自显式参数或调度器环境变量；两者皆缺是启动期硬错误。
    pub fn assemble(&self) -> Result<RunConfig> {
        let rank = match &self.rank {
            Some(rank) => rank.clone(),
            None => rank_from_env().context("无法确定任务 rank")?,
        };

        let mut config = RunConfig::new(self.nevents, self.nucleon_width)
            .with_tau_fs(self.tau_fs)
            .with_generator(
                EngineConfig::new(&self.generator_bin).with_args(self.generator_args.clone()),
            )
            .with_freestream(EngineConfig::new(&self.freestream_bin))
            .with_hydro(EngineConfig::new(&self.hydro_bin).with_args(self.hydro_args.clone()))
            .with_sampler_engine(EngineConfig::new(&self.sampler_bin))
            .with_sampler(SamplerConfig {
                tswitch: self.tswitch,
                shear: true,
                bulk: self.bulk,
            })
            .with_rank_paths(&self.output, &rank)
            .with_particle_output(self.particles);
        if let Some(step) = self.grid_step {
            config = config.with_grid_step(step);
        }

        config.validate().context("配置验证失败")?;
        Ok(config)
    }
}

/// 运行命令参数
#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// 执行运行命令，返回会话是否成功
pub fn execute(args: RunArgs, cancel: CancelToken) -> Result<bool> {
    let config = args.config.assemble()?;
    let grid = config.grid();
    info!(
        "网格: step={:.4} fm, n={}, max={:.2} fm",
        grid.step, grid.cell_count, grid.physical_max
    );

    let session =
        RunSession::with_process_engines(config, cancel).context("会话构建失败")?;
    let summary = session.run().context("会话执行失败")?;

    Ok(summary.successful())
}
