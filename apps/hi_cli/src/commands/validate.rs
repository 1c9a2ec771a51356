// apps/hi_cli/src/commands/validate.rs

//! 验证配置命令

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::commands::run::ConfigArgs;

/// 验证命令参数
#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<bool> {
    let config = args.config.assemble()?;
    let grid = config.grid();

    info!("配置有效");
    info!("事件数: {}", config.nevents);
    info!(
        "网格: step={:.4} fm, n={}, max={:.2} fm",
        grid.step, grid.cell_count, grid.physical_max
    );
    info!("结果流: {}", config.results_path.display());
    match &config.particles_path {
        Some(path) => info!("粒子明细流: {}", path.display()),
        None => info!("粒子明细流: 未启用"),
    }
    info!("检查点: {}", config.checkpoint_path.display());

    Ok(true)
}
