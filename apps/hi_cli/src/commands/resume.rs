// apps/hi_cli/src/commands/resume.rs

//! 从检查点恢复命令
//!
//! 加载检查点、执行完整性校验，然后恰好重跑被检查点的那一个
//! 事件。配置取自检查点内记录的快照，不接受命令行覆盖。

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use hi_core::CancelToken;
use hi_io::CheckpointManager;
use hi_stages::VecSource;
use hi_workflow::RunSession;

/// 恢复命令参数
#[derive(Args)]
pub struct ResumeArgs {
    /// 检查点文件路径
    #[arg(short, long)]
    pub checkpoint: PathBuf,
}

/// 执行恢复命令，返回会话是否成功
pub fn execute(args: ResumeArgs, cancel: CancelToken) -> Result<bool> {
    let (config, ic) =
        CheckpointManager::load(&args.checkpoint).context("检查点加载失败")?;
    info!(
        "恢复检查点事件: 网格 {}x{}, 步长 {:.4} fm",
        ic.field.nrows(),
        ic.field.ncols(),
        ic.step
    );

    let session = RunSession::with_process_engines(config, cancel)
        .context("会话构建失败")?
        .with_source(Box::new(VecSource::new([ic])));
    let summary = session.run().context("会话执行失败")?;

    Ok(summary.successful())
}
