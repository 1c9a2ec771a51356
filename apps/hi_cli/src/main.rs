// apps/hi_cli/src/main.rs

//! HIonFlow 命令行界面
//!
//! 驱动重离子碰撞事件管线：逐事件执行初始条件生成、自由流、
//! 两遍流体演化与过采样，把观测量追加进结果流。
//!
//! 终止信号 (SIGINT/SIGTERM) 被重映射为取消令牌，只在事件边界
//! 与样本边界被观察到；关停窗口内的后续信号被忽略。

mod commands;

use clap::{Parser, Subcommand};
use hi_core::CancelToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// HIonFlow 重离子事件管线命令行工具
#[derive(Parser)]
#[command(name = "hionflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Heavy-ion collision event pipeline", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行事件管线
    Run(commands::run::RunArgs),
    /// 从检查点恢复单个事件
    Resume(commands::resume::ResumeArgs),
    /// 验证配置并显示网格几何
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 终止信号 -> 取消令牌（重复信号只是重复置位, 清理不被打断）
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())?;
    }

    // 执行命令
    let successful = match cli.command {
        Commands::Run(args) => commands::run::execute(args, cancel)?,
        Commands::Resume(args) => commands::resume::execute(args, cancel)?,
        Commands::Validate(args) => commands::validate::execute(args)?,
    };

    if !successful {
        std::process::exit(1);
    }
    Ok(())
}
