use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use httpexec::config::ConfigLoader;
use httpexec::executer::HttpExecuter;
use httpexec::plan::Plan;
use httpexec::progress::ProgressCounter;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 输出调试日志和请求/响应转储
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 按计划文件对目标执行请求
    Run {
        /// 目标 URL，可重复
        #[arg(short, long, required = true)]
        target: Vec<String>,

        /// TOML 计划文件
        #[arg(short, long)]
        plan: PathBuf,

        /// 执行器配置文件 (默认查找 httpexec.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON lines 输出
        #[arg(long)]
        json: bool,

        /// 附加 header，可重复: -H "Name: Value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// 首次匹配后停止 (仅串行模式)
        #[arg(long)]
        stop_at_first_match: bool,
    },
}

/// 执行 run 子命令，返回是否有目标出错
pub async fn run(cli: Cli) -> Result<bool> {
    let Commands::Run {
        target,
        plan,
        config,
        json,
        headers,
        stop_at_first_match,
    } = cli.command;

    let mut options = ConfigLoader::load(config.as_deref()).context("Failed to load config")?;
    options.debug |= cli.debug;
    options.json |= json;
    options.stop_at_first_match |= stop_at_first_match;
    options.custom_headers.extend(headers);

    let generator = Plan::load(&plan)
        .and_then(Plan::into_generator)
        .with_context(|| format!("Failed to load plan {}", plan.display()))?;

    let progress = Arc::new(ProgressCounter::new());
    let executer = HttpExecuter::builder(Arc::new(generator))
        .options(options)
        .progress(progress.clone())
        .build()
        .context("Failed to build executer")?;

    let mut failed = false;
    let mut matched = 0;
    for target in &target {
        let result = executer.execute(target).await;
        if result.got_results {
            matched += 1;
        }
        if let Some(error) = &result.error {
            failed = true;
            eprintln!(
                "{} {}: {} ({} errors)",
                "✗".red(),
                target,
                error,
                result.error_count
            );
        }
    }

    if !executer.options().json {
        eprintln!(
            "{} targets, {} with results, {} requests completed, {} dropped",
            target.len(),
            matched.to_string().green(),
            progress.completed(),
            progress.dropped()
        );
    }

    Ok(failed)
}
