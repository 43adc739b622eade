use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use gtr::commit::AutoCommit;
use gtr::config::{Config, StrategyKind};
use gtr::exec::OsCommandFactory;
use gtr::notify::DesktopNotifier;
use gtr::pipeline::Task;
use gtr::runner::GoTestRunner;
use gtr::strategy::{CallGraphStrategy, CoverStrategy, Strategy};
use gtr::watcher::Watcher;

const NOTIFY_EXPIRE_MS: u32 = 2000;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gtr=info")),
        )
        .with_target(false)
        .init();

    let cfg = Config::from_args()?;
    let cmd = Arc::new(OsCommandFactory);

    let strategy: Box<dyn Strategy> = match cfg.strategy {
        StrategyKind::Analysis => Box::new(CallGraphStrategy::new(
            &cfg.work_dir,
            cfg.analysis,
            cmd.clone(),
        )),
        StrategyKind::Coverage => Box::new(CoverStrategy::new(
            &cfg.work_dir,
            cfg.run_init,
            cmd.clone(),
        )),
    };

    let runner = GoTestRunner::new(strategy, cmd.clone(), cfg.test_binary_args.clone());
    let mut tasks: Vec<Box<dyn Task>> = vec![
        Box::new(runner),
        Box::new(DesktopNotifier::new(true, NOTIFY_EXPIRE_MS, cmd.clone())),
    ];
    if cfg.auto_commit {
        tasks.push(Box::new(AutoCommit::new(&cfg.work_dir, cmd.clone())));
        tasks.push(Box::new(DesktopNotifier::new(true, NOTIFY_EXPIRE_MS, cmd)));
    }

    let mut watcher = Watcher::new(
        &cfg.work_dir,
        tasks,
        cfg.delay_ms,
        cfg.exclude_file_prefixes.clone(),
        cfg.exclude_dirs.clone(),
    );
    watcher.run()
}
