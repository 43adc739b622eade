//! Runtime configuration: CLI flags layered over an optional `gtr.toml`
//! in the working directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::analysis::GraphAlgo;

pub const CONFIG_FILE: &str = "gtr.toml";

const DEFAULT_DELAY_MS: u64 = 1000;
const DEFAULT_EXCLUDE_PREFIXES: &str = "flymake,#flymake";
const DEFAULT_EXCLUDE_DIRS: &str = "vendor,node_modules";

/// Which selection strategy answers "what to run".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Analysis,
    Coverage,
}

impl StrategyKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(Self::Analysis),
            "coverage" => Some(Self::Coverage),
            _ => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gtr")]
#[command(about = "Continuous test selection for Go projects: watch, diff, select, run")]
#[command(version)]
struct Cli {
    /// Working directory to watch
    #[arg(short = 'C', long = "dir")]
    dir: Option<String>,

    /// Selection strategy: analysis or coverage
    #[arg(long)]
    strategy: Option<String>,

    /// Call-graph algorithm: pointer, static, cha or rta
    #[arg(long)]
    analysis: Option<String>,

    /// Run the full baseline on the first coverage pass
    #[arg(long)]
    run_init: Option<String>,

    /// Debounce delay in milliseconds
    #[arg(long)]
    delay: Option<String>,

    /// File prefixes to ignore, comma separated
    #[arg(long)]
    exclude_file_prefix: Option<String>,

    /// Directories to ignore, comma separated
    #[arg(long)]
    exclude_dirs: Option<String>,

    /// Commit the changed files when tests pass
    #[arg(long)]
    auto_commit: Option<String>,

    /// Raw arguments handed to the test binary after -args
    #[arg(long)]
    args: Option<String>,
}

/// Optional file-level configuration, same keys as the flags.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    run_init: Option<bool>,
    #[serde(default)]
    delay: Option<u64>,
    #[serde(default)]
    exclude_file_prefix: Option<Vec<String>>,
    #[serde(default)]
    exclude_dirs: Option<Vec<String>>,
    #[serde(default)]
    auto_commit: Option<bool>,
    #[serde(default)]
    args: Option<String>,
}

impl FileConfig {
    fn load(work_dir: &Path) -> Result<Self> {
        let path = work_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse {}", path.display()))
    }
}

/// Resolved configuration the rest of the program runs on.
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub strategy: StrategyKind,
    pub analysis: GraphAlgo,
    pub run_init: bool,
    pub delay_ms: u64,
    pub exclude_file_prefixes: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub auto_commit: bool,
    pub test_binary_args: String,
}

impl Config {
    /// Parses the process arguments; exits nonzero on `--help`.
    pub fn from_args() -> Result<Self> {
        Self::resolve(Cli::parse())
    }

    fn resolve(cli: Cli) -> Result<Self> {
        let work_dir = PathBuf::from(strip_quotes(cli.dir.as_deref().unwrap_or(".")));
        let file = FileConfig::load(&work_dir)?;

        let strategy_name = cli
            .strategy
            .as_deref()
            .map(strip_quotes)
            .map(str::to_string)
            .or(file.strategy)
            .unwrap_or_else(|| "analysis".to_string());
        let Some(strategy) = StrategyKind::parse(&strategy_name) else {
            bail!("--strategy invalid value {strategy_name}");
        };

        let analysis_name = cli
            .analysis
            .as_deref()
            .map(strip_quotes)
            .map(str::to_string)
            .or(file.analysis)
            .unwrap_or_else(|| "cha".to_string());
        let Some(analysis) = GraphAlgo::parse(&analysis_name) else {
            bail!("--analysis invalid value {analysis_name}");
        };

        let run_init = match cli.run_init.as_deref().map(strip_quotes) {
            Some(v) => v
                .parse::<bool>()
                .map_err(|_| anyhow::anyhow!("--run-init invalid value {v}"))?,
            None => file.run_init.unwrap_or(true),
        };

        let delay_ms = match cli.delay.as_deref().map(strip_quotes) {
            Some(v) => v
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("--delay invalid value {v}"))?,
            None => file.delay.unwrap_or(DEFAULT_DELAY_MS),
        };

        let exclude_file_prefixes = match cli.exclude_file_prefix.as_deref().map(strip_quotes) {
            Some(v) => split_csv(v),
            None => file
                .exclude_file_prefix
                .unwrap_or_else(|| split_csv(DEFAULT_EXCLUDE_PREFIXES)),
        };
        let exclude_dirs = match cli.exclude_dirs.as_deref().map(strip_quotes) {
            Some(v) => split_csv(v),
            None => file
                .exclude_dirs
                .unwrap_or_else(|| split_csv(DEFAULT_EXCLUDE_DIRS)),
        };

        let auto_commit = match cli.auto_commit.as_deref().map(strip_quotes) {
            Some(v) => v
                .parse::<bool>()
                .map_err(|_| anyhow::anyhow!("--auto-commit invalid value {v}"))?,
            None => file.auto_commit.unwrap_or(false),
        };

        let test_binary_args = cli
            .args
            .as_deref()
            .map(strip_quotes)
            .map(str::to_string)
            .or(file.args)
            .unwrap_or_default();

        Ok(Self {
            work_dir,
            strategy,
            analysis,
            run_init,
            delay_ms,
            exclude_file_prefixes,
            exclude_dirs,
            auto_commit,
            test_binary_args,
        })
    }
}

/// Surrounding double quotes are stripped from flag values.
fn strip_quotes(value: &str) -> &str {
    value.trim_matches('"')
}

/// Splits on commas and trims each entry.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["gtr"];
        full.extend(args);
        Cli::parse_from(full)
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::resolve(cli(&[])).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("."));
        assert_eq!(cfg.strategy, StrategyKind::Analysis);
        assert_eq!(cfg.analysis, GraphAlgo::Cha);
        assert!(cfg.run_init);
        assert_eq!(cfg.delay_ms, 1000);
        assert_eq!(cfg.exclude_file_prefixes, vec!["flymake", "#flymake"]);
        assert_eq!(cfg.exclude_dirs, vec!["vendor", "node_modules"]);
        assert!(!cfg.auto_commit);
        assert_eq!(cfg.test_binary_args, "");
    }

    #[test]
    fn test_quoted_values_are_stripped() {
        let cfg = Config::resolve(cli(&[
            "--strategy",
            "\"coverage\"",
            "--delay",
            "\"250\"",
        ]))
        .unwrap();
        assert_eq!(cfg.strategy, StrategyKind::Coverage);
        assert_eq!(cfg.delay_ms, 250);
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        assert!(Config::resolve(cli(&["--strategy", "magic"])).is_err());
    }

    #[test]
    fn test_invalid_analysis_rejected() {
        assert!(Config::resolve(cli(&["--analysis", "quantum"])).is_err());
    }

    #[test]
    fn test_invalid_bool_and_int_rejected() {
        assert!(Config::resolve(cli(&["--auto-commit", "yep"])).is_err());
        assert!(Config::resolve(cli(&["--delay", "soon"])).is_err());
        assert!(Config::resolve(cli(&["--run-init", "2"])).is_err());
    }

    #[test]
    fn test_csv_flags_split_and_trimmed() {
        let cfg = Config::resolve(cli(&[
            "--exclude-dirs",
            "vendor, dist ,out",
            "--exclude-file-prefix",
            "tmp_,#",
        ]))
        .unwrap();
        assert_eq!(cfg.exclude_dirs, vec!["vendor", "dist", "out"]);
        assert_eq!(cfg.exclude_file_prefixes, vec!["tmp_", "#"]);
    }

    #[test]
    fn test_analysis_algorithms_parse() {
        for (name, algo) in [
            ("pointer", GraphAlgo::Pointer),
            ("static", GraphAlgo::Static),
            ("cha", GraphAlgo::Cha),
            ("rta", GraphAlgo::Rta),
        ] {
            let cfg = Config::resolve(cli(&["--analysis", name])).unwrap();
            assert_eq!(cfg.analysis, algo);
        }
    }
}
