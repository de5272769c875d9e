mod checker;
mod config;
mod dir_cache;
mod file_matching;
mod fs;
mod serde_parse;
mod watch;

use std::io::BufRead as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use checker::{CaseChecker, CheckStatus};
use clap::{Parser, Subcommand, ValueEnum};
use config::{find_and_read_config, Config};
use env_logger::{Builder, Env};
use file_matching::retain_matching_paths;
use fs::{DirLister, RealFs};
use futures::{stream, StreamExt as _};
use log::{debug, info, warn};
use owo_colors::OwoColorize;

#[derive(Parser)]
#[command(
    name = "casecheck",
    version,
    about = "Verify that path references match on-disk casing"
)]
struct Cli {
    #[arg(long, default_value_t = ColorOutput::Auto)]
    color: ColorOutput,

    #[arg(long)]
    quiet: bool,

    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Check paths against the casing on disk.
    Check(CheckArgs),
    /// Watch a directory tree and re-check paths as the filesystem changes.
    Watch(WatchArgs),
    /// Print a sample config file.
    SampleConfig,
    /// Validate the supplied config.
    ValidateConfig,
}

#[derive(Parser)]
struct CheckArgs {
    /// Paths to check. Relative paths are resolved against the configured
    /// root.
    paths: Vec<PathBuf>,

    /// Read more paths from a file, one per line (`-` for stdin). Build
    /// tools can pipe their resolved module list straight in.
    #[arg(long)]
    files_from: Option<PathBuf>,
}

#[derive(Parser)]
struct WatchArgs {
    /// Paths to re-check on every filesystem change.
    paths: Vec<PathBuf>,

    /// Read more paths from a file, one per line (`-` for stdin).
    #[arg(long)]
    files_from: Option<PathBuf>,

    /// How long the event stream must stay quiet before a batch of changes
    /// is processed, in milliseconds.
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,
}

#[derive(ValueEnum, Clone)]
enum ColorOutput {
    Auto,
    Always,
    Never,
}

impl std::fmt::Display for ColorOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorOutput::Auto => write!(f, "auto"),
            ColorOutput::Always => write!(f, "always"),
            ColorOutput::Never => write!(f, "never"),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    let env = Env::new()
        .filter_or("CASECHECK_LOG", default_level)
        .write_style("CASECHECK_LOG_STYLE");
    Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match cli.color {
        ColorOutput::Auto => {}
        ColorOutput::Always => owo_colors::set_override(true),
        ColorOutput::Never => owo_colors::set_override(false),
    }

    match &cli.command {
        SubCommand::Check(args) => subcommand_check(&cli, args).await,
        SubCommand::Watch(args) => subcommand_watch(&cli, args).await,
        SubCommand::SampleConfig => subcommand_sample_config(&cli).await,
        SubCommand::ValidateConfig => subcommand_validate_config(&cli).await,
    }
}

async fn subcommand_check(cli: &Cli, args: &CheckArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    let config = find_and_read_config(&cwd, &cli.config)?;
    let paths = gather_paths(&args.paths, args.files_from.as_deref())?;

    let checker = CaseChecker::new(RealFs);
    let summary = check_paths(&checker, &config, &cwd, paths).await;
    report(&summary);

    if summary.mismatches > 0 {
        bail!("Case check failed");
    }
    Ok(())
}

async fn subcommand_watch(cli: &Cli, args: &WatchArgs) -> Result<()> {
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    let config = find_and_read_config(&cwd, &cli.config)?;
    let paths = gather_paths(&args.paths, args.files_from.as_deref())?;
    let root = config.root.clone().unwrap_or(cwd);

    let mut changes = watch::changed_paths(&root, Duration::from_millis(args.settle_ms))?;

    let checker = CaseChecker::new(RealFs);

    // The first pass is a fresh build; later passes reuse whatever the
    // change events haven't invalidated.
    checker.clear();
    info!("Checking {} paths in {}", paths.len(), root.display());
    report(&check_paths(&checker, &config, &root, paths.clone()).await);

    // TODO (1.0): Only re-check paths under the changed directories
    // instead of the whole list.
    while let Some(changed) = changes.recv().await {
        for path in &changed {
            checker.invalidate(path);
        }
        debug!("{} paths changed; re-checking", changed.len());
        report(&check_paths(&checker, &config, &root, paths.clone()).await);
    }
    Ok(())
}

async fn subcommand_sample_config(_cli: &Cli) -> Result<()> {
    let sample_config = include_str!("../sample_config.json5");
    println!("{}", sample_config);
    Ok(())
}

async fn subcommand_validate_config(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    let _config = find_and_read_config(&cwd, &cli.config)?;
    info!("Config validated");
    Ok(())
}

struct CheckSummary {
    checked: usize,
    mismatches: usize,
}

fn report(summary: &CheckSummary) {
    if summary.mismatches > 0 {
        eprintln!(
            "Case check {} ({} of {} paths)",
            "failed".red(),
            summary.mismatches,
            summary.checked
        );
    } else {
        eprintln!("Case check {} ({} paths)", "passed".green(), summary.checked);
    }
}

/// Check every path and print a diagnostic per mismatch.
///
/// A path that doesn't exist at all is the resolver's problem, not a case
/// error, so it's only logged. Paths that can't be verified because a
/// directory wasn't listable are skipped with a warning rather than failing
/// the run on a transient condition.
async fn check_paths<F: DirLister>(
    checker: &CaseChecker<F>,
    config: &Config,
    cwd: &Path,
    mut paths: Vec<PathBuf>,
) -> CheckSummary {
    retain_matching_paths(&mut paths, &config.include);

    let root = config.root.clone().unwrap_or_else(|| cwd.to_path_buf());
    let max_parallelism = config.max_parallelism.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    let tasks = paths.iter().map(|path| {
        // join() keeps already-absolute paths as they are.
        let requested = root.join(path);
        async move { (path, checker.check(&requested).await) }
    });

    let results: Vec<_> = stream::iter(tasks).buffered(max_parallelism).collect().await;

    let mut mismatches = 0;
    for (path, result) in &results {
        match result {
            Ok(check) => match &check.status {
                CheckStatus::Match => debug!("Casing matches: {}", path.display()),
                CheckStatus::Mismatch { .. } => {
                    mismatches += 1;
                    if let Some(diagnostic) = check.diagnostic() {
                        eprintln!("{}", diagnostic);
                    }
                }
                CheckStatus::NotFound => {
                    debug!("Path does not exist (skipping): {}", path.display())
                }
            },
            Err(err) => warn!("Could not verify {}: {err}", path.display()),
        }
    }

    CheckSummary {
        checked: results.len(),
        mismatches,
    }
}

/// Collect the paths to check from the command line and, optionally, a
/// file or stdin.
fn gather_paths(paths: &[PathBuf], files_from: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut all: Vec<PathBuf> = paths.to_vec();
    if let Some(list) = files_from {
        let lines: Vec<String> = if list == Path::new("-") {
            std::io::stdin()
                .lock()
                .lines()
                .collect::<std::io::Result<_>>()
                .context("Reading paths from stdin")?
        } else {
            std::fs::read_to_string(list)
                .with_context(|| format!("Reading paths from {}", list.display()))?
                .lines()
                .map(ToOwned::to_owned)
                .collect()
        };
        all.extend(
            lines
                .iter()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .map(PathBuf::from),
        );
    }
    if all.is_empty() {
        bail!("No paths to check. Pass paths as arguments or use --files-from.");
    }
    Ok(all)
}

#[cfg(test)]
mod test {
    use crate::config::Config;

    #[test]
    fn verify_sample_config() {
        let sample_config = include_str!("../sample_config.json5");
        let _config: Config = serde_json5::from_str(&sample_config).unwrap();
    }
}
