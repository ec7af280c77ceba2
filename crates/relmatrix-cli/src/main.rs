//! relmatrix - release matrix runner
//!
//! ## Commands
//!
//! - `run`: lease a host, run every release pipeline, always clean up
//! - `plan`: print the stages each release would run, as JSON
//! - `config`: print the effective configuration as TOML

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{info, Level};

use relmatrix_ci::{
    HttpPoolClient, HttpStatusConfig, HttpStatusNotifier, JunitDirectoryPublisher, LogNotifier,
    MatrixConfig, MatrixRun, NotifierKind, PipelinePlan, SshGateway, SshProfile, StageKind,
    StatusNotifier, CONFIG_ENV,
};
use relmatrix_core::{init_tracing, LogFormat};

#[derive(Parser)]
#[command(name = "relmatrix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a multi-release validation matrix on an ephemeral host", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the matrix
    Run {
        /// Only run these releases (repeatable)
        #[arg(short, long = "release")]
        releases: Vec<String>,

        /// Override the configured status sink
        #[arg(long)]
        notifier: Option<NotifierArg>,
    },

    /// Print the stage plan of every release
    Plan {
        /// Only plan these releases (repeatable)
        #[arg(short, long = "release")]
        releases: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NotifierArg {
    Log,
    Http,
}

impl From<NotifierArg> for NotifierKind {
    fn from(arg: NotifierArg) -> Self {
        match arg {
            NotifierArg::Log => NotifierKind::Log,
            NotifierArg::Http => NotifierKind::Http,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { releases, notifier } => cmd_run(config, &releases, notifier).await,
        Commands::Plan { releases } => cmd_plan(config, &releases),
        Commands::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<MatrixConfig> {
    match path {
        Some(path) => MatrixConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let config = MatrixConfig::default();
            config.validate().context("Built-in configuration is invalid")?;
            Ok(config)
        }
    }
}

fn build_notifier(config: &MatrixConfig) -> Result<Arc<dyn StatusNotifier>> {
    match config.notifier.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Http => {
            let settings = &config.notifier;
            if settings.repository.is_empty() || settings.commit_sha.is_empty() {
                anyhow::bail!("HTTP notifier needs notifier.repository and notifier.commit_sha");
            }
            let notifier = HttpStatusNotifier::new(HttpStatusConfig {
                api_url: settings.api_url.clone(),
                repository: settings.repository.clone(),
                commit_sha: settings.commit_sha.clone(),
                token: std::env::var(&settings.token_env).ok(),
                target_url: settings.target_url.clone(),
            })
            .context("Failed to build status notifier")?;
            Ok(Arc::new(notifier))
        }
    }
}

/// Run the matrix
async fn cmd_run(
    mut config: MatrixConfig,
    releases: &[String],
    notifier: Option<NotifierArg>,
) -> Result<()> {
    config.select_releases(releases)?;
    if let Some(kind) = notifier {
        config.notifier.kind = kind.into();
    }

    let pool = HttpPoolClient::new(config.pool.http_config()).context("Failed to build pool client")?;
    let gateway = SshGateway::new(
        SshProfile::default(),
        config.paths.remote_root.clone(),
        config.paths.local_root.clone(),
    );
    let notifier = build_notifier(&config)?;

    info!(
        pool = %config.pool.name,
        releases = config.releases.len(),
        "starting matrix run"
    );

    let run = MatrixRun::from_config(
        &config,
        Arc::new(pool),
        Arc::new(gateway),
        notifier,
        Arc::new(JunitDirectoryPublisher),
    );
    let report = run.execute().await.context("Matrix run failed")?;

    println!("Run ID: {}", report.run_id);
    println!("Duration: {}ms", report.duration_ms);
    println!();
    for release in &report.outcome.releases {
        println!("{}:", release.release);
        for stage in &release.stages {
            let status = if stage.passed() { "✓" } else { "✗" };
            println!(
                "  {} {} ({}ms, {} attempt(s))",
                status,
                stage.stage,
                stage.duration_ms(),
                stage.attempts
            );
        }
    }
    if let Some(reports) = &report.reports {
        println!();
        println!(
            "Reports: {} file(s), {} test case(s), {} failure(s)",
            reports.files, reports.test_cases, reports.failures
        );
    }

    println!();
    println!("Summary: {} stage(s) passed", report.outcome.passed_count());
    Ok(())
}

fn plan_json(config: &MatrixConfig) -> Value {
    let releases: Vec<Value> = config
        .releases
        .iter()
        .map(|release| {
            let plan = PipelinePlan::for_release(release);
            let names = |kinds: &[StageKind]| kinds.iter().map(|k| k.name()).collect::<Vec<_>>();
            json!({
                "release": plan.release,
                "primary": plan.primary,
                "required": names(&plan.required),
                "branches": plan.branches.iter().map(|b| names(b)).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "setup": [StageKind::IntegrationDownload.name()],
        "releases": releases,
        "integration": config
            .releases
            .iter()
            .map(|r| format!("{}-{}", r.name, StageKind::Integration.name()))
            .collect::<Vec<_>>(),
    })
}

/// Print the stage plan
fn cmd_plan(mut config: MatrixConfig, releases: &[String]) -> Result<()> {
    config.select_releases(releases)?;
    let rendered = serde_json::to_string_pretty(&plan_json(&config))?;
    println!("{rendered}");
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &MatrixConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_run_with_filters() {
        let cli = Cli::try_parse_from([
            "relmatrix",
            "--config",
            "ci.toml",
            "run",
            "--release",
            "pip",
            "--notifier",
            "http",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
        match cli.command {
            Commands::Run { releases, notifier } => {
                assert_eq!(releases, vec!["pip".to_string()]);
                assert_eq!(notifier, Some(NotifierArg::Http));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_unknown_notifier_rejected() {
        assert!(Cli::try_parse_from(["relmatrix", "run", "--notifier", "smtp"]).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relmatrix.toml");
        std::fs::write(&path, "[[releases]]\nname = \"f33\"\nprimary = true\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.releases.len(), 1);
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_plan_json_shape() {
        let plan = plan_json(&MatrixConfig::default());

        assert_eq!(plan["setup"], json!(["integration-download"]));
        assert_eq!(plan["releases"][0]["release"], "f32");
        assert_eq!(
            plan["releases"][0]["branches"],
            json!([["docs"], ["unit", "diff-coverage"]])
        );
        assert_eq!(plan["releases"][1]["branches"].as_array().map(Vec::len), Some(5));
        assert_eq!(plan["integration"], json!(["f32-integration", "pip-integration"]));
    }

    #[test]
    fn test_http_notifier_requires_target() {
        let mut config = MatrixConfig::default();
        config.notifier.kind = NotifierKind::Http;
        assert!(build_notifier(&config).is_err());

        config.notifier.repository = "org/project".to_string();
        config.notifier.commit_sha = "abc123".to_string();
        assert!(build_notifier(&config).is_ok());
    }
}
