//! Codepool CLI
//!
//! A command-line tool for running code in pooled container sandboxes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codepool::{
    Config, DockerRuntime, EXAMPLE_CONFIG, ExecutionEngine, ExecutionRequest, ExecutionResult,
    ExecutionStatus, LanguageRegistry, SandboxPool, SandboxState,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

/// Exit code used when a program hits its deadline
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser)]
#[command(name = "codepool")]
#[command(about = "A tool for running untrusted code in pooled container sandboxes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codepool.toml)
        #[arg(short, long, default_value = "codepool.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program in its language's sandbox
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python, javascript)
        #[arg(short, long)]
        language: String,

        /// Input file (default: empty input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Deadline in seconds (overrides the configured timeout)
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Print the whole result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Provision every language and report its sandbox state
    Check,

    /// List available languages
    Languages,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            input,
            timeout,
            json,
        } => {
            let code = run_program(config, &source, &language, input.as_deref(), timeout, json)
                .await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Check => check_sandboxes(&config).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Connect to the runtime and build a pool over the configured languages
fn build_pool(config: &Config) -> Result<Arc<SandboxPool>> {
    let runtime = DockerRuntime::connect_with(config.docker_socket.as_deref())
        .context("failed to connect to docker")?;
    let registry = Arc::new(LanguageRegistry::from_config(config));
    Ok(Arc::new(SandboxPool::new(Arc::new(runtime), registry, config)))
}

/// Run one program, returning the process exit code
async fn run_program(
    mut config: Config,
    source: &Path,
    language_id: &str,
    input: Option<&Path>,
    timeout: Option<f64>,
    json: bool,
) -> Result<i32> {
    // Only provision the language being run
    config
        .retain_language(language_id)
        .context("unknown language")?;

    if let Some(timeout) = timeout {
        Config::parse_timeout(timeout).context("invalid --timeout")?;
        config.timeout = timeout;
    }

    let source_content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let stdin = match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .context("failed to read input file")?,
        None => String::new(),
    };

    let pool = build_pool(&config)?;
    pool.initialize()
        .await
        .context("failed to initialize sandbox pool")?;

    let engine = ExecutionEngine::from_config(Arc::clone(&pool), &config);
    let request = ExecutionRequest::new(language_id, source_content).with_stdin(stdin);

    info!(language = language_id, "running program");
    let outcome = engine.execute(&request).await;

    pool.shutdown().await;

    let result = outcome.context("execution failed")?;
    print_result(&result, json)?;

    Ok(exit_code_for(&result))
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(result).context("failed to serialize result")?;
        println!("{rendered}");
        return Ok(());
    }

    if !result.stdout.is_empty() {
        println!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(
        status = %result.status,
        elapsed = format_args!("{:.1}ms", result.elapsed_millis),
        exit_code = ?result.exit_code,
        "execution result"
    );
    Ok(())
}

fn exit_code_for(result: &ExecutionResult) -> i32 {
    match result.status {
        ExecutionStatus::Completed => 0,
        ExecutionStatus::Timeout => TIMEOUT_EXIT_CODE,
        ExecutionStatus::Error => match result.exit_code {
            Some(code) if code != 0 => i32::try_from(code).unwrap_or(1),
            _ => 1,
        },
    }
}

async fn check_sandboxes(config: &Config) -> Result<()> {
    let pool = build_pool(config)?;
    pool.initialize()
        .await
        .context("failed to initialize sandbox pool")?;

    let status = pool.status();
    pool.shutdown().await;

    println!("Sandbox status:\n");
    for entry in &status {
        println!(
            "  {:<15} {:<12} {} instance(s)",
            entry.language, entry.state, entry.instances
        );
    }

    let failed: Vec<&str> = status
        .iter()
        .filter(|entry| entry.state == SandboxState::Failed)
        .map(|entry| entry.language.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("sandboxes failed to provision: {}", failed.join(", "));
    }
    Ok(())
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let registry = LanguageRegistry::from_config(config);
    for id in registry.ids() {
        if let Some(lang) = registry.definition_for(id) {
            println!("  {:<15} {} ({})", id, lang.name, lang.image);
        }
    }
}

fn show_config(config: &Config) {
    let limits = &config.limits;
    println!("Default resource limits:");
    println!("  Memory: {:?} MB", limits.memory_mb);
    println!("  CPU period: {:?}", limits.cpu_period);
    println!("  CPU quota: {:?}", limits.cpu_quota);
    println!("  Pids limit: {:?}", limits.pids_limit);
    println!("  Network disabled: {:?}", limits.network_disabled);
    println!();
    println!("Strategy: {:?}", config.strategy);
    println!("Timeout: {}s", config.timeout);
    println!("Kill on timeout: {}", config.kill_on_timeout);
    println!("Max output: {:?} bytes", config.max_output);
    println!(
        "Staging: {} -> {}",
        config.staging_dir.display(),
        config.sandbox_dir
    );
    match &config.docker_socket {
        Some(socket) => println!("Docker socket: {}", socket.display()),
        None => println!("Docker socket: local defaults"),
    }
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
