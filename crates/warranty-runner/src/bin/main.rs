use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use warranty_retention::{task, RetentionTracker};
use warranty_runner::{certificate, Config, Params, RegistrationRequest, RetryConfig, Runner};

#[derive(Parser)]
#[command(name = "warranty-runner")]
#[command(about = "Automated warranty registration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Register the products in a request file
    Run {
        /// Registration request (JSON)
        request: PathBuf,

        /// Config file
        #[arg(short, long)]
        config: PathBuf,

        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,

        /// Whole-run attempts (overrides config)
        #[arg(long)]
        attempts: Option<u32>,

        /// Delay between attempts in milliseconds (overrides config)
        #[arg(long, value_name = "MS")]
        retry_delay_ms: Option<u64>,

        /// Write the result JSON here as well as to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Copy the certificate PDF here on success
        #[arg(long)]
        certificate_out: Option<PathBuf>,

        /// Set a config parameter (can be used multiple times)
        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Validate a config file without running
    Check {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Run certificate retention passes
    Cleanup {
        #[arg(short, long)]
        config: PathBuf,

        /// Keep running, one pass every SECS seconds
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,

        #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> warranty_runner::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            request,
            config,
            headless,
            attempts,
            retry_delay_ms,
            output,
            certificate_out,
            params,
        } => {
            let mut config = load_config(&config, &params)?;
            if headless {
                config.browser.headless = Some(true);
            }
            let retry = RetryConfig {
                attempts: attempts.unwrap_or(config.retry.attempts),
                delay_ms: retry_delay_ms.unwrap_or(config.retry.delay_ms),
                deadline_secs: config.retry.deadline_secs,
            };

            let request: RegistrationRequest =
                serde_json::from_str(&std::fs::read_to_string(&request)?)?;
            let runner = Runner::new(config)?;
            let result = runner.register_with_retry(&request, &retry).await;

            if let Some(cert) = &result.certificate {
                if let Some(dest) = &certificate_out {
                    let n = certificate::export(cert, dest)?;
                    info!("Wrote certificate to {} ({} bytes)", dest.display(), n);
                }
                // handing the result back counts as delivery
                if let Some(tracker) = runner.tracker() {
                    if let Err(e) = tracker.mark_delivered(&cert.filename) {
                        warn!("Failed to mark {} delivered: {}", cert.filename, e);
                    }
                }
            }

            let json = serde_json::to_string_pretty(&result)?;
            println!("{}", json);
            if let Some(path) = &output {
                std::fs::write(path, &json)?;
            }

            if !result.success {
                std::process::exit(1);
            }
        }

        Command::Check { config, params } => {
            let config = load_config(&config, &params)?;
            let posture = config.posture();
            let table = config.selector_table()?;

            println!("Config valid");
            println!("  Target: {}", config.target.url);
            println!("  Environment: {:?}", config.environment);
            println!(
                "  Browser: headless={}, slow_mo={}ms, viewport={}x{}",
                posture.headless,
                posture.slow_mo_ms,
                posture.viewport.width,
                posture.viewport.height
            );
            println!(
                "  Timeouts: default={}ms, probe={}ms",
                config.timeouts.default_ms, config.timeouts.probe_ms
            );
            println!(
                "  Certificates: {} (retention {}h)",
                config.downloads.dir.display(),
                config.downloads.retention_hours
            );
            println!("  Retry attempts: {}", config.retry.attempts);
            println!("  Selectors: {} ({} overridden)", table.len(), config.selectors.len());
            for (name, strategies) in table.iter() {
                let list: Vec<String> = strategies.iter().map(|s| s.to_string()).collect();
                println!("    - {}: {}", name, list.join(", "));
            }
        }

        Command::Cleanup {
            config,
            every,
            params,
        } => {
            let config = load_config(&config, &params)?;
            let hours = i64::try_from(config.downloads.retention_hours).map_err(|_| {
                warranty_runner::Error::Config("downloads.retention_hours is too large".into())
            })?;
            let tracker = Arc::new(RetentionTracker::with_hours(&config.downloads.dir, hours)?);

            if let Some(secs) = every {
                println!(
                    "Retention passes on {} every {}s (Ctrl-C to stop)",
                    config.downloads.dir.display(),
                    secs
                );
                let handle = task::spawn_cleanup_task(tracker, Duration::from_secs(secs.max(1)));
                tokio::signal::ctrl_c().await?;
                handle.abort();
                return Ok(());
            }

            let report = task::cleanup(tracker).await?;

            println!("Retention pass on {}", config.downloads.dir.display());
            println!("  Expired: {}", report.expired.len());
            for name in &report.expired {
                println!("    - {}", name);
            }
            println!("  Orphaned: {}", report.orphaned.len());
            for name in &report.orphaned {
                println!("    - {}", name);
            }
            println!("  Retained: {}", report.retained);
        }
    }

    Ok(())
}

fn load_config(path: &Path, args: &[String]) -> warranty_runner::Result<Config> {
    let params = Params::from_env().with_args(args)?;
    Config::load_with_params(path, &params)
}

fn init_logging(verbose: u8, quiet: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .init();
        return;
    }

    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}
