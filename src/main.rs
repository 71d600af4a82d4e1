use anyhow::{Context, Result};
use clap::Parser;
use kiln::config::Config;
use kiln::plugins::{DylibOpener, ModuleSummary, OrderingPolicy};
use kiln::services::LogLevel;
use kiln::{HeadlessEngine, HostContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Kiln - plugin runtime host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Additional plugin directory, searched before the default one (repeatable)
    #[arg(short = 'p', long = "plugin-path")]
    plugin_path: Vec<PathBuf>,

    /// Boot, print the plugin table and exit
    #[arg(short, long)]
    list: bool,

    /// Print the plugin table as JSON (with --list)
    #[arg(long, requires = "list")]
    json: bool,

    /// Order plugins by their declared requirements instead of priority only
    #[arg(long)]
    dependency_order: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::load_from_file(config_path)?
    } else {
        Config::load_default()?
    };
    if args.debug {
        config.logging.level = LogLevel::Debug;
    }
    if args.dependency_order {
        config.plugins.ordering = OrderingPolicy::Dependencies;
    }

    // Logs go to stderr so that --list output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    let mut host = HostContext::new(config, Box::new(DylibOpener::new()))?;
    let engine = Arc::new(HeadlessEngine::new());
    host.attach_engine(engine);

    host.boot(&args.plugin_path);

    if args.list {
        let summaries = host.manager().summaries();
        if args.json {
            let json =
                serde_json::to_string_pretty(&summaries).context("Failed to serialize plugin list")?;
            println!("{json}");
        } else {
            print_table(&summaries);
        }
        host.shutdown();
        return Ok(());
    }

    host.show_main_page();
    info!("Kiln is running; press Ctrl+C to quit");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Shutting down");
    host.shutdown();
    Ok(())
}

fn print_table(summaries: &[ModuleSummary]) {
    if summaries.is_empty() {
        println!("No plugins found.");
        return;
    }
    println!("{:<32} {:<10} {:>8}  {:<12} ERROR", "ID", "VERSION", "PRIORITY", "STATE");
    for summary in summaries {
        println!(
            "{:<32} {:<10} {:>8}  {:<12} {}",
            summary.id,
            summary.version,
            summary.priority,
            summary.state.to_string(),
            summary.last_error.as_deref().unwrap_or("-")
        );
    }
}
