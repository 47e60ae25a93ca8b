//! Droidtail
//!
//! Runs `adb logcat` (or any line-oriented command) through the droidtail
//! filtering pipeline and prints the matching lines with highlighting.

use clap::Parser;
use droidtail_client::{TerminalUi, UiConfig};
use droidtail_common::{
    init_logging_to_stderr, ConfigManager, DroidtailError, FilteringSession, LogCommand,
    SessionEvent,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "droidtail")]
#[command(about = "Live keyword filtering and highlighting for adb logcat")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (TOML or YAML)
    #[arg(short, long, default_value = "droidtail.toml")]
    config: String,

    /// Keyword lines must contain; empty shows every line
    #[arg(short, long)]
    keyword: Option<String>,

    /// Treat the keyword as a regular expression
    #[arg(short = 'e', long)]
    regex: bool,

    /// Match the keyword case-sensitively
    #[arg(short = 's', long)]
    case_sensitive: bool,

    /// Do not highlight keyword matches
    #[arg(long)]
    no_highlight: bool,

    /// Disable ANSI colors
    #[arg(long)]
    no_color: bool,

    /// Maximum number of lines kept in the display buffer
    #[arg(short = 'n', long)]
    max_lines: Option<usize>,

    /// Print a pipeline status line every N seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    stats_interval: u64,

    /// Print status as JSON instead of a text line
    #[arg(long)]
    stats_json: bool,

    /// Log command to run instead of the configured one
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load_or_default(&cli.config).await?;
    let mut config = manager.get_config();

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    init_logging_to_stderr(&log_level)?;

    if let Some(path) = manager.config_path() {
        info!("Using configuration from: {}", path.display());
    }

    // Command line overrides configuration
    if let Some(keyword) = cli.keyword {
        config.filter.keyword = keyword;
    }
    if cli.regex {
        config.filter.use_regex = true;
    }
    if cli.case_sensitive {
        config.filter.case_sensitive = true;
    }
    if cli.no_highlight {
        config.filter.highlight_enabled = false;
    }
    if let Some(max_lines) = cli.max_lines {
        config.adaptive.set_max_display_lines(max_lines);
    }
    if let Some((program, args)) = cli.command.split_first() {
        config.command = LogCommand::new(program.clone()).args(args.iter().cloned());
    }
    config.validate()?;

    let session = FilteringSession::new(config.adaptive.clone());
    let mut lines = session.subscribe_lines();
    let mut events = session.subscribe_events();

    if let Err(e) = session.start(config.filter.clone(), &config.command).await {
        report_start_failure(&e);
        return Err(e.into());
    }

    let mut ui = TerminalUi::new(UiConfig {
        use_colors: !cli.no_color,
        ..Default::default()
    });

    // Pipeline metrics go to the debug log alongside the other verbose output
    let metrics_task = cli
        .verbose
        .then(|| session.monitor().start_monitoring(Duration::from_secs(5)));

    let stats_enabled = cli.stats_interval > 0;
    let mut stats_timer = tokio::time::interval(Duration::from_secs(cli.stats_interval.max(1)));
    let mut stopping = false;

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Ok(line) => ui.print_line(&line)?,
                Err(RecvError::Lagged(skipped)) => ui.record_skipped(skipped)?,
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    ui.print_event(&event)?;
                    if matches!(event, SessionEvent::Stopped { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = stats_timer.tick(), if stats_enabled => {
                print_stats(&session, &ui, cli.stats_json)?;
            }
            result = tokio::signal::ctrl_c(), if !stopping => {
                if let Err(e) = result {
                    warn!("Failed to listen for ctrl+c: {}", e);
                }
                info!("Stopping...");
                stopping = true;
                session.stop().await?;
            }
        }
    }

    // Lines published before the stop event
    while let Ok(line) = lines.try_recv() {
        ui.print_line(&line)?;
    }

    if let Some(task) = metrics_task {
        task.abort();
    }
    if stats_enabled {
        print_stats(&session, &ui, cli.stats_json)?;
    }
    info!(
        printed = ui.lines_printed(),
        skipped = ui.lines_skipped(),
        "Shutting down"
    );
    Ok(())
}

fn print_stats(session: &FilteringSession, ui: &TerminalUi, as_json: bool) -> anyhow::Result<()> {
    let snapshot = session.snapshot()?;
    if as_json {
        eprintln!("{}", serde_json::to_string(&snapshot)?);
    } else {
        ui.print_status(&snapshot)?;
    }
    Ok(())
}

fn report_start_failure(e: &DroidtailError) {
    error!(category = ?e.category(), "Failed to start filtering: {}", e);
    if let Some(suggestion) = e.recovery_suggestion() {
        error!("{}", suggestion);
    }
}
