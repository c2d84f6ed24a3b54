//! embedwatch - follow embedding jobs and manage their schedules from a terminal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};
use secrecy::SecretString;

use embedwatch::progress::{format_duration, summary_line};
use embedwatch::schedule::{describe, format_countdown};
use embedwatch::{
    default_config_path, init_logging, load_config, resolve_credential, CancelOutcome,
    HttpApiClient, JobApi, JobTracker, LogFormat, ReconcilerSettings, ScheduleApi,
    ScheduleDescriptor, ScheduleEngine, TrackerCallbacks, TrackerOutcome, TrackerPhase,
    WatchConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/embedwatch/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server base URL, overrides the config file
    #[arg(long, global = true, env = "EMBEDWATCH_API_URL")]
    api_url: Option<String>,

    /// Bearer credential, used when the config names no credential source
    #[arg(long, global = true, env = "EMBEDWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log format
    #[arg(long, global = true, value_enum, default_value_t = LogOutput::Text)]
    log_format: LogOutput,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogOutput {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a job until it finishes. Ctrl-C requests cancellation.
    Watch {
        job_id: String,
        /// Poll only, never open the push channel
        #[arg(long)]
        no_push: bool,
    },
    /// Ask the server to cancel a job
    Cancel { job_id: String },
    /// Inspect and manage the schedule of a vector database
    #[command(subcommand)]
    Schedule(ScheduleCommand),
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    /// Show the schedule; with --follow keep a live countdown
    Show {
        target: String,
        #[arg(long)]
        follow: bool,
    },
    /// Create or replace the schedule
    Set {
        target: String,
        #[command(subcommand)]
        rule: ScheduleRule,
        /// Store the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Remove the schedule
    Delete { target: String },
    /// Run the scheduled job now
    Trigger { target: String },
}

#[derive(Subcommand, Debug)]
enum ScheduleRule {
    /// Every hour at the given minute
    Hourly { minute: u32 },
    /// Every N minutes
    Interval { minutes: u32 },
    /// Every day at HH MM
    Daily { hour: u32, minute: u32 },
    /// Every week; day 0 = Monday
    Weekly { day: u32, hour: u32, minute: u32 },
    /// Five-field cron expression
    Custom { cron: String },
}

impl ScheduleRule {
    fn into_descriptor(self, target: &str) -> ScheduleDescriptor {
        match self {
            ScheduleRule::Hourly { minute } => ScheduleDescriptor::hourly(target, minute),
            ScheduleRule::Interval { minutes } => ScheduleDescriptor::interval(target, minutes),
            ScheduleRule::Daily { hour, minute } => ScheduleDescriptor::daily(target, hour, minute),
            ScheduleRule::Weekly { day, hour, minute } => {
                ScheduleDescriptor::weekly(target, day, hour, minute)
            }
            ScheduleRule::Custom { cron } => ScheduleDescriptor::custom(target, &cron),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogOutput::Text => LogFormat::Text,
        LogOutput::Json => LogFormat::Json,
    };
    init_logging(format, cli.debug.then_some("debug"));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = resolve_config(&cli)?;
    let credential = match resolve_credential(&config.credential)? {
        Some(secret) => Some(secret),
        None => cli
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(SecretString::from),
    };
    debug!(
        "Using server {} ({})",
        config.api_url,
        if credential.is_some() { "authenticated" } else { "anonymous" }
    );

    match cli.command {
        Command::Watch { job_id, no_push } => watch(&config, credential, &job_id, no_push).await,
        Command::Cancel { job_id } => {
            let api = HttpApiClient::from_config(&config, credential)?;
            let ack = api.cancel_job(&job_id).await?;
            println!(
                "{}",
                ack.message
                    .unwrap_or_else(|| format!("Cancellation requested for {}", job_id))
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Schedule(command) => schedule(&config, credential, command).await,
    }
}

fn resolve_config(cli: &Cli) -> Result<WatchConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));

    let mut config = match (path, &cli.api_url) {
        (Some(path), _) => load_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        (None, Some(url)) => WatchConfig::new(url),
        (None, None) => bail!("No config file found; pass --config or --api-url"),
    };

    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    Ok(config)
}

async fn watch(
    config: &WatchConfig,
    credential: Option<SecretString>,
    job_id: &str,
    no_push: bool,
) -> Result<ExitCode> {
    let mut tracker = if no_push {
        let api = Arc::new(HttpApiClient::from_config(config, credential.clone())?);
        JobTracker::new(
            job_id,
            credential,
            api,
            None,
            ReconcilerSettings::from_config(config),
        )
    } else {
        JobTracker::from_config(job_id, credential, config)?
    };
    tracker.set_callbacks(
        TrackerCallbacks::new()
            .on_complete(|clean| {
                if clean {
                    println!("Job completed");
                } else {
                    println!("Job completed with failed documents");
                }
            })
            .on_error(|message| println!("Job failed: {}", message))
            .on_cancel(|| println!("Job cancelled")),
    );

    let mut views = tracker.subscribe();
    let printer = tokio::spawn(async move {
        let mut last_line = String::new();
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            let line = match (&view.phase, &view.snapshot) {
                (TrackerPhase::Active(_), Some(snapshot)) => summary_line(snapshot),
                _ => continue,
            };
            if line != last_line {
                println!("{}", line);
                for error in view.snapshot.iter().flat_map(|s| s.displayed_errors()) {
                    println!("  ! {}", error);
                }
                last_line = line;
            }
        }
    });

    let cancel = tracker.cancel_handle();
    let outcome = {
        let run = tracker.run();
        tokio::pin!(run);
        loop {
            tokio::select! {
                outcome = &mut run => break outcome?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, requesting cancellation");
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        match cancel.cancel().await {
                            Ok(CancelOutcome::Requested(_)) => println!("Cancelling..."),
                            Ok(CancelOutcome::AlreadyPending) => println!("Cancel already requested"),
                            Ok(CancelOutcome::AlreadyFinished) => {}
                            Err(e) => eprintln!("Cancel failed: {}", e),
                        }
                    });
                }
            }
        }
    };
    printer.abort();

    Ok(match outcome {
        TrackerOutcome::Completed { clean: true } => ExitCode::SUCCESS,
        TrackerOutcome::Completed { clean: false } => ExitCode::from(2),
        TrackerOutcome::Failed { .. } => ExitCode::from(3),
        TrackerOutcome::Cancelled => ExitCode::from(4),
        TrackerOutcome::ConnectionLost { reason } => {
            eprintln!("Connection lost: {}", reason);
            ExitCode::from(5)
        }
    })
}

async fn schedule(
    config: &WatchConfig,
    credential: Option<SecretString>,
    command: ScheduleCommand,
) -> Result<ExitCode> {
    match command {
        ScheduleCommand::Show { target, follow } => {
            let mut engine = ScheduleEngine::from_config(config, credential, &target)?;
            engine.load().await?;
            print_schedule(&engine);
            if !follow {
                return Ok(ExitCode::SUCCESS);
            }

            let mut views = engine.subscribe();
            engine.start();
            loop {
                tokio::select! {
                    changed = views.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let view = views.borrow_and_update().clone();
                        match (view.countdown_label(), view.error) {
                            (_, Some(error)) => {
                                println!("{}: {}", target, error);
                                engine.dismiss_error();
                            }
                            (Some(label), None) => println!("{}: next run {}", target, label),
                            (None, None) => {}
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            engine.stop();
            Ok(ExitCode::SUCCESS)
        }
        ScheduleCommand::Set {
            target,
            rule,
            disabled,
        } => {
            let engine = ScheduleEngine::from_config(config, credential, &target)?;
            let mut descriptor = rule.into_descriptor(&target);
            descriptor.enabled = !disabled;
            engine.create_or_update(&descriptor).await?;
            print_schedule(&engine);
            Ok(ExitCode::SUCCESS)
        }
        ScheduleCommand::Delete { target } => {
            let engine = ScheduleEngine::from_config(config, credential, &target)?;
            engine.delete().await?;
            println!("Schedule for {} deleted", target);
            Ok(ExitCode::SUCCESS)
        }
        ScheduleCommand::Trigger { target } => {
            let api = HttpApiClient::from_config(config, credential)?;
            let ack = api.trigger_schedule(&target).await?;
            match (ack.job_id, ack.message) {
                (Some(job_id), _) => println!("Started job {}", job_id),
                (None, Some(message)) => println!("{}", message),
                (None, None) => println!("Run triggered for {}", target),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_schedule(engine: &ScheduleEngine) {
    let view = engine.view();
    let Some(descriptor) = &view.descriptor else {
        println!("{}: no schedule configured", view.target);
        return;
    };

    println!("{}: {}", view.target, describe(descriptor));
    if !descriptor.enabled {
        println!("  disabled");
    } else if let Some(secs) = view.countdown_seconds {
        println!("  next run {}", format_countdown(secs));
    }
    if let Some(last_run) = descriptor.last_run_time() {
        let status = descriptor.last_run_status.as_deref().unwrap_or("unknown");
        let ago = (Utc::now() - last_run).num_seconds().max(0) as u64;
        println!("  last run {} ago ({})", format_duration(ago), status);
    }
}
