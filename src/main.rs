mod codec;
mod config;
mod driver;
mod merge;
mod parser;
mod persist;
mod record;
mod session;
mod site;
mod store;
mod walker;

use std::ffi::OsString;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use config::{Credentials, SearchFilter, Settings, Timing};
use driver::chrome::ChromeDriver;
use driver::Driver;
use persist::{FlushLatch, OutputLayout, Persister};
use record::Field;
use site::SiteLayout;
use walker::{PaginationWalker, RunState};

#[derive(Parser)]
#[command(name = "mls_agents", about = "Scrape MLS listing agents into a deduplicated CSV")]
struct Cli {
    /// Directory holding agents.csv, instances/ and checkpoints/
    #[arg(long, env = "OUTPUT_DIR", default_value = "output", global = true)]
    output_dir: PathBuf,

    /// Defaults to `run` with settings from the environment
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in, walk the search results and merge the agents found
    Run(Settings),
    /// Merge a saved instance snapshot (or any agents CSV) into the dataset
    Merge {
        file: PathBuf,
    },
    /// Show dataset statistics
    Stats,
}

/// Everything a scrape needs, checked before the browser starts.
struct Job {
    layout: SiteLayout,
    login_url: String,
    credentials: Credentials,
    filter: Option<SearchFilter>,
    timing: Timing,
    limit: Option<usize>,
}

impl Job {
    fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            layout: SiteLayout::default(),
            login_url: settings.login_url.clone(),
            credentials: settings.credentials()?,
            filter: settings.search_filter()?,
            timing: settings.timing(),
            limit: settings.limit,
        })
    }
}

// Every handled failure still exits 0 so a partial scrape is not reported
// as a hard failure by whatever scheduled it.
#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let Some((output_dir, command)) = parse_args(std::env::args_os()) else {
        return Ok(());
    };
    let persister = Persister::new(OutputLayout::new(&output_dir));

    let result = match command {
        Commands::Run(settings) => run(&settings, &persister).await,
        Commands::Merge { file } => merge_file(&file, &persister),
        Commands::Stats => stats(&persister),
    };

    if let Err(e) = result {
        error!("{:#}", e);
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

/// Resolve the command line. Help, version and usage errors are printed
/// here and give `None`.
fn parse_args<I, T>(args: I) -> Option<(PathBuf, Commands)>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let parsed = Cli::try_parse_from(args).and_then(|cli| {
        let command = match cli.command {
            Some(command) => command,
            None => Commands::Run(Settings::from_env()?),
        };
        Ok((cli.output_dir, command))
    });

    match parsed {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            if e.use_stderr() {
                error!("Invalid settings, nothing to do");
            }
            let _ = e.print();
            None
        }
    }
}

async fn run(settings: &Settings, persister: &Persister) -> Result<()> {
    let job = Job::from_settings(settings)?;

    info!(headless = settings.headless, "Opening browser...");
    let driver = ChromeDriver::launch(settings.headless).await?;

    let mut state = RunState::default();
    let latch = FlushLatch::new();
    let mut saved =
        guarded_scrape(&driver, &job, persister, &latch, &mut state, shutdown_signal()).await;

    if let Err(e) = driver.shutdown().await {
        warn!("Browser shutdown failed: {:#}", e);
    }

    // No-op when the scrape already flushed.
    if let Some(flushed) = latch.flush_once(|| flush(persister, &state)) {
        saved = flushed;
    }
    saved
}

/// Scrape until finished, failed or `stop` resolves. A scrape that does not
/// finish is flushed here through `latch`, and the flush result returned.
async fn guarded_scrape<D: Driver>(
    driver: &D,
    job: &Job,
    persister: &Persister,
    latch: &FlushLatch,
    state: &mut RunState,
    stop: impl Future<Output = &'static str>,
) -> Result<()> {
    let outcome = tokio::select! {
        res = scrape(driver, job, state) => res,
        signal = stop => Err(anyhow!("interrupted by {}", signal)),
    };

    let Err(e) = outcome else {
        return Ok(());
    };
    error!("--- SOMETHING WENT WRONG --- {:#}", e);
    error!("Stopped at listing {} ({})", state.index, state.stage);
    error!("Attempting to save the {} agents scraped so far", state.store.len());
    latch
        .flush_once(|| flush(persister, state))
        .unwrap_or(Ok(()))
}

async fn scrape<D: Driver>(driver: &D, job: &Job, state: &mut RunState) -> Result<()> {
    let session = session::open(
        driver,
        &job.layout,
        &job.login_url,
        &job.credentials,
        job.filter.as_ref(),
        &job.timing,
    )
    .await?;
    let walker = PaginationWalker::new(driver, &job.layout, job.timing, session.origin);
    walker
        .walk(session.total_listings, job.limit, state)
        .await?;
    Ok(())
}

fn flush(persister: &Persister, state: &RunState) -> Result<()> {
    if state.store.is_empty() {
        warn!("No agents scraped this run");
    } else {
        info!("Preparing {} agents for writing...", state.store.len());
    }
    let written = persister.persist_run(state.store.batch(), Utc::now().timestamp_millis())?;
    if let Some(instance) = &written.instance {
        info!("Instance snapshot: {}", instance.display());
    }
    info!("Checkpoint: {}", written.checkpoint.display());
    written.summary.print();
    println!("Error/Skipped count: {}", state.errors);
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            return tokio::select! {
                _ = ctrl_c() => "Ctrl-C",
                _ = term.recv() => "SIGTERM",
            };
        }
    }
    ctrl_c().await;
    "Ctrl-C"
}

/// Resolves on Ctrl-C; never, if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn merge_file(file: &Path, persister: &Persister) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let records = codec::decode(&bytes)
        .with_context(|| format!("Failed to decode {}", file.display()))?;
    info!("Merging {} rows from {}", records.len(), file.display());

    let written = persister.merge_into_dataset(records, Utc::now().timestamp_millis())?;
    written.summary.print();
    Ok(())
}

fn stats(persister: &Persister) -> Result<()> {
    let layout = persister.layout();
    let Some(data) = persister.load_dataset()? else {
        println!("No dataset at {}. Run 'run' first.", layout.dataset().display());
        return Ok(());
    };

    println!("Agents:      {}", data.len());
    for field in &Field::ALL[Field::Office as usize..] {
        let n = data.iter().filter(|r| !r.get(*field).trim().is_empty()).count();
        println!("{:<12} {}", format!("{}:", field.header()), n);
    }
    println!("Instances:   {}", count_files(&layout.instances_dir())?);
    println!("Checkpoints: {}", count_files(&layout.checkpoints_dir())?);
    Ok(())
}

fn count_files(dir: &Path) -> Result<usize> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries.filter_map(|e| e.ok()).filter(|e| e.path().is_file()).count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
