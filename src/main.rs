use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use podkeeper::config::Config;
use podkeeper::feed::{build_client, FeedFetcher, FeedRecord};
use podkeeper::queue::handlers::StoreImporter;
use podkeeper::queue::{
    Dispatcher, Disposition, HandleOutcome, HandlerRegistry, JobQueue, QueueOptions,
    SysinfoProbe, TaskKind, WakeReceiver, WorkerPool,
};
use podkeeper::service::{FeedService, Scheduler};
use podkeeper::storage::{
    DataKind, Database, ObjectStore, RuntimeSettings, SharedStore, StoreError,
};
use podkeeper::util::validate_url;

/// Get the config directory path (~/.config/podkeeper/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("podkeeper");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(name = "podkeeper", about = "Podcast feed keeper with a background job queue")]
struct Args {
    /// Config file (default: ~/.config/podkeeper/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a feed and start keeping it
    Add { url: String },
    /// Print a stored feed and its episodes
    Show { url: String },
    /// Re-fetch one feed now, or queue and run every due refresh
    Refresh { url: Option<String> },
    /// Forget a feed and everything stored for it
    Remove { url: String },
    /// List queued tasks
    Queue,
    /// Run queued tasks in the foreground until none are left
    Work,
    /// Run the refresh scheduler and the worker pool until interrupted
    Run,
}

/// Everything a command needs, wired once.
struct App {
    config: Config,
    media_dir: PathBuf,
    secret: String,
    queue: Arc<JobQueue>,
    service: Arc<FeedService>,
}

impl App {
    async fn open(
        config: Config,
        config_dir: &Path,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let db_path = config
            .database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("podkeeper.db"));
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
        let db = match Database::open(db_path_str).await {
            Ok(db) => db,
            Err(StoreError::InstanceLocked) => {
                eprintln!(
                    "Error: Another instance of podkeeper appears to be running. Please close it and try again."
                );
                std::process::exit(1);
            }
            Err(e) => {
                return Err(anyhow::anyhow!("Failed to open database: {}", e));
            }
        };
        let store: SharedStore = Arc::new(db);

        RuntimeSettings::seed(store.as_ref(), &RuntimeSettings::from(&config))
            .await
            .context("Failed to initialise runtime settings")?;

        let secret = config.queue_secret().expose_secret().to_string();
        let queue = Arc::new(JobQueue::new(
            Arc::clone(&store),
            dispatcher,
            Arc::new(SysinfoProbe::new()),
            SecretString::from(secret.clone()),
            QueueOptions::from(&config),
        ));

        let client = build_client(config.http_timeout()).context("Failed to build HTTP client")?;
        let fetcher = FeedFetcher::new(client, config.http_timeout());
        let service = Arc::new(FeedService::new(
            ObjectStore::new(store),
            fetcher,
            Arc::clone(&queue),
        ));

        let media_dir = config
            .media_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("media"));

        Ok(Self {
            config,
            media_dir,
            secret,
            queue,
            service,
        })
    }

    fn registry(&self) -> HandlerRegistry {
        let importer = Arc::new(StoreImporter::new(self.service.objects().clone()));
        HandlerRegistry::standard(Arc::clone(&self.service), self.media_dir.clone(), importer)
    }

    /// Handles tasks until the queue is empty, locked elsewhere, or only
    /// holds work no handler can take.
    async fn drain(&self) -> Result<usize> {
        let registry = self.registry();
        let mut handled = 0;
        loop {
            match self.queue.maybe_handle(&self.secret, &registry).await? {
                HandleOutcome::Handled(report) => {
                    println!("{:<12} {:<20} {:?}", report.task_id, report.kind, report.disposition);
                    if report.disposition == Disposition::Pending {
                        break;
                    }
                    handled += 1;
                }
                HandleOutcome::MemoryBackoff => {}
                HandleOutcome::Busy => {
                    println!("Queue is locked by another worker.");
                    break;
                }
                HandleOutcome::Empty | HandleOutcome::Rejected => break,
            }
        }
        Ok(handled)
    }
}

fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(secs: Option<u64>) -> String {
    match secs {
        Some(s) if s >= 3600 => format!("{}:{:02}:{:02}", s / 3600, s % 3600 / 60, s % 60),
        Some(s) => format!("{}:{:02}", s / 60, s % 60),
        None => "-".to_string(),
    }
}

fn print_feed(feed: &FeedRecord) {
    println!("{}", feed.title);
    if !feed.author.is_empty() {
        println!("  by {}", feed.author);
    }
    println!("  feed:     {}", feed.feed_url);
    println!(
        "  status:   {} (every ~{:.1} days, refresh {})",
        if feed.is_active { "active" } else { "inactive" },
        feed.release_cycle,
        feed.cache_duration
    );
    println!("  episodes: {}", feed.total);
    println!();
    for item in &feed.items {
        let marker = if item.post_id.is_some() { "*" } else { " " };
        println!(
            "{} {}  {:>8}  {}",
            marker,
            format_date(item.published.timestamp),
            format_duration(item.duration_secs),
            item.title
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Only `run` listens for wakes; other commands leave tasks for `work`.
    let (dispatcher, wakes) = WorkerPool::channel(config.worker_count.max(1));
    let app = App::open(config, &config_dir, Arc::new(dispatcher)).await?;

    match args.command {
        Command::Add { url } => {
            validate_url(&url).with_context(|| format!("Refusing to fetch '{}'", url))?;
            let feed = app
                .service
                .get_feed(&url)
                .await
                .with_context(|| format!("Failed to add {}", url))?;
            println!("Added \"{}\" ({} episodes)", feed.title, feed.total);
            let queued = app.queue.len().await?;
            if queued > 0 {
                println!("{} follow-up task(s) queued; run `podkeeper work` to process them.", queued);
            }
        }
        Command::Show { url } => {
            if app.service.objects().lookup(&url).await?.is_none() {
                anyhow::bail!("{} is not stored; add it first", url);
            }
            let feed = app
                .service
                .get_feed(&url)
                .await
                .with_context(|| format!("Failed to load {}", url))?;
            print_feed(&feed);
        }
        Command::Refresh { url: Some(url) } => {
            let objects = app.service.objects();
            if objects.lookup(&url).await?.is_none() {
                anyhow::bail!("{} is not stored; add it first", url);
            }
            let old = objects.get_data::<FeedRecord>(&url, DataKind::FeedData).await?;
            let feed = app
                .service
                .fetch_podcast_data(&url, old)
                .await
                .with_context(|| format!("Failed to refresh {}", url))?;
            println!("Refreshed \"{}\" ({} episodes)", feed.title, feed.total);
        }
        Command::Refresh { url: None } => {
            let tick = Duration::from_secs(app.config.tick_interval_minutes.max(1) * 60);
            let queued = Scheduler::new(Arc::clone(&app.service), tick).tick().await?;
            println!("{} feed(s) due for a refresh", queued);
            let handled = app.drain().await?;
            println!("Handled {} task(s)", handled);
        }
        Command::Remove { url } => {
            if app.service.remove(&url).await? {
                println!("Removed {}", url);
            } else {
                anyhow::bail!("{} is not stored", url);
            }
        }
        Command::Queue => {
            let tasks = app.queue.tasks().await?;
            if app.queue.is_locked().await? {
                println!("(a worker currently holds the queue lock)");
            }
            for kind in TaskKind::ALL {
                let count = tasks.iter().filter(|t| t.kind() == kind).count();
                println!("{:<20} {}", kind, count);
            }
            if !tasks.is_empty() {
                println!();
            }
            for task in &tasks {
                println!(
                    "{:<12} {:<20} priority={:<3} attempts={} routing={}",
                    task.id,
                    task.kind(),
                    task.priority,
                    task.attempts,
                    task.routing_id
                );
            }
        }
        Command::Work => {
            let handled = app.drain().await?;
            println!("Handled {} task(s)", handled);
        }
        Command::Run => run(&app, wakes).await?,
    }

    Ok(())
}

async fn run(app: &App, wakes: WakeReceiver) -> Result<()> {
    let pool = WorkerPool::spawn(
        app.config.worker_count,
        wakes,
        Arc::clone(&app.queue),
        Arc::new(app.registry()),
        Arc::new(SecretString::from(app.secret.clone())),
    );
    // Work left over from a previous run.
    app.queue.dispatch().await?;

    let tick = Duration::from_secs(app.config.tick_interval_minutes.max(1) * 60);
    let scheduler = Scheduler::new(Arc::clone(&app.service), tick).start();
    tracing::info!(
        workers = pool.len(),
        tick_minutes = tick.as_secs() / 60,
        "podkeeper running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    scheduler.abort();
    pool.shutdown();
    println!("Goodbye!");
    Ok(())
}
