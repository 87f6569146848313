use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use photofeed::config::Config;
use photofeed::content::ImageLoader;
use photofeed::feed::{FeedEngine, Item};
use photofeed::remote::{build_client, HttpImageSource, HttpPageSource};
use photofeed::storage::{ImageCache, TargetSize};

#[derive(Parser, Debug)]
#[command(name = "photofeed", about = "Browse a paginated photo feed with a disk image cache")]
struct Args {
    /// Config file (defaults to ~/.config/photofeed/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the feed and print its items
    Browse {
        /// Pages to load, counting the first
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Print only items whose id or author contains this text
        #[arg(long)]
        search: Option<String>,

        /// Print items as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch one image through the cache
    Thumb {
        locator: String,

        #[arg(long, default_value_t = 160)]
        width: u32,

        #[arg(long, default_value_t = 160)]
        height: u32,

        /// Pixels per point (defaults to display_scale from config)
        #[arg(long)]
        scale: Option<f64>,
    },
    /// Inspect or empty the image cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Stats,
    Clear,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let Some(path) = path.or_else(Config::default_path) else {
        tracing::debug!("HOME not set and no --config given, using defaults");
        return Ok(Config::default());
    };
    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

fn print_items(items: &[Item], json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(items).context("Failed to serialize items")?;
        println!("{out}");
        return Ok(());
    }
    for item in items {
        println!(
            "{:>6}  {:<28} {:>5}x{:<5} {}",
            item.id, item.author, item.width, item.height, item.source_locator
        );
    }
    Ok(())
}

async fn browse(config: &Config, pages: u32, search: Option<String>, json: bool) -> Result<()> {
    let client = build_client(config.request_timeout()).context("Failed to build HTTP client")?;
    let source = HttpPageSource::with_client(client, &config.api_base_url, config.request_timeout())
        .with_context(|| format!("Invalid api_base_url: {}", config.api_base_url))?;
    let engine = FeedEngine::new(Arc::new(source), config.engine_config());

    if let Some(task) = engine.load() {
        task.await.context("Load task failed")?;
    }
    if let Some(err) = engine.last_error() {
        anyhow::bail!("Failed to load the first page: {err}");
    }

    for _ in 1..pages {
        let Some(task) = engine.load_more() else {
            break;
        };
        task.await.context("Load-more task failed")?;
        if let Some(err) = engine.last_error() {
            eprintln!("Warning: stopped loading pages: {err}");
            break;
        }
    }

    let items = engine.items();
    match search {
        Some(query) => {
            engine.search(query.clone()).await.context("Search task failed")?;
            let results = engine.search_results();
            print_items(&results.items, json)?;
            eprintln!(
                "{} of {} items match {:?}",
                results.items.len(),
                items.len(),
                query
            );
        }
        None => {
            print_items(&items, json)?;
            eprintln!(
                "{} items through page {}{}",
                items.len(),
                engine.cursor().page,
                if engine.has_more() { "" } else { " (end of feed)" }
            );
        }
    }
    Ok(())
}

async fn thumb(config: &Config, locator: &str, size: TargetSize, scale: f64) -> Result<()> {
    let cache = ImageCache::open(config.cache_config()).context("Failed to open image cache")?;
    let source = HttpImageSource::new(config.request_timeout()).context("Failed to build HTTP client")?;
    let loader = ImageLoader::new(cache.clone(), Arc::new(source));

    let image = loader
        .load(locator, size, scale)
        .await
        .with_context(|| format!("Failed to load {locator}"))?;
    println!("{}x{}", image.width(), image.height());

    // Wait for the background store by queueing behind it.
    let usage = cache.current_disk_usage().await;
    eprintln!("Cache holds {usage} bytes in {}", cache.root().display());
    Ok(())
}

async fn cache_command(config: &Config, action: CacheAction) -> Result<()> {
    let cache = ImageCache::open(config.cache_config()).context("Failed to open image cache")?;
    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await;
            println!("root:    {}", cache.root().display());
            println!("entries: {}", stats.total_entries);
            println!("bytes:   {} (budget {})", stats.total_size_bytes, config.max_disk_bytes);
            if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
                println!("oldest:  {}", oldest.format("%Y-%m-%d %H:%M:%S"));
                println!("newest:  {}", newest.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        CacheAction::Clear => {
            cache.clear().await;
            println!("Cleared {}", cache.root().display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(args.config)?;

    match args.command {
        Command::Browse {
            pages,
            search,
            json,
        } => browse(&config, pages, search, json).await,
        Command::Thumb {
            locator,
            width,
            height,
            scale,
        } => {
            let scale = scale.unwrap_or(config.display_scale);
            thumb(&config, &locator, TargetSize::new(width, height), scale).await
        }
        Command::Cache { action } => cache_command(&config, action).await,
    }
}
