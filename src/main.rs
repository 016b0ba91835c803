mod cli;

use mediastore::{config, file::MediaFile, store::MediaStore};
use mediastore_common::MediaId;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Poll interval while waiting for more converted bytes.
const EXPORT_POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediastore=trace,mediastore_media=trace,mediastore_db=debug,mediastore_common=debug"
                .to_string()
        } else {
            "mediastore=info,mediastore_media=warn,mediastore_db=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Pin { path } => pin(&path, cli.config.as_deref()),
        Commands::Unpin { media } => unpin(&media, cli.config.as_deref()),
        Commands::List { json } => list(json, cli.config.as_deref()),
        Commands::Status { media } => status(&media, cli.config.as_deref()),
        Commands::Export {
            media,
            output,
            idle_timeout,
        } => export(
            &media,
            &output,
            Duration::from_secs(idle_timeout),
            cli.config.as_deref(),
        ),
        Commands::Validate { file } => {
            let path = file.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediastore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_store(config: config::Config) -> Result<MediaStore> {
    let db_path = config.store.db_path.clone();
    let store = MediaStore::open_default(config)
        .with_context(|| format!("Failed to open catalog: {:?}", db_path))?;
    store.initialize().context("Failed to initialize media store")?;
    Ok(store)
}

fn parse_media_id(media: &str) -> Result<MediaId> {
    let media_id: MediaId = media
        .parse()
        .with_context(|| format!("Invalid media id: {}", media))?;
    if media_id.is_none() {
        anyhow::bail!("Invalid media id: {}", media);
    }
    Ok(media_id)
}

fn pin(path: &str, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    // A one-shot process would stop the conversion right away; export runs it
    config.store.open_on_pin = false;

    let store = open_store(config)?;
    let media_id = store.pin_media(path)?;
    println!("{}", media_id.store_path());
    store.deinitialize()?;
    Ok(())
}

fn unpin(media: &str, config_path: Option<&Path>) -> Result<()> {
    let media_id = parse_media_id(media)?;
    let store = open_store(config::load_config_or_default(config_path)?)?;

    if store.unpin_media(media_id)? {
        println!("Unpinned {}", media_id.store_path());
    } else {
        println!("{} is not pinned", media_id.store_path());
    }
    store.deinitialize()?;
    Ok(())
}

#[derive(Serialize)]
struct ListEntry {
    media_id: MediaId,
    url: String,
    path: String,
    pinned_at: chrono::DateTime<chrono::Utc>,
    cache_path: String,
    cached_bytes: Option<u64>,
}

fn list(json: bool, config_path: Option<&Path>) -> Result<()> {
    let store = open_store(config::load_config_or_default(config_path)?)?;

    let entries: Vec<ListEntry> = store
        .list()
        .into_iter()
        .map(|record| {
            let cache_path = store.build_local_path(&record.path);
            ListEntry {
                media_id: record.media_id,
                url: record.media_id.store_path(),
                cached_bytes: std::fs::metadata(&cache_path).ok().map(|m| m.len()),
                cache_path: cache_path.to_string_lossy().into_owned(),
                path: record.path,
                pinned_at: record.pinned_at,
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No pinned media");
    } else {
        for entry in &entries {
            let cached = entry
                .cached_bytes
                .map(|b| format!("{} bytes", b))
                .unwrap_or_else(|| "not cached".to_string());
            println!("{:>5}  {}  ({})", entry.media_id.get(), entry.path, cached);
        }
    }
    Ok(())
}

fn status(media: &str, config_path: Option<&Path>) -> Result<()> {
    let media_id = parse_media_id(media)?;
    let store = open_store(config::load_config_or_default(config_path)?)?;

    let Some(path) = store.media_path(media_id) else {
        anyhow::bail!("{} is not pinned", media_id.store_path());
    };
    let cache_path = store.build_local_path(&path);

    println!("Media: {}", media_id.store_path());
    println!("Source: {}", path);
    println!("Cache: {}", cache_path.display());
    match store.stat(media_id) {
        Ok(stat) => {
            println!("Cached: {} bytes", stat.size);
            if let Some(modified) = stat.modified {
                println!("Modified: {}", modified.to_rfc3339());
            }
        }
        Err(_) => println!("Cached: no"),
    }
    Ok(())
}

fn export(
    media: &str,
    output: &Path,
    idle_timeout: Duration,
    config_path: Option<&Path>,
) -> Result<()> {
    let media_id = parse_media_id(media)?;
    let store = open_store(config::load_config_or_default(config_path)?)?;

    let mut file = MediaFile::open(&store, &media_id.store_path())
        .with_context(|| format!("Failed to open {}", media_id.store_path()))?;
    let mut out = std::fs::File::create(output)
        .with_context(|| format!("Failed to create output file: {:?}", output))?;

    let mut buf = vec![0u8; file.chunk_size() as usize];
    let mut last_data = Instant::now();
    loop {
        match file.read(&mut buf) {
            Ok(n) => {
                out.write_all(&buf[..n])?;
                last_data = Instant::now();
            }
            Err(e) if e.is_retryable() => {
                if last_data.elapsed() >= idle_timeout {
                    break;
                }
                std::thread::sleep(EXPORT_POLL);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context("Failed to read converted media"))
            }
        }
    }
    out.flush()?;

    let content = file.content().unwrap_or_else(|| "unknown".to_string());
    println!(
        "Exported {} bytes ({}) to {}",
        file.position(),
        content,
        output.display()
    );
    file.close();
    store.deinitialize()?;
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            config::validate_config(&config)?;
            print_config(&config);
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    println!("  Cache dir: {:?}", config.store.cache_dir);
    println!("  Catalog: {:?}", config.store.db_path);
    println!("  Container: {}", config.store.container);
    println!("  Purge on unpin: {}", config.store.purge_on_unpin);
    println!("  Poll interval: {} ms", config.pipeline.poll_interval_ms);
}
