mod types;

pub use types::*;

use anyhow::{Context, Result};
use mediastore_common::paths::is_container_extension;
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    expand_paths(&mut config.store);

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = ["./mediastore.toml", "~/.config/mediastore/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    expand_paths(&mut config.store);
    Ok(config)
}

fn expand_paths(store: &mut StoreConfig) {
    store.cache_dir = expand_tilde(&store.cache_dir);
    store.db_path = expand_tilde(&store.db_path);
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if !is_container_extension(&config.store.container) {
        anyhow::bail!(
            "Unknown container '{}' (expected one of: mkv, mka, flv)",
            config.store.container
        );
    }

    if config.pipeline.poll_interval_ms == 0 {
        anyhow::bail!("Pipeline poll interval cannot be 0");
    }

    if config.cache.rate_window_ms == 0 {
        anyhow::bail!("Cache rate window cannot be 0");
    }

    if config.cache.chunk_size == 0 {
        anyhow::bail!("Cache chunk size cannot be 0");
    }

    if config.cache.readahead_bytes == 0 {
        tracing::warn!("Cache readahead is 0, cache level will always report full");
    }

    Ok(())
}
