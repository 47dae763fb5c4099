use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use tracing::{debug, warn};

use trawl_common::{Error, Result};

use crate::{env_subst::substitute_env, schema::TrawlConfig};

mod ctx {
    use trawl_common::{Error, Result};
    trawl_common::impl_context!();
}

use ctx::Context;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["trawl.toml", "trawl.yaml", "trawl.yml", "trawl.json"];

static CONFIG_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Use `dir` instead of `~/.config/trawl/` for config discovery.
///
/// Only the first call has an effect.
pub fn set_config_dir(dir: PathBuf) {
    if CONFIG_DIR_OVERRIDE.set(dir).is_err() {
        warn!("config dir override already set, ignoring");
    }
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE.get() {
        return Some(dir.clone());
    }
    directories::ProjectDirs::from("", "", "trawl").map(|d| d.config_dir().to_path_buf())
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<TrawlConfig> {
    let raw = std::fs::read_to_string(path)
        .context(format!("failed to read {}", path.display()))?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./trawl.{toml,yaml,yml,json}`
/// 2. `<config dir>/trawl.{toml,yaml,yml,json}`
///
/// Falls back to [`TrawlConfig::default()`] when nothing is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> TrawlConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return TrawlConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            TrawlConfig::default()
        },
    }
}

/// First existing config file in the search order, if any.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> Result<TrawlConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).context(format!("invalid TOML in {}", path.display())),
        "yaml" | "yml" => {
            serde_yaml::from_str(raw).context(format!("invalid YAML in {}", path.display()))
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::message(format!("unsupported config format: .{ext}"))),
    }
}
