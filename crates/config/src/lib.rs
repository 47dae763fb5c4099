//! Configuration loading and env substitution.
//!
//! Config files: `trawl.toml`, `trawl.yaml`, `trawl.yml` or `trawl.json`,
//! searched in `./` then `~/.config/trawl/`.
//!
//! Supports `${ENV_VAR}` substitution anywhere in the file.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config, set_config_dir},
    schema::{
        BrowserConfig, CacheConfig, ServerConfig, SyncConfig, TrawlConfig, WorkerConfig,
    },
};
