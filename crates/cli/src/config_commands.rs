use {anyhow::Result, clap::Subcommand};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Parse the discovered config file strictly and report problems.
    Check,
    /// Print the effective configuration as TOML.
    Show,
    /// Print where config files are searched for.
    Path,
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => check(),
        ConfigAction::Show => show(),
        ConfigAction::Path => {
            println!("./trawl.{{toml,yaml,yml,json}}");
            if let Some(dir) = trawl_config::config_dir() {
                println!("{}/trawl.{{toml,yaml,yml,json}}", dir.display());
            }
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check() -> Result<()> {
    let Some(path) = trawl_config::find_config_file() else {
        eprintln!("No config file found; defaults apply.");
        return Ok(());
    };

    eprintln!("Checking {}\n", path.display());
    match trawl_config::load_config(&path) {
        Ok(config) => {
            let mut warnings = Vec::new();
            if config.worker.poll_interval_ms == 0 {
                warnings.push("worker.poll_interval_ms is 0; treated as 1ms");
            }
            if config.sync.enabled && config.sync.max_concurrent_sessions == 0 {
                warnings.push("sync is enabled but sync.max_concurrent_sessions is 0");
            }
            for w in &warnings {
                eprintln!("  {BOLD}warning{RESET} {w}");
            }
            eprintln!("{BOLD}{GREEN}ok{RESET} {} warning(s)", warnings.len());
            Ok(())
        },
        Err(e) => {
            eprintln!("  {BOLD}{RED}error{RESET} {e}");
            std::process::exit(1);
        },
    }
}

fn show() -> Result<()> {
    let config = trawl_config::discover_and_load();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
