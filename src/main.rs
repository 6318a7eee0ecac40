mod app;
mod config;
mod prefs;
mod serial;
mod ui;

use std::fs::OpenOptions;

use anyhow::Result;
use env_logger::{Env, Target};

use crate::config::Config;

fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(&config);
    log::info!("starting with {config:?}");
    app::run(config)
}

// The terminal owns stdout and stderr, so diagnostics go to a file.
fn init_logging(config: &Config) {
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
    else {
        return;
    };
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(file)))
        .init();
}
