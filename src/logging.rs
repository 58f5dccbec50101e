use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Level;
use tracing::level_filters::LevelFilter;

use crate::config::LogConfig;
use crate::error::Result;

pub fn level(config: &LogConfig) -> Level {
    if config.trace {
        Level::TRACE
    } else if config.verbose || config.dump {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Installs the global fmt subscriber. Returns `Ok(false)` if one was
/// already installed.
pub fn init(config: &LogConfig) -> Result<bool> {
    let filter = LevelFilter::from_level(level(config));
    let builder = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(config.trace);
    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok()
        }
        None => builder.try_init().is_ok(),
    };
    Ok(installed)
}
