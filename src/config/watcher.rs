//! Configuration file watcher for hot reload.
//!
//! # Responsibilities
//! - Reload and validate the file whenever it changes
//! - Keep settings that were consumed at startup at their running values
//! - Publish the result over a channel for the server to swap in
//!
//! # Design Decisions
//! - Only the sections read per request (experiments, cookies, admin key)
//!   actually change behavior on reload; the rest were baked into the
//!   listener, the layer stack, the registry or the gateway at startup
//! - A reload that touches startup-only settings is still applied for the
//!   live sections, and each ignored setting is named in a warning
//! - An invalid file never replaces a running configuration

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::EdgeConfig;

/// Copy every startup-only setting from `running` into `reloaded`.
///
/// Returns the settings whose reloaded value differed and was dropped.
pub fn pin_startup_settings(running: &EdgeConfig, reloaded: &mut EdgeConfig) -> Vec<&'static str> {
    let mut ignored = Vec::new();

    macro_rules! pin {
        ($name:literal, $($field:ident).+) => {
            if reloaded.$($field).+ != running.$($field).+ {
                ignored.push($name);
                reloaded.$($field).+ = running.$($field).+.clone();
            }
        };
    }

    pin!("listener", listener);
    pin!("timeouts", timeouts);
    pin!("registry", registry);
    pin!("content", content);
    pin!("revalidation", revalidation);
    pin!("observability", observability);
    pin!("admin.enabled", admin.enabled);
    pin!("admin.bind_address", admin.bind_address);

    ignored
}

/// Load `path` and keep startup-only settings from `running`.
pub fn reload(path: &Path, running: &EdgeConfig) -> Result<EdgeConfig, ConfigError> {
    let mut config = load_config(path)?;
    let ignored = pin_startup_settings(running, &mut config);
    if !ignored.is_empty() {
        tracing::warn!(
            settings = ?ignored,
            "Config reload changed settings that only take effect on restart; keeping running values"
        );
    }
    Ok(config)
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    running: EdgeConfig,
    update_tx: mpsc::UnboundedSender<EdgeConfig>,
}

impl ConfigWatcher {
    /// `running` is the configuration the server started with.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path, running: EdgeConfig) -> (Self, mpsc::UnboundedReceiver<EdgeConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                running,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, running, update_tx } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match reload(&path, &running) {
                        Ok(config) => {
                            let _ = update_tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
