//! Config file watcher - hot-reloads bridge tuning on file changes

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Wait for editors to finish writing before re-reading
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and yields each successfully reloaded config
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it.
    ///
    /// Returns the watcher and the initial config.
    pub async fn new(config_path: String) -> Result<(Self, AppConfig)> {
        let (tx, rx) = mpsc::channel(10);

        let initial = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        // notify calls back on its own OS thread, outside the runtime
        let runtime = tokio::runtime::Handle::current();
        let watched_path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Config watch error: {}", e);
                    return;
                }
            };
            // Editors that save by rename show up as Create
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            debug!("Config file changed: {:?}", event.paths);

            let path = watched_path.clone();
            let tx = tx.clone();
            runtime.spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;
                match AppConfig::load(&path).await {
                    Ok(config) => {
                        if tx.send(config).await.is_err() {
                            debug!("Config watcher receiver dropped");
                        }
                    }
                    Err(e) => warn!("⚠️  Ignoring invalid config (keeping current): {:#}", e),
                }
            });
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("👀 Watching {} for changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial,
        ))
    }

    /// Next reloaded config, or `None` once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reload_after_edit() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("bridge.yaml");

        fs::write(&config_path, "cache:\n  ttl_ms: 500\n")?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.cache.ttl_ms, 500);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, "cache:\n  ttl_ms: 200\nretry:\n  max_attempts: 1\n")?;

        let reloaded = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;

        // Some file systems coalesce events; only check what arrives
        if let Some(reloaded) = reloaded {
            assert_eq!(reloaded.cache.ttl_ms, 200);
            assert_eq!(reloaded.retry.max_attempts, 1);
        }

        Ok(())
    }
}
