//! The single current configuration snapshot.
//!
//! Readers take a cheap `Arc` clone of whatever snapshot is installed at that
//! moment; the reload task is the only writer and replaces the whole snapshot
//! with one pointer swap.

use arc_swap::ArcSwap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::schema::PolicyConfig;
use crate::observability::metrics;

#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<PolicyConfig>,
}

impl ConfigStore {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// The latest installed snapshot. Never blocks.
    pub fn current(&self) -> Arc<PolicyConfig> {
        self.current.load_full()
    }

    /// Replace the snapshot as a whole.
    pub fn install(&self, config: PolicyConfig) {
        let timeouts = config.listen.timeouts();
        self.current.store(Arc::new(config));
        tracing::debug!(
            read_timeout = ?timeouts.read,
            write_timeout = ?timeouts.write,
            idle_timeout = ?timeouts.idle,
            "Server timeouts refreshed from new snapshot"
        );
    }

    /// Install every validated snapshot the watcher produces until it stops.
    pub async fn apply_updates(self: Arc<Self>, mut updates: mpsc::UnboundedReceiver<PolicyConfig>) {
        while let Some(config) = updates.recv().await {
            tracing::info!(
                upstream = %config.upstream.url,
                max_cc = config.limits.max_cc,
                max_mentions = config.limits.max_mentions,
                keywords = config.limits.keywords.len(),
                "Configuration reloaded"
            );
            self.install(config);
            metrics::record_config_reload(true);
        }
        tracing::debug!("Config update channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_replaces_whole_snapshot() {
        let store = ConfigStore::new(PolicyConfig::default());
        let before = store.current();

        let mut next = PolicyConfig::default();
        next.limits.max_cc = 99;
        store.install(next);

        assert_eq!(before.limits.max_cc, 50);
        assert_eq!(store.current().limits.max_cc, 99);
        assert!(!Arc::ptr_eq(&before, &store.current()));
    }

    #[tokio::test]
    async fn apply_updates_installs_in_order() {
        let store = Arc::new(ConfigStore::new(PolicyConfig::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        for cc in [1, 2, 3] {
            let mut config = PolicyConfig::default();
            config.limits.max_cc = cc;
            tx.send(config).unwrap();
        }
        drop(tx);

        store.clone().apply_updates(rx).await;
        assert_eq!(store.current().limits.max_cc, 3);
    }
}
