//! The procscope engine: an explicit value owning the store, the worker
//! pool, the audit log, and the scanner task. Handlers receive it by
//! reference; tests construct fresh engines. `start` wires everything up,
//! `stop` tears it down inside the graceful-shutdown budget.

pub mod delta;
pub mod scanner;
pub mod server;
pub mod store;
pub mod ws;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use procscope_core::audit::AuditLog;
use procscope_core::config::ProcscopeConfig;
use procscope_core::host::EnvFacts;
use procscope_sensor::pool::CodesignPool;

use crate::scanner::Scanner;
use crate::store::ProcessStore;

/// Budget for the whole stop sequence.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

pub struct Engine {
    config: ProcscopeConfig,
    store: Arc<ProcessStore>,
    pool: Arc<CodesignPool>,
    audit: Arc<AuditLog>,
    subscriber_count: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    scanner_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Build all components and spawn the scanner. Must run inside a tokio
    /// runtime.
    pub fn start(config: ProcscopeConfig) -> Result<Arc<Self>> {
        let engine = Self::build(config)?;

        let scanner = Scanner::new(
            Arc::clone(&engine.store),
            Arc::clone(&engine.pool),
            Arc::clone(&engine.audit),
            EnvFacts::detect(),
            engine.config.scan.clone(),
        );
        let shutdown_rx = engine.shutdown_tx.subscribe();
        let run_handle = tokio::spawn(scanner.run(shutdown_rx));

        // A scanner panic takes the whole daemon down gracefully.
        let shutdown_tx = engine.shutdown_tx.clone();
        let monitor = tokio::spawn(async move {
            if let Err(e) = run_handle.await {
                if e.is_panic() {
                    error!("scanner task panicked, initiating shutdown");
                    shutdown_tx.send_replace(true);
                }
            }
        });
        *engine.scanner_handle.lock().unwrap() = Some(monitor);

        info!("engine started");
        Ok(engine)
    }

    /// Build the engine without a scan loop. Tests drive the store directly.
    pub fn start_without_scanner(config: ProcscopeConfig) -> Result<Arc<Self>> {
        Self::build(config)
    }

    fn build(config: ProcscopeConfig) -> Result<Arc<Self>> {
        let audit = AuditLog::new(config.audit_log_path.clone())
            .context("opening suspicious-event log")?;
        let pool = CodesignPool::new(config.scan.pool_workers);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            store: Arc::new(ProcessStore::new()),
            pool: Arc::new(pool),
            audit: Arc::new(audit),
            subscriber_count: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            scanner_handle: Mutex::new(None),
        }))
    }

    pub fn store(&self) -> &ProcessStore {
        &self.store
    }

    pub fn config(&self) -> &ProcscopeConfig {
        &self.config
    }

    /// Receiver that flips when shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Claim a subscriber slot, or `None` at the cap. Dropping the slot
    /// releases it; that is the only cleanup path, so it runs exactly once.
    pub fn try_attach_subscriber(&self) -> Option<SubscriberSlot> {
        let max = self.config.server.max_subscribers;
        let claimed = self
            .subscriber_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            });
        claimed.ok().map(|_| SubscriberSlot {
            count: Arc::clone(&self.subscriber_count),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Stop scanning, drain the pool, close the audit log. Bounded by the
    /// shutdown budget; whatever has not finished by then is abandoned.
    pub async fn stop(&self) {
        info!("engine stopping");
        self.shutdown_tx.send_replace(true);

        let teardown = async {
            let handle = self.scanner_handle.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            self.pool.shutdown().await;
        };
        if tokio::time::timeout(SHUTDOWN_BUDGET, teardown).await.is_err() {
            warn!("shutdown budget exceeded, abandoning remaining tasks");
        }
        self.audit.shutdown();
        info!("engine stopped");
    }
}

/// RAII guard for one occupied subscriber slot.
pub struct SubscriberSlot {
    count: Arc<AtomicUsize>,
}

impl Drop for SubscriberSlot {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProcscopeConfig {
        let mut config = ProcscopeConfig::default();
        config.audit_log_path = std::env::temp_dir()
            .join(format!("procscope-engine-{}.log", uuid::Uuid::new_v4()));
        config
    }

    #[tokio::test]
    async fn subscriber_cap_is_enforced() {
        let mut config = test_config();
        config.server.max_subscribers = 2;
        let engine = Engine::start_without_scanner(config).unwrap();

        let a = engine.try_attach_subscriber();
        let b = engine.try_attach_subscriber();
        assert!(a.is_some() && b.is_some());
        assert!(engine.try_attach_subscriber().is_none());
        assert_eq!(engine.subscriber_count(), 2);

        drop(a);
        assert_eq!(engine.subscriber_count(), 1);
        assert!(engine.try_attach_subscriber().is_some());
    }

    #[tokio::test]
    async fn stop_flips_shutdown_signal() {
        let engine = Engine::start_without_scanner(test_config()).unwrap();
        let mut rx = engine.shutdown_signal();
        engine.stop().await;
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn start_and_stop_full_engine() {
        let engine = Engine::start(test_config()).unwrap();
        // Give the scanner a moment to enter its loop, then stop.
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.stop().await;
    }
}
