//! Strategy engine: the supervisor and runner registry.
//!
//! The registry is the single source of truth for liveness. The persisted
//! strategy status is only the restart intent; UI queries derive the
//! displayed state from registry membership.

pub mod runner;
pub mod strategy;
pub mod time_decay;

pub use runner::{Runner, RunnerCtrl, RunnerDeps};
pub use strategy::{StrategyKind, TargetTokens};

use crate::models::{StrategyEventType, StrategyStatus};
use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

const CTRL_CHANNEL_CAPACITY: usize = 16;
const DISCOVERED_RPC_TIMEOUT: Duration = Duration::from_secs(5);
const RESTART_DELAY: Duration = Duration::from_secs(1);
const MAX_CRASHES: u32 = 3;
const CRASH_WINDOW: Duration = Duration::from_secs(60);

struct RunnerEntry {
    ctrl_tx: mpsc::Sender<RunnerCtrl>,
}

#[derive(Default)]
struct CrashWindow {
    count: u32,
    first_at: Option<Instant>,
}

pub struct Engine {
    deps: RunnerDeps,
    registry: Mutex<HashMap<i64, RunnerEntry>>,
    crashes: Mutex<HashMap<i64, CrashWindow>>,
}

impl Engine {
    pub fn new(deps: RunnerDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            registry: Mutex::new(HashMap::new()),
            crashes: Mutex::new(HashMap::new()),
        })
    }

    /// Launch a runner for the strategy and register it.
    pub fn start_strategy<'a>(
        self: &'a Arc<Self>,
        id: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.running(id) {
                bail!("strategy {id} is already running");
            }
            let Some(strategy) = self.deps.store.get_strategy(id).await? else {
                bail!("strategy {id} not found");
            };

            let runner = match Runner::new(self.deps.clone(), strategy) {
                Ok(r) => r,
                Err(e) => {
                    self.deps
                        .store
                        .set_strategy_status(id, StrategyStatus::Error)
                        .await
                        .ok();
                    self.deps
                        .store
                        .append_strategy_event(
                            id,
                            StrategyEventType::Error,
                            &format!("failed to start: {e}"),
                            serde_json::Value::Null,
                        )
                        .await
                        .ok();
                    return Err(e);
                }
            };

            let (ctrl_tx, ctrl_rx) = mpsc::channel(CTRL_CHANNEL_CAPACITY);
            let join = tokio::spawn(runner.run(ctrl_rx));
            self.registry.lock().insert(id, RunnerEntry { ctrl_tx });
            info!(strategy_id = id, "strategy runner started");

            let engine = self.clone();
            tokio::spawn(async move {
                engine.supervise(id, join).await;
            });
            Ok(())
        })
    }

    /// Watch one runner to completion; crashes mark the strategy `error`
    /// and trigger a bounded restart.
    async fn supervise(self: Arc<Self>, id: i64, join: JoinHandle<Result<()>>) {
        let outcome = join.await;
        self.registry.lock().remove(&id);

        let crashed = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!(strategy_id = id, error = %e, "runner ended with error");
                self.record_failure(id, &format!("runner error: {e}")).await;
                true
            }
            Err(join_err) => {
                error!(strategy_id = id, error = %join_err, "runner crashed");
                self.record_failure(id, "runner crashed").await;
                true
            }
        };

        if !crashed {
            self.crashes.lock().remove(&id);
            return;
        }

        if !self.should_restart(id) {
            warn!(strategy_id = id, "giving up after repeated crashes");
            return;
        }

        tokio::time::sleep(RESTART_DELAY).await;
        info!(strategy_id = id, "restarting crashed strategy runner");
        if let Err(e) = self.start_strategy(id).await {
            warn!(strategy_id = id, error = %e, "supervised restart failed");
        }
    }

    async fn record_failure(&self, id: i64, message: &str) {
        self.deps
            .store
            .set_strategy_status(id, StrategyStatus::Error)
            .await
            .ok();
        self.deps
            .store
            .append_strategy_event(id, StrategyEventType::Error, message, serde_json::Value::Null)
            .await
            .ok();
    }

    fn should_restart(&self, id: i64) -> bool {
        let mut crashes = self.crashes.lock();
        let window = crashes.entry(id).or_default();
        let now = Instant::now();
        match window.first_at {
            Some(first) if now.duration_since(first) > CRASH_WINDOW => {
                window.count = 1;
                window.first_at = Some(now);
                true
            }
            Some(_) => {
                window.count += 1;
                window.count < MAX_CRASHES
            }
            None => {
                window.count = 1;
                window.first_at = Some(now);
                true
            }
        }
    }

    pub async fn stop_strategy(&self, id: i64) -> Result<()> {
        let ctrl_tx = {
            let registry = self.registry.lock();
            let Some(entry) = registry.get(&id) else {
                bail!("strategy {id} is not running");
            };
            entry.ctrl_tx.clone()
        };
        ctrl_tx
            .send(RunnerCtrl::Stop)
            .await
            .map_err(|_| anyhow::anyhow!("runner for strategy {id} already gone"))?;
        Ok(())
    }

    pub async fn pause_strategy(&self, id: i64) -> Result<()> {
        self.send_ctrl(id, RunnerCtrl::Pause).await
    }

    pub async fn resume_strategy(&self, id: i64) -> Result<()> {
        self.send_ctrl(id, RunnerCtrl::Resume).await
    }

    async fn send_ctrl(&self, id: i64, ctrl: RunnerCtrl) -> Result<()> {
        let ctrl_tx = {
            let registry = self.registry.lock();
            let Some(entry) = registry.get(&id) else {
                bail!("strategy {id} is not running");
            };
            entry.ctrl_tx.clone()
        };
        ctrl_tx
            .send(ctrl)
            .await
            .map_err(|_| anyhow::anyhow!("runner for strategy {id} already gone"))?;
        Ok(())
    }

    /// Registry membership, the authoritative liveness answer.
    pub fn running(&self, id: i64) -> bool {
        self.registry.lock().contains_key(&id)
    }

    pub fn running_ids(&self) -> Vec<i64> {
        self.registry.lock().keys().copied().collect()
    }

    /// Tokens a live runner currently watches; empty on any failure so
    /// callers never block on a sick runner.
    pub async fn discovered_tokens(&self, id: i64) -> Vec<String> {
        let ctrl_tx = {
            let registry = self.registry.lock();
            match registry.get(&id) {
                Some(entry) => entry.ctrl_tx.clone(),
                None => return Vec::new(),
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if ctrl_tx
            .send(RunnerCtrl::GetDiscovered(reply_tx))
            .await
            .is_err()
        {
            return Vec::new();
        }
        match tokio::time::timeout(DISCOVERED_RPC_TIMEOUT, reply_rx).await {
            Ok(Ok(tokens)) => tokens,
            _ => Vec::new(),
        }
    }

    /// Relaunch everything that was meant to be running before restart.
    pub async fn auto_start(self: &Arc<Self>) {
        let strategies = match self
            .deps
            .store
            .list_strategies_with_status(StrategyStatus::Running)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "auto-start listing failed");
                return;
            }
        };
        for strategy in strategies {
            info!(strategy_id = strategy.id, name = %strategy.name, "auto-starting strategy");
            if let Err(e) = self.start_strategy(strategy.id).await {
                warn!(strategy_id = strategy.id, error = %e, "auto-start failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::markets::{GammaClient, MarketCache, MarketFeed};
    use crate::store::test_util::temp_store;
    use crate::store::Store;
    use crate::venue::{RateLimiter, VenueClient};

    /// Deps wired to a temp store. The config under test keeps discovery
    /// and target lists empty, so nothing touches the network.
    fn test_deps() -> (RunnerDeps, Store, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let bus = EventBus::default();
        let limiter = RateLimiter::spawn();
        let cache = MarketCache::new();
        let deps = RunnerDeps {
            store: store.clone(),
            bus: bus.clone(),
            feed: MarketFeed::spawn(bus.clone()),
            gamma: GammaClient::new(limiter.clone(), cache.clone()),
            cache,
            client: VenueClient::new(store.clone(), limiter),
        };
        (deps, store, dir)
    }

    fn idle_config() -> serde_json::Value {
        serde_json::json!({ "timeframes": [], "crypto_only": false })
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn registry_is_the_liveness_authority() {
        let (deps, store, _dir) = test_deps();
        let engine = Engine::new(deps);
        let strategy = store
            .create_strategy("idle", "time_decay", &idle_config(), true)
            .await
            .unwrap();

        assert!(!engine.running(strategy.id));
        engine.start_strategy(strategy.id).await.unwrap();
        assert!(engine.running(strategy.id));
        assert_eq!(engine.running_ids(), vec![strategy.id]);

        // double start is refused while the runner is alive
        assert!(engine.start_strategy(strategy.id).await.is_err());

        engine.stop_strategy(strategy.id).await.unwrap();
        let engine2 = engine.clone();
        let id = strategy.id;
        assert!(wait_until(move || !engine2.running(id)).await);

        let row = store.get_strategy(strategy.id).await.unwrap().unwrap();
        assert_eq!(row.status, StrategyStatus::Stopped);
    }

    #[tokio::test]
    async fn unknown_strategy_type_marks_error() {
        let (deps, store, _dir) = test_deps();
        let engine = Engine::new(deps);
        let strategy = store
            .create_strategy("bad", "martingale", &serde_json::json!({}), true)
            .await
            .unwrap();

        let err = engine.start_strategy(strategy.id).await.unwrap_err();
        assert!(err.to_string().contains("unknown_strategy_type"));
        assert!(!engine.running(strategy.id));

        let row = store.get_strategy(strategy.id).await.unwrap().unwrap();
        assert_eq!(row.status, StrategyStatus::Error);
        let events = store.list_strategy_events(strategy.id, 10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == StrategyEventType::Error));
    }

    #[tokio::test]
    async fn auto_start_resumes_persisted_intent() {
        let (deps, store, _dir) = test_deps();
        let engine = Engine::new(deps);

        let wants_running = store
            .create_strategy("resume-me", "time_decay", &idle_config(), true)
            .await
            .unwrap();
        store
            .set_strategy_status(wants_running.id, StrategyStatus::Running)
            .await
            .unwrap();
        let stays_stopped = store
            .create_strategy("leave-me", "time_decay", &idle_config(), true)
            .await
            .unwrap();

        engine.auto_start().await;
        assert!(engine.running(wants_running.id));
        assert!(!engine.running(stays_stopped.id));
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let (deps, store, _dir) = test_deps();
        let engine = Engine::new(deps);
        let strategy = store
            .create_strategy("pausable", "time_decay", &idle_config(), true)
            .await
            .unwrap();
        engine.start_strategy(strategy.id).await.unwrap();

        engine.pause_strategy(strategy.id).await.unwrap();
        let mut paused = false;
        for _ in 0..100 {
            let row = store.get_strategy(strategy.id).await.unwrap().unwrap();
            if row.status == StrategyStatus::Paused {
                paused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(paused);

        engine.resume_strategy(strategy.id).await.unwrap();
        assert!(engine.running(strategy.id));

        engine.stop_strategy(strategy.id).await.unwrap();
    }

    #[tokio::test]
    async fn discovered_tokens_is_safe_on_dead_runner() {
        let (deps, _store, _dir) = test_deps();
        let engine = Engine::new(deps);
        assert!(engine.discovered_tokens(404).await.is_empty());
    }
}
