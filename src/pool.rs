//! Instance Pool (C5, spec.md §4.4).
//!
//! Owns a bounded set of Instances behind `Arc<Mutex<_>>`, the same shape the
//! teacher uses for its shared `GridState` (`GridStatePtr = Arc<Mutex<GridState>>`)
//! guarded by background `tokio::spawn`ed tasks rather than manual polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::domain::{now_ms, InstanceConfig, InstanceId, InstanceSnapshot};
use crate::driver::{instance_config_from_service, DriverFactory, InstanceDriver};
use crate::error::{GgbError, GgbResult};

struct Slot {
    driver: Box<dyn InstanceDriver>,
    config: InstanceConfig,
    created_at_ms: u64,
    last_used_at_ms: u64,
    usage_count: u64,
    checked_out: bool,
}

impl Slot {
    fn snapshot(&self, id: InstanceId) -> InstanceSnapshot {
        InstanceSnapshot {
            id,
            created_at_ms: self.created_at_ms,
            last_used_at_ms: self.last_used_at_ms,
            usage_count: self.usage_count,
            active: self.checked_out,
            ready: self.driver.state().is_usable(),
            config: self.config.clone(),
        }
    }
}

struct PoolState {
    slots: HashMap<InstanceId, Slot>,
}

/// Handle returned by [`Pool::acquire`]; releasing is explicit via
/// [`Pool::release`] rather than RAII, matching spec.md §4.4's "release
/// returns the Instance to the idle set" wording — the dispatcher holds the
/// id across possibly-cancellable tool calls and must be able to force-reclaim
/// without a drop guard fighting it.
pub struct AcquiredInstance {
    pub id: InstanceId,
}

/// Snapshot of pool-wide occupancy for the `performance_get_pool_stats`
/// surface (spec.md §4.4 "Stats snapshot").
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub max_instances: usize,
    pub average_usage_count: f64,
    pub oldest_age_ms: u64,
    /// Rough estimate per spec.md §4.4: ≈75 MB × `|Pool|`.
    pub estimated_memory_mb: u64,
}

pub struct Pool {
    state: Mutex<PoolState>,
    factory: Box<dyn DriverFactory>,
    config: ServiceConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(config: ServiceConfig, factory: Box<dyn DriverFactory>) -> Arc<Self> {
        Arc::new(Pool {
            state: Mutex::new(PoolState {
                slots: HashMap::new(),
            }),
            factory,
            config,
            sweeper: Mutex::new(None),
        })
    }

    /// Launches the idle-sweeper background task (spec.md §4.4, "sweeps idle
    /// Instances past `max_idle_time_ms`"). Mirrors the teacher's
    /// `tokio::spawn`ed watcher loops in `state.rs`.
    pub async fn spawn_sweeper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                pool.sweep_idle().await;
            }
        });
        *self.sweeper.lock().await = Some(handle);
    }

    async fn sweep_idle(&self) {
        let max_idle_ms = self.config.max_idle_time().as_millis() as u64;
        let now = now_ms();
        let mut to_dispose = Vec::new();
        {
            let state = self.state.lock().await;
            for (id, slot) in state.slots.iter() {
                if !slot.checked_out && now.saturating_sub(slot.last_used_at_ms) > max_idle_ms {
                    to_dispose.push(*id);
                }
            }
        }
        for id in to_dispose {
            tracing::info!(instance_id = %id, "disposing idle instance");
            let _ = self.dispose(id).await;
        }
    }

    /// Creates and initializes up to `count` idle Instances ahead of demand
    /// (spec.md §4.4 "warm-up").
    pub async fn warm_up(&self, count: usize) -> GgbResult<()> {
        for _ in 0..count {
            let id = self.create_instance().await?;
            let mut state = self.state.lock().await;
            if let Some(slot) = state.slots.get_mut(&id) {
                slot.checked_out = false;
            }
        }
        Ok(())
    }

    async fn create_instance(&self) -> GgbResult<InstanceId> {
        {
            let state = self.state.lock().await;
            if state.slots.len() >= self.config.max_instances {
                return Err(GgbError::InstanceNotReady(
                    "pool at max_instances capacity".to_string(),
                ));
            }
        }
        let config = instance_config_from_service(&self.config);
        let driver = self.factory.create(&config).await?;
        let id = InstanceId::new();
        let now = now_ms();
        let mut state = self.state.lock().await;
        state.slots.insert(
            id,
            Slot {
                driver,
                config,
                created_at_ms: now,
                last_used_at_ms: now,
                usage_count: 0,
                checked_out: true,
            },
        );
        Ok(id)
    }

    /// Hands an idle Instance to the caller, launching a new one if none is
    /// idle and the pool has headroom; once full, force-reclaims the oldest
    /// inactive Instance or, failing that, the least-recently-used active one
    /// (spec.md §4.4 acquire path).
    pub async fn acquire(&self) -> GgbResult<AcquiredInstance> {
        let idle = {
            let mut state = self.state.lock().await;
            let candidate = state
                .slots
                .iter()
                .find(|(_, slot)| !slot.checked_out && slot.driver.state().is_usable())
                .map(|(id, _)| *id);
            if let Some(id) = candidate {
                let slot = state.slots.get_mut(&id).expect("just located");
                slot.checked_out = true;
                slot.usage_count += 1;
                slot.last_used_at_ms = now_ms();
                Some(id)
            } else {
                None
            }
        };

        if let Some(id) = idle {
            return Ok(AcquiredInstance { id });
        }

        let at_capacity = {
            let state = self.state.lock().await;
            state.slots.len() >= self.config.max_instances
        };
        if !at_capacity {
            let id = self.create_instance().await?;
            return Ok(AcquiredInstance { id });
        }

        let reclaim_target = {
            let state = self.state.lock().await;
            state
                .slots
                .iter()
                .filter(|(_, slot)| !slot.checked_out)
                .min_by_key(|(_, slot)| slot.last_used_at_ms)
                .map(|(id, _)| *id)
                .or_else(|| {
                    // No inactive candidate: reclaim the LRU active Instance
                    // even though this risks interrupting an in-flight call
                    // (spec.md §9 Open Question, preserved as-is; see
                    // DESIGN.md).
                    state
                        .slots
                        .iter()
                        .min_by_key(|(_, slot)| slot.last_used_at_ms)
                        .map(|(id, _)| *id)
                })
        };

        let Some(target) = reclaim_target else {
            return Err(GgbError::InstanceNotReady(
                "pool at max_instances capacity with no reclaimable instance".to_string(),
            ));
        };
        tracing::warn!(instance_id = %target, "force-reclaiming instance to satisfy acquire");
        self.force_reclaim(target).await?;
        let id = self.create_instance().await?;
        Ok(AcquiredInstance { id })
    }

    /// Returns an Instance to the idle set so a later `acquire` can reuse it.
    /// Resets its Construction first (spec.md §4.4 release path, §3.1
    /// invariant (d)); a reset failure is logged but never blocks the
    /// release itself. Holds the pool lock across the reset `await` —
    /// `tokio::sync::Mutex` is async-aware, so this only stalls other pool
    /// operations rather than risking the slot disappearing mid-reset.
    pub async fn release(&self, id: InstanceId) {
        let mut state = self.state.lock().await;
        let Some(slot) = state.slots.get_mut(&id) else {
            return;
        };
        if let Err(err) = slot.driver.new_construction().await {
            tracing::warn!(instance_id = %id, error = %err, "release-time construction reset failed");
        }
        if let Some(slot) = state.slots.get_mut(&id) {
            slot.checked_out = false;
            slot.last_used_at_ms = now_ms();
        }
    }

    /// Forcibly reclaims an Instance regardless of checkout state (spec.md
    /// §9 Open Question: the spec is silent on whether this can interrupt an
    /// in-flight call on an active Instance — we allow it, and the caller of
    /// the interrupted tool call observes `INSTANCE_NOT_READY` once cleanup
    /// completes. See DESIGN.md.
    pub async fn force_reclaim(&self, id: InstanceId) -> GgbResult<()> {
        self.dispose(id).await
    }

    async fn dispose(&self, id: InstanceId) -> GgbResult<()> {
        let slot = {
            let mut state = self.state.lock().await;
            state.slots.remove(&id)
        };
        match slot {
            Some(mut slot) => {
                slot.driver.cleanup().await;
                Ok(())
            }
            None => Err(GgbError::InstanceNotReady(format!(
                "no such instance: {id}"
            ))),
        }
    }

    /// Runs `f` against the driver behind `id`, bumping its usage metadata.
    /// Returns `INSTANCE_NOT_READY` if `id` is unknown or not checked out.
    pub async fn with_driver<F, R>(&self, id: InstanceId, f: F) -> GgbResult<R>
    where
        F: for<'a> FnOnce(
            &'a dyn InstanceDriver,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = GgbResult<R>> + Send + 'a>>,
    {
        let state = self.state.lock().await;
        let slot = state
            .slots
            .get(&id)
            .ok_or_else(|| GgbError::InstanceNotReady(format!("no such instance: {id}")))?;
        if !slot.checked_out {
            return Err(GgbError::InstanceNotReady(format!(
                "instance {id} is not checked out"
            )));
        }
        f(slot.driver.as_ref()).await
    }

    pub async fn snapshot(&self, id: InstanceId) -> GgbResult<InstanceSnapshot> {
        let state = self.state.lock().await;
        state
            .slots
            .get(&id)
            .map(|slot| slot.snapshot(id))
            .ok_or_else(|| GgbError::InstanceNotReady(format!("no such instance: {id}")))
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let total = state.slots.len();
        let active = state.slots.values().filter(|s| s.checked_out).count();
        let now = now_ms();
        let average_usage_count = if total == 0 {
            0.0
        } else {
            state.slots.values().map(|s| s.usage_count).sum::<u64>() as f64 / total as f64
        };
        let oldest_age_ms = state
            .slots
            .values()
            .map(|s| now.saturating_sub(s.created_at_ms))
            .max()
            .unwrap_or(0);
        PoolStats {
            total,
            active,
            idle: total - active,
            max_instances: self.config.max_instances,
            average_usage_count,
            oldest_age_ms,
            estimated_memory_mb: total as u64 * 75,
        }
    }

    /// Cleans up every Instance in parallel (spec.md §4.4 shutdown path),
    /// called from the SIGINT/SIGTERM handler in `main`.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        let mut state = self.state.lock().await;
        let slots = std::mem::take(&mut state.slots);
        drop(state);

        let cleanups = slots.into_values().map(|mut slot| async move {
            slot.driver.cleanup().await;
        });
        futures::future::join_all(cleanups).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use async_trait::async_trait;

    struct FakeFactory;

    #[async_trait]
    impl DriverFactory for FakeFactory {
        async fn create(&self, _config: &InstanceConfig) -> GgbResult<Box<dyn InstanceDriver>> {
            Ok(Box::new(FakeDriver::new()))
        }
    }

    fn test_config(max_instances: usize) -> ServiceConfig {
        ServiceConfig {
            max_instances,
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn acquire_creates_and_release_returns_to_idle() {
        let pool = Pool::new(test_config(5), Box::new(FakeFactory));
        let handle = pool.acquire().await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.active, 1);
        pool.release(handle.id).await;
        let stats = pool.stats().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn acquire_reuses_released_instance_instead_of_creating() {
        let pool = Pool::new(test_config(5), Box::new(FakeFactory));
        let first = pool.acquire().await.unwrap();
        pool.release(first.id).await;
        let second = pool.acquire().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(pool.stats().await.total, 1);
    }

    #[tokio::test]
    async fn acquire_force_reclaims_active_instance_once_at_capacity() {
        let pool = Pool::new(test_config(1), Box::new(FakeFactory));
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(pool.stats().await.total, 1);
        assert_eq!(pool.stats().await.active, 1);
    }

    #[tokio::test]
    async fn acquire_prefers_reclaiming_an_inactive_instance_over_an_active_one() {
        let pool = Pool::new(test_config(2), Box::new(FakeFactory));
        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        pool.release(first.id).await;
        let third = pool.acquire().await.unwrap();
        // The released (inactive) instance's slot is reclaimed, not the
        // still-active `second`.
        assert_ne!(third.id, second.id);
        assert_eq!(pool.stats().await.total, 2);
    }

    #[tokio::test]
    async fn release_resets_the_construction() {
        let pool = Pool::new(test_config(5), Box::new(FakeFactory));
        let handle = pool.acquire().await.unwrap();
        pool.with_driver(handle.id, |driver| {
            Box::pin(async move { driver.eval_command("A = (1, 2)").await.map(|_| ()) })
        })
        .await
        .unwrap();
        pool.release(handle.id).await;
        let second = pool.acquire().await.unwrap();
        assert_eq!(handle.id, second.id);
        let names = pool
            .with_driver(second.id, |driver| {
                Box::pin(async move { driver.get_all_object_names(None).await })
            })
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn force_reclaim_disposes_even_when_checked_out() {
        let pool = Pool::new(test_config(5), Box::new(FakeFactory));
        let handle = pool.acquire().await.unwrap();
        pool.force_reclaim(handle.id).await.unwrap();
        assert!(pool.snapshot(handle.id).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_clears_all_instances() {
        let pool = Pool::new(test_config(5), Box::new(FakeFactory));
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        pool.shutdown().await;
        assert_eq!(pool.stats().await.total, 0);
    }
}
