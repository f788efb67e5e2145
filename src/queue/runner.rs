//! The queue runner: spawns workers, paces claims with backoff and jitter,
//! rotates shards, maintains stale requeue, and enforces the daily cap.

use crate::config::RunnerConfig;
use crate::detection::ProhibitionCache;
use crate::error::{Error, Result};
use crate::queue::rpc::QueueClient;
use crate::timeutil;
use crate::worker::{FormWorker, WorkerOutcome};
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Exponential backoff with jitter for empty claims: 2s doubling to 60s,
/// ±30% jitter so parallel workers do not synchronize.
pub fn backoff_delay(empty_streak: u32, rng: &mut impl Rng) -> Duration {
    let base = 2.0_f64 * 2.0_f64.powi(empty_streak.min(5) as i32 - 1);
    let base = base.clamp(2.0, 60.0);
    let jitter = rng.gen_range(-0.3..0.3);
    Duration::from_secs_f64((base * (1.0 + jitter)).max(0.5))
}

/// Advance the shard id, sequential or random.
pub fn next_shard(current: i64, shard_count: i64, sequential: bool, rng: &mut impl Rng) -> i64 {
    if shard_count <= 1 {
        return current;
    }
    if sequential {
        (current + 1) % shard_count
    } else {
        // Random, excluding the current shard.
        let mut candidate = rng.gen_range(0..shard_count);
        if candidate == current {
            candidate = (candidate + 1) % shard_count;
        }
        candidate
    }
}

/// Per-worker shard rotation state.
struct ShardState {
    current: Option<i64>,
    empty_since: Option<tokio::time::Instant>,
}

/// The orchestrator.
pub struct Runner {
    config: Arc<RunnerConfig>,
    queue: Arc<QueueClient>,
    prohibition_cache: Arc<ProhibitionCache>,
    processed: Arc<AtomicUsize>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        let queue = Arc::new(QueueClient::new(
            config.db_url.clone(),
            config.db_api_key.clone(),
            config.run_id.clone(),
            config.company_table.clone(),
            config.send_queue_table.clone(),
            Duration::from_secs(config.worker.success_count_cache_secs),
        ));
        let cache_cfg = &config.worker.detectors.prohibition_cache;
        let prohibition_cache = Arc::new(ProhibitionCache::new(
            cache_cfg.max_entries,
            Duration::from_secs(cache_cfg.ttl_seconds),
        ));
        Self {
            config: Arc::new(config),
            queue,
            prohibition_cache,
            processed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run until the queue drains, the cap is hit, the processed limit is
    /// reached, or a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self::install_signal_handlers(shutdown_tx.clone());

        // Single-company mode bypasses the queue claim entirely.
        if let Some(company_id) = self.config.company_id {
            let worker = FormWorker::new(
                0,
                self.config.clone(),
                self.queue.clone(),
                self.prohibition_cache.clone(),
            );
            worker.startup().await?;
            let outcome = worker.process_company(company_id).await;
            worker.shutdown().await;
            return match outcome {
                WorkerOutcome::Completed { .. } => Ok(()),
                WorkerOutcome::Abandoned => {
                    Err(Error::Internal("company processing was abandoned".into()))
                }
                WorkerOutcome::Shutdown => Ok(()),
            };
        }

        let worker_count = self.config.clamped_workers();
        info!(workers = worker_count, run_id = %self.config.run_id, "runner starting");

        let mut handles = Vec::new();
        for worker_id in 0..worker_count {
            let config = self.config.clone();
            let queue = self.queue.clone();
            let cache = self.prohibition_cache.clone();
            let processed = self.processed.clone();
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, config, queue, cache, processed, rx).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!(processed = self.processed.load(Ordering::SeqCst), "runner finished");
        Ok(())
    }

    fn install_signal_handlers(shutdown: watch::Sender<bool>) {
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = ctrl_c.await;
                        let _ = shutdown.send(true);
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            info!("shutdown signal received; finishing in-flight companies");
            let _ = shutdown.send(true);
        });
    }
}

/// One worker's claim loop.
async fn worker_loop(
    worker_id: usize,
    config: Arc<RunnerConfig>,
    queue: Arc<QueueClient>,
    cache: Arc<ProhibitionCache>,
    processed: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker = FormWorker::new(worker_id, config.clone(), queue.clone(), cache);
    if let Err(e) = worker.startup().await {
        warn!(worker = worker_id, "worker startup failed: {e}");
        return;
    }

    let offset = config.worker.zone_offset_secs;
    let hours = config.tenant.business_hours(offset).ok();
    let rotation = &config.worker.shard_rotation;
    let mut shard = ShardState {
        current: config.shard_id,
        empty_since: None,
    };
    let mut empty_streak: u32 = 0;
    let mut stale_tick = tokio::time::interval(Duration::from_secs(
        config.worker.stale_requeue_interval_secs.max(30),
    ));

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Business-hours gate: outside the window workers idle.
        if let Some(hours) = &hours {
            if !hours.permits(Utc::now()) {
                debug!(worker = worker_id, "outside business hours; idling");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => continue,
                    _ = shutdown.changed() => continue,
                }
            }
        }

        // Daily cap: stop cleanly once today's successes reach the cap.
        let today = timeutil::queue_day(Utc::now(), offset);
        let day_start = today
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_local_timezone(timeutil::zone(offset))
            .unwrap()
            .with_timezone(&Utc);
        let cap = config.tenant.targeting.max_daily_sends as u64;
        match queue
            .count_success_today(config.targeting_id, day_start, day_start + chrono::Duration::days(1))
            .await
        {
            Ok(count) if count >= cap => {
                info!(worker = worker_id, count, cap, "daily cap reached; stopping");
                break;
            }
            Ok(_) => {}
            Err(e) => warn!(worker = worker_id, "success count unavailable: {e}"),
        }

        // Worker 0 doubles as the stale-requeue maintainer.
        if worker_id == 0 {
            use futures::FutureExt;
            if stale_tick.tick().now_or_never().is_some() {
                let target_date = config.target_date.unwrap_or(today);
                match queue
                    .requeue_stale_assigned(target_date, config.targeting_id, config.worker.stale_minutes)
                    .await
                {
                    Ok(0) => {}
                    Ok(n) => info!(worker = worker_id, requeued = n, "stale entries requeued"),
                    Err(e) => warn!(worker = worker_id, "stale requeue failed: {e}"),
                }
            }
        }

        if config.max_processed > 0 && processed.load(Ordering::SeqCst) >= config.max_processed {
            info!(worker = worker_id, "processed limit reached; stopping");
            break;
        }

        // Claim, with shard rotation on sustained emptiness.
        let target_date = config.target_date.unwrap_or(today);
        let claim = queue
            .claim_next_batch(
                target_date,
                config.targeting_id,
                shard.current,
                Some(config.tenant.targeting.max_daily_sends),
            )
            .await;
        match claim {
            Ok(Some(entry)) => {
                empty_streak = 0;
                shard.empty_since = None;
                let outcome =
                    process_with_grace(&worker, entry.company_id, shutdown.clone()).await;
                processed.fetch_add(1, Ordering::SeqCst);
                if matches!(outcome, WorkerOutcome::Shutdown) {
                    break;
                }
            }
            Ok(None) => {
                empty_streak += 1;
                let now = tokio::time::Instant::now();
                let empty_since = *shard.empty_since.get_or_insert(now);
                if let Some(current) = shard.current {
                    if now.duration_since(empty_since).as_secs() >= rotation.empty_window_secs {
                        // Probe the unsharded queue once before rotating.
                        let unsharded = queue
                            .claim_next_batch(target_date, config.targeting_id, None, None)
                            .await
                            .ok()
                            .flatten();
                        if let Some(entry) = unsharded {
                            empty_streak = 0;
                            shard.empty_since = None;
                            let outcome =
                                process_with_grace(&worker, entry.company_id, shutdown.clone())
                                    .await;
                            processed.fetch_add(1, Ordering::SeqCst);
                            if matches!(outcome, WorkerOutcome::Shutdown) {
                                break;
                            }
                            continue;
                        }
                        if rotation.enabled {
                            let mut rng = rand::thread_rng();
                            let next = next_shard(
                                current,
                                rotation.shard_count,
                                rotation.sequential,
                                &mut rng,
                            );
                            debug!(worker = worker_id, from = current, to = next, "rotating shard");
                            shard.current = Some(next);
                            shard.empty_since = None;
                        }
                    }
                } else if empty_streak >= 3 {
                    // Unsharded and repeatedly empty: the queue is drained.
                    info!(worker = worker_id, "queue drained; stopping");
                    break;
                }
                let delay = {
                    let mut rng = rand::thread_rng();
                    backoff_delay(empty_streak, &mut rng)
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(worker = worker_id, "claim failed: {e}");
                let delay = {
                    let mut rng = rand::thread_rng();
                    backoff_delay(empty_streak.max(2), &mut rng)
                };
                tokio::time::sleep(delay).await;
            }
        }
    }

    worker.shutdown().await;
    info!(worker = worker_id, "worker loop exited");
}

/// Bounded wait after a shutdown signal: the in-flight company gets a grace
/// period to finish, then is abandoned for stale-requeue.
async fn process_with_grace(
    worker: &FormWorker,
    company_id: i64,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerOutcome {
    const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
    tokio::select! {
        outcome = worker.process_company(company_id) => outcome,
        _ = async {
            if !*shutdown.borrow() {
                let _ = shutdown.changed().await;
            }
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!(company_id, "shutdown grace expired; abandoning company for stale requeue");
            WorkerOutcome::Shutdown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut rng = StepRng::new(0, 0);
        let d1 = backoff_delay(1, &mut rng);
        let d3 = backoff_delay(3, &mut rng);
        let d9 = backoff_delay(9, &mut rng);
        assert!(d1 < d3);
        assert!(d3 <= d9);
        assert!(d9 <= Duration::from_secs(60));
    }

    #[test]
    fn test_sequential_shard_rotation_wraps() {
        let mut rng = StepRng::new(0, 0);
        assert_eq!(next_shard(0, 4, true, &mut rng), 1);
        assert_eq!(next_shard(3, 4, true, &mut rng), 0);
        assert_eq!(next_shard(0, 1, true, &mut rng), 0);
    }

    #[test]
    fn test_random_shard_rotation_moves() {
        let mut rng = StepRng::new(0, 1);
        for current in 0..4 {
            let next = next_shard(current, 4, false, &mut rng);
            assert_ne!(next, current);
            assert!((0..4).contains(&next));
        }
    }
}
