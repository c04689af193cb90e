use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use call_record_cell::{CallPayload, CallRecordCache, CallRecordError};
use shared_config::AppConfig;

use crate::error::CallSyncError;
use crate::models::{ProviderCall, SyncReport};
use crate::services::provider::CallProvider;

/// Listing restarts this far before the newest call already seen, so calls
/// that were still in progress at the last cycle are picked up again.
const LIST_OVERLAP_MINUTES: i64 = 5;

/// Pages fetched per cycle before the listing is treated as incomplete.
const MAX_LIST_PAGES: usize = 50;

const DEFAULT_STALE_AFTER_HOURS: i64 = 1;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: StdDuration,
    pub stale_after: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval: StdDuration::from_secs(config.call_sync_interval_seconds.max(1)),
            stale_after: stale_after(config.call_sync_stale_after_seconds),
            batch_size: config.call_sync_batch_size.max(1),
            concurrency: config.call_sync_concurrency.max(1),
        }
    }
}

fn stale_after(seconds: u64) -> Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| {
            warn!(
                "CALL_SYNC_STALE_AFTER_SECONDS of {} is out of range, using {}h",
                seconds, DEFAULT_STALE_AFTER_HOURS
            );
            Duration::hours(DEFAULT_STALE_AFTER_HOURS)
        })
}

/// Start time of the newest call the cache is known to hold every call up to.
#[derive(Debug, Clone, Copy)]
enum HighWater {
    /// Not read from the cache yet.
    Unknown,
    Known(Option<DateTime<Utc>>),
}

/// Everything the provider returned for one cycle.
struct Listing {
    calls: Vec<ProviderCall>,
    /// Paging reached the end of the requested range.
    complete: bool,
}

enum Listed {
    Synced,
    /// Stored as errored, or never storable.
    Failed,
    /// Not in the cache and worth listing again.
    Missed(Option<DateTime<Utc>>),
}

/// Pulls calls from the provider into the local cache.
pub struct CallSyncWorker {
    provider: Arc<dyn CallProvider>,
    cache: Arc<CallRecordCache>,
    settings: SyncSettings,
    high_water: Mutex<HighWater>,
}

impl CallSyncWorker {
    pub fn new(provider: Arc<dyn CallProvider>, cache: Arc<CallRecordCache>, settings: SyncSettings) -> Self {
        Self {
            provider,
            cache,
            settings,
            high_water: Mutex::new(HighWater::Unknown),
        }
    }

    /// One pass: new calls from the provider, then stale local records.
    ///
    /// Per-call failures are counted and recorded on the record; only a
    /// failure to list calls or read the cache fails the whole cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<SyncReport, CallSyncError> {
        let mut report = SyncReport::default();

        let since = self.listing_start().await?;
        let Listing { calls, complete } = self.list_since(since).await?;
        report.fetched = calls.len();
        let newest = calls.iter().filter_map(ProviderCall::started_at).max();

        let outcomes: Vec<Listed> = stream::iter(calls)
            .map(|call| self.sync_listed(call))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;
        report.synced = outcomes.iter().filter(|o| matches!(o, Listed::Synced)).count();
        report.failed = outcomes.len() - report.synced;

        if complete {
            self.advance_high_water(newest, &outcomes).await;
        }

        let stale = self
            .cache
            .find_stale(self.settings.stale_after, self.settings.batch_size)
            .await?;
        let outcomes: Vec<bool> = stream::iter(stale)
            .map(|record| self.refresh(record.call_id))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;
        let refreshed = outcomes.iter().filter(|ok| **ok).count();
        report.refreshed = refreshed;
        report.failed += outcomes.len() - refreshed;

        info!(
            "Call sync cycle: {} fetched, {} synced, {} refreshed, {} failed",
            report.fetched, report.synced, report.refreshed, report.failed
        );
        Ok(report)
    }

    /// Runs cycles every `interval` until `shutdown` turns true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Call sync worker started (every {:?})", self.settings.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Call sync cycle failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Call sync worker stopped");
    }

    async fn listing_start(&self) -> Result<Option<DateTime<Utc>>, CallSyncError> {
        let mut high_water = self.high_water.lock().await;
        let mark = match *high_water {
            HighWater::Known(mark) => mark,
            HighWater::Unknown => {
                let mark = self.cache.latest_call_start().await?;
                *high_water = HighWater::Known(mark);
                mark
            }
        };
        Ok(mark.map(|at| at - Duration::minutes(LIST_OVERLAP_MINUTES)))
    }

    /// Pages through every call since `since`, newest first.
    async fn list_since(&self, since: Option<DateTime<Utc>>) -> Result<Listing, CallSyncError> {
        let limit = self.settings.batch_size;
        let mut calls: Vec<ProviderCall> = Vec::new();
        let mut pagination_key: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self.provider.list_calls(since, pagination_key.clone(), limit).await?;
            let full = page.len() >= limit;
            let last = page.last().map(|call| call.call_id.clone());
            calls.extend(page);

            if !full {
                return Ok(Listing { calls, complete: true });
            }
            if last.is_none() || last == pagination_key {
                break;
            }
            pagination_key = last;
        }

        warn!(
            "Call listing since {:?} stopped after {} calls; keeping the high-water mark",
            since,
            calls.len()
        );
        Ok(Listing { calls, complete: false })
    }

    /// Moves the mark up to `newest`, but never past a call that has yet to
    /// reach the cache.
    async fn advance_high_water(&self, newest: Option<DateTime<Utc>>, outcomes: &[Listed]) {
        let Some(mut reached) = newest else {
            return;
        };
        for outcome in outcomes {
            if let Listed::Missed(started_at) = outcome {
                match started_at {
                    Some(at) => reached = reached.min(*at),
                    None => return,
                }
            }
        }

        let mut high_water = self.high_water.lock().await;
        let previous = match *high_water {
            HighWater::Known(mark) => mark,
            HighWater::Unknown => None,
        };
        *high_water = HighWater::Known(Some(previous.map_or(reached, |seen| seen.max(reached))));
    }

    async fn sync_listed(&self, call: ProviderCall) -> Listed {
        let call_id = call.call_id.clone();
        let started_at = call.started_at();
        let result = match CallPayload::try_from(call) {
            Ok(payload) => self.cache.upsert(payload).await.map_err(CallSyncError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => Listed::Synced,
            Err(e) => {
                warn!("Failed to sync call {}: {}", call_id, e);
                let cached = self.record_failure(&call_id, &e).await;
                if cached || e.is_permanent() {
                    Listed::Failed
                } else {
                    Listed::Missed(started_at)
                }
            }
        }
    }

    async fn refresh(&self, call_id: String) -> bool {
        let result = match self.provider.get_call(&call_id).await {
            Ok(call) => match CallPayload::try_from(call) {
                Ok(payload) => self.cache.upsert(payload).await.map_err(CallSyncError::from),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                debug!("Refreshed call {}", call_id);
                true
            }
            Err(e) => {
                warn!("Failed to refresh call {}: {}", call_id, e);
                self.record_failure(&call_id, &e).await;
                false
            }
        }
    }

    /// Returns whether the call is in the cache, now flagged as errored.
    async fn record_failure(&self, call_id: &str, error: &CallSyncError) -> bool {
        // The cache already stored this one in `error`.
        if matches!(error, CallSyncError::Cache(CallRecordError::IdentityResolution { .. })) {
            return true;
        }

        match self.cache.mark_error(call_id, &error.to_string()).await {
            Ok(_) => true,
            Err(CallRecordError::NotFound(_)) => {
                debug!("Call {} not cached yet, nothing to mark", call_id);
                false
            }
            Err(e) => {
                warn!("Could not mark call {} as errored: {}", call_id, e);
                false
            }
        }
    }
}
