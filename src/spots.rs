// Spot lifecycle manager
//
// A spot is Active from creation until its expiry timestamp, then Expired -
// a terminal state reached at most once. The recurring sweep and manual
// cancellation share the same claim-if-still-active transition, so
// overlapping sweeps never archive a spot twice.

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adif::{freq_to_band, normalize_band, normalize_mode};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::model::{Bunker, BunkerStatus, Spot, SpotStatus, UserId};
use crate::store::Store;

/// A spot submission from the request layer.
#[derive(Debug, Clone)]
pub struct SpotRequest {
    pub user_id: UserId,
    pub activator_callsign: String,
    pub bunker_ref: String,
    pub freq_mhz: Option<f64>,
    pub band: Option<String>,
    pub mode: String,
    pub comment: String,
}

/// What one sweep cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Spots this sweep transitioned to Expired.
    pub expired: usize,
    /// Due spots another sweep (or a cancel) claimed first.
    pub already_claimed: usize,
}

pub struct SpotManager<S: Store> {
    store: S,
    config: EngineConfig,
}

impl<S: Store> SpotManager<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Create a spot, or refresh a matching active one (re-spot).
    pub async fn create_spot(&self, request: SpotRequest) -> Result<Spot, CoreError> {
        let bunker = self.lookup_approved_bunker(&request.bunker_ref).await?;
        let band = resolve_band(request.band.as_deref(), request.freq_mhz)?;
        let activator = request.activator_callsign.trim().to_uppercase();
        let now = Utc::now();

        // Same activator, same bunker, nearby frequency: refresh instead of
        // stacking a second live entry. The tolerance filter runs in the
        // query so a co-existing spot on another frequency cannot shadow
        // the matching one.
        if let Some(existing) = self
            .with_timeout(self.store.find_active_spot(
                &activator,
                &bunker.reference,
                request.freq_mhz,
                self.config.respot_freq_tolerance_mhz,
                now,
            ))
            .await?
        {
            let expires_at = now + self.config.spot_live_window;
            let refreshed = self
                .with_timeout(self.store.touch_spot(
                    existing.id,
                    expires_at,
                    request.freq_mhz,
                    &request.comment,
                ))
                .await?;
            if refreshed {
                log::debug!("re-spot for {} at {}", activator, bunker.reference);
                return Ok(Spot {
                    freq_mhz: request.freq_mhz.or(existing.freq_mhz),
                    comment: request.comment,
                    expires_at,
                    respot_count: existing.respot_count + 1,
                    ..existing
                });
            }
            // the spot expired under us; fall through and create anew
        }

        let spot = Spot {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            activator_callsign: activator,
            bunker_ref: bunker.reference,
            band,
            mode: normalize_mode(&request.mode),
            freq_mhz: request.freq_mhz,
            comment: request.comment,
            created_at: now,
            expires_at: now + self.config.spot_live_window,
            respot_count: 0,
            status: SpotStatus::Active,
        };
        self.with_timeout(self.store.insert_spot(&spot)).await?;
        log::info!(
            "spot created: {} at {} on {} ({})",
            spot.activator_callsign,
            spot.bunker_ref,
            spot.band,
            spot.mode
        );
        Ok(spot)
    }

    /// Active spots, newest first. Spots past their expiry are invisible
    /// even before the sweep archives them.
    pub async fn list_active(&self) -> Result<Vec<Spot>, CoreError> {
        self.with_timeout(self.store.list_active_spots(Utc::now()))
            .await
    }

    /// User-initiated early expiry. Returns false when the spot was already
    /// expired (or never existed).
    pub async fn cancel_spot(&self, id: Uuid) -> Result<bool, CoreError> {
        let claimed = self
            .with_timeout(self.store.expire_spot(id, Utc::now()))
            .await?;
        if claimed {
            log::info!("spot {} cancelled", id);
        }
        Ok(claimed)
    }

    /// One sweep cycle: claim every overdue spot and archive it.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, CoreError> {
        let due = self.with_timeout(self.store.due_spots(now)).await?;
        let mut stats = SweepStats::default();
        for id in due {
            if self.with_timeout(self.store.expire_spot(id, now)).await? {
                stats.expired += 1;
            } else {
                stats.already_claimed += 1;
            }
        }
        if stats.expired > 0 || stats.already_claimed > 0 {
            log::info!(
                "spot sweep: {} expired, {} already claimed",
                stats.expired,
                stats.already_claimed
            );
        }
        Ok(stats)
    }

    /// Recurring sweep loop; the caller spawns this on its runtime. Errors
    /// are logged and the next tick tries again - a failed cycle is never
    /// fatal.
    pub async fn sweep_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("spot sweep loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_sweep(Utc::now()).await {
                        log::warn!("spot sweep cycle failed: {}", e);
                    }
                }
            }
        }
    }

    async fn lookup_approved_bunker(&self, reference: &str) -> Result<Bunker, CoreError> {
        let reference = reference.trim().to_uppercase();
        let bunker = self
            .with_timeout(self.store.bunker_by_ref(&reference))
            .await?
            .ok_or_else(|| CoreError::UnknownBunker(reference.clone()))?;
        if bunker.status != BunkerStatus::Approved {
            return Err(CoreError::UnapprovedBunker(reference));
        }
        Ok(bunker)
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| CoreError::PersistenceTimeout(self.config.store_timeout))?
    }
}

fn resolve_band(band: Option<&str>, freq_mhz: Option<f64>) -> Result<String, CoreError> {
    if let Some(b) = band {
        let b = normalize_band(b);
        if !b.is_empty() {
            return Ok(b);
        }
    }
    match freq_mhz {
        Some(f) => freq_to_band(f)
            .map(str::to_string)
            .ok_or(CoreError::InvalidFrequency(f)),
        None => Err(CoreError::MissingBand),
    }
}
