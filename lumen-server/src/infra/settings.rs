//! Applies persisted scanner settings to a running server.
//!
//! `lumen-server settings set` writes the `site_settings` row from another
//! process; the watcher picks the change up on its next refresh or on
//! SIGHUP, layering the file/env overrides on top as at startup.

use std::sync::Arc;
use std::time::Duration;

use lumen_core::database::Catalog;
use lumen_core::scan::ScanControl;
use lumen_model::SiteSettings;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infra::config::ScheduleOverrides;

/// Re-reads the persisted settings and pushes changes into the queue.
pub struct SettingsSync {
    catalog: Arc<dyn Catalog>,
    control: Arc<ScanControl>,
    overrides: ScheduleOverrides,
    applied: SiteSettings,
}

impl std::fmt::Debug for SettingsSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsSync")
            .field("overrides", &self.overrides)
            .field("applied", &self.applied)
            .finish_non_exhaustive()
    }
}

impl SettingsSync {
    /// `applied` is what the queue is currently running with.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        control: Arc<ScanControl>,
        overrides: ScheduleOverrides,
        applied: SiteSettings,
    ) -> Self {
        Self {
            catalog,
            control,
            overrides,
            applied,
        }
    }

    pub fn applied(&self) -> SiteSettings {
        self.applied
    }

    /// Returns whether the running settings changed.
    pub async fn refresh(&mut self) -> lumen_core::Result<bool> {
        let persisted = {
            let mut tx = self.catalog.begin().await?;
            let settings = tx.site_settings().await?;
            tx.commit().await?;
            settings
        };
        let effective = self.overrides.apply(persisted);
        if effective == self.applied {
            return Ok(false);
        }
        self.control.apply_settings(&effective)?;
        info!(
            workers = effective.concurrent_workers,
            interval_secs = effective.periodic_scan_interval,
            "scanner settings reloaded"
        );
        self.applied = effective;
        Ok(true)
    }

    /// Refresh every `every` (zero disables polling) and on SIGHUP until
    /// `shutdown` fires.
    pub fn spawn(mut self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = make_ticker(every);
            let mut hangup = hangup_signal();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = next_tick(&mut ticker) => {}
                    _ = next_hangup(&mut hangup) => {
                        debug!("SIGHUP received, reloading scanner settings");
                    }
                }
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "failed to reload scanner settings");
                }
            }
        })
    }
}

fn make_ticker(every: Duration) -> Option<Interval> {
    if every.is_zero() {
        return None;
    }
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(unix)]
type Hangup = Option<tokio::signal::unix::Signal>;

#[cfg(unix)]
fn hangup_signal() -> Hangup {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::hangup()) {
        Ok(signal) => Some(signal),
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGHUP");
            None
        }
    }
}

#[cfg(unix)]
async fn next_hangup(hangup: &mut Hangup) {
    let closed = match hangup.as_mut() {
        Some(signal) => signal.recv().await.is_none(),
        None => true,
    };
    if !closed {
        return;
    }
    *hangup = None;
    std::future::pending::<()>().await
}

#[cfg(not(unix))]
type Hangup = ();

#[cfg(not(unix))]
fn hangup_signal() -> Hangup {}

#[cfg(not(unix))]
async fn next_hangup(_: &mut Hangup) {
    std::future::pending::<()>().await
}
