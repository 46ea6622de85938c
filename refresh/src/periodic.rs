//! Timer-driven full refresh across all tables

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::RefreshService;

/// Periodically refreshes every table the catalog lists.
///
/// Errors on one table are logged and do not stop the cycle. Tables whose
/// stored descriptor is younger than `min_age` are skipped. Shutdown is
/// honored between tables.
pub struct PeriodicRefresh {
    service: Arc<RefreshService>,
    interval: Duration,
    min_age: Duration,
}

impl PeriodicRefresh {
    pub fn new(service: Arc<RefreshService>, interval: Duration, min_age: Duration) -> Self {
        Self {
            service,
            interval,
            min_age,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("periodic refresh stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            self.cycle(&mut shutdown).await;
        }
    }

    async fn cycle(&self, shutdown: &mut broadcast::Receiver<()>) {
        let tables = match self.service.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                warn!("could not list tables for periodic refresh: {e}");
                return;
            }
        };

        let min_age = TimeDelta::from_std(self.min_age).unwrap_or(TimeDelta::MAX);

        for table in tables {
            if !matches!(
                shutdown.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ) {
                info!("periodic refresh interrupted by shutdown");
                return;
            }

            match self.service.last_updated_at(&table).await {
                Ok(Some(updated_at)) if Utc::now() - updated_at < min_age => {
                    info!(
                        "skipping refresh for table {table}, last updated at {}",
                        updated_at.to_rfc3339()
                    );
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("could not read last refresh time for table {table}: {e}");
                }
            }

            if let Err(e) = self.service.refresh_table_full(&table).await {
                warn!("could not refresh table {table}: {e}");
            }
        }
    }
}
