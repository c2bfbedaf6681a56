use std::sync::Arc;

use tarmac_catalog::InventoryManager;
use tarmac_governor::BookingGovernor;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Periodically sweeps override windows, rolls elapsed limit periods and
/// releases stale seat holds.
pub async fn start_sweep_worker(governor: Arc<BookingGovernor>, inventory: Arc<InventoryManager>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "Sweep worker started");

    loop {
        ticker.tick().await;
        run_once(&governor, &inventory).await;
    }
}

pub async fn run_once(governor: &BookingGovernor, inventory: &InventoryManager) {
    match governor.sweep_overrides().await {
        Ok(report) if !report.activated.is_empty() || !report.expired.is_empty() => {
            info!(
                activated = report.activated.len(),
                expired = report.expired.len(),
                "override sweep"
            );
        }
        Ok(_) => {}
        Err(e) => error!("Override sweep failed: {}", e),
    }

    match governor.roll_over_periods().await {
        Ok(reset) if !reset.is_empty() => info!(limits = reset.len(), "limit periods rolled over"),
        Ok(_) => {}
        Err(e) => error!("Limit rollover failed: {}", e),
    }

    match inventory.expire_holds().await {
        Ok(0) => {}
        Ok(expired) => info!(holds = expired, "stale seat holds released"),
        Err(e) => error!("Hold expiry failed: {}", e),
    }
}
