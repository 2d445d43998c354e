use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::ElectionContract;

pub const ENDED_LABEL: &str = "Ended";

/// Renders seconds left as `"{d}d {h}h {m}m {s}s"`, or `"Ended"` once nothing
/// is left.
pub fn format_remaining(secs: i64) -> String {
    if secs <= 0 {
        return ENDED_LABEL.to_string();
    }
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3_600;
    let minutes = secs % 3_600 / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}

/// Local countdown of the voting window, resynced against the contract on
/// every tick. The task is aborted when the ticker is stopped or dropped.
pub struct CountdownTicker {
    remaining: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl CountdownTicker {
    pub fn start(
        contract: Arc<dyn ElectionContract>,
        initial_secs: u64,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(initial_secs);
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        info!(initial_secs, interval_ms, "countdown: started");
        let task = tokio::spawn(run_ticker(contract, tx, interval));
        Self { remaining: rx, task }
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    pub fn label(&self) -> String {
        format_remaining(i64::try_from(self.remaining()).unwrap_or(i64::MAX))
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        if self.is_running() {
            debug!("countdown: stopping");
        }
        self.task.abort();
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_ticker(
    contract: Arc<dyn ElectionContract>,
    tx: watch::Sender<u64>,
    interval: Duration,
) {
    let interval = interval.max(Duration::from_millis(1));
    // Time elapsed since the estimate last dropped by a whole second.
    let mut carried = Duration::ZERO;
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        carried += interval;
        let step = carried.as_secs();
        carried -= Duration::from_secs(step);
        let mut estimate = tx.borrow().saturating_sub(step);
        tx.send_replace(estimate);

        match contract.remaining_time().await {
            Ok(remote) => {
                estimate = remote;
                carried = Duration::ZERO;
            }
            Err(err) => warn!(estimate, "countdown: resync failed, keeping local estimate: {err}"),
        }
        tx.send_replace(estimate);

        if estimate == 0 {
            info!("countdown: voting window elapsed");
            break;
        }
    }
}

#[cfg(test)]
#[path = "tests/countdown_tests.rs"]
mod tests;
