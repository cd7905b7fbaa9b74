// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Periodic health reporting.
//
// Purely observational: the monitor reads queue gauges, the upstream link
// flag and the printer status published by the delivery loop, and logs them.
// It never touches a queue or a sink, so removing it changes nothing but
// the logs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::delivery::SinkStatus;
use crate::queue::QueueGauge;

/// Connection state of the upstream (broker) side, set by whoever owns the
/// subscription.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    state: Arc<watch::Sender<bool>>,
}

impl LinkStatus {
    pub fn new(connected: bool) -> Self {
        let (state, _) = watch::channel(connected);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.state.send_replace(connected);
        if was && !connected {
            warn!("upstream link lost");
        } else if !was && connected {
            info!("upstream link established");
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub delivery_queue_depth: usize,
    pub delivery_queue_capacity: usize,
    pub callback_queue_depth: usize,
    pub callback_queue_capacity: usize,
    pub upstream_connected: bool,
    pub sink: SinkStatus,
}

/// Everything needed to build a [`HealthReport`].  Cheap to clone.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    pub delivery: QueueGauge,
    pub callbacks: QueueGauge,
    pub upstream: LinkStatus,
    pub sink: watch::Receiver<SinkStatus>,
}

impl HealthProbe {
    pub fn report(&self) -> HealthReport {
        HealthReport {
            delivery_queue_depth: self.delivery.depth(),
            delivery_queue_capacity: self.delivery.capacity(),
            callback_queue_depth: self.callbacks.depth(),
            callback_queue_capacity: self.callbacks.capacity(),
            upstream_connected: self.upstream.is_connected(),
            sink: self.sink.borrow().clone(),
        }
    }
}

pub struct HealthMonitor {
    probe: HealthProbe,
    interval: Duration,
    shutdown: CancellationToken,
}

impl HealthMonitor {
    pub fn new(probe: HealthProbe, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            probe,
            interval,
            shutdown,
        }
    }

    /// Log a report every interval until shutdown.  The first report comes
    /// one full interval after start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => log_report(&self.probe.report()),
            }
        }
    }
}

fn log_report(report: &HealthReport) {
    if !report.upstream_connected {
        error!("upstream link is down");
    }
    if report.sink.consecutive_failures > 0 {
        warn!(
            consecutive_failures = report.sink.consecutive_failures,
            last_error = report.sink.last_error.as_deref().unwrap_or(""),
            "printer is failing"
        );
    }
    info!(
        delivery_queue_len = report.delivery_queue_depth,
        callback_queue_len = report.callback_queue_depth,
        upstream_connected = report.upstream_connected,
        delivered = report.sink.delivered,
        dropped = report.sink.dropped,
        "health check"
    );
}
