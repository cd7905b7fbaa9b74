// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RelayService: owns the pipeline tasks and their shutdown order.
//
//   ingest ──▶ delivery queue ──▶ DeliveryLoop ──▶ sink
//                                      │
//                                      ▼
//                               callback queue ──▶ Notifier ──▶ HTTP
//
// Exactly one delivery loop and one notifier run per service.  The delivery
// loop holds the only callback sender, so the notifier finishes by itself
// once the loop has reported its last outcome.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use druckpost_core::config::RelayConfig;
use druckpost_core::error::{DruckpostError, Result};

use crate::delivery::DeliveryLoop;
use crate::health::{HealthMonitor, HealthProbe, HealthReport, LinkStatus};
use crate::ingest::IngestAdapter;
use crate::notifier::callback_channel;
use crate::queue;
use crate::sink::{PrinterSink, Sink};
use crate::transcode::{Cp850Transcoder, PayloadTransform};

pub struct RelayService {
    ingest: IngestAdapter,
    upstream: LinkStatus,
    probe: HealthProbe,
    shutdown: CancellationToken,
    delivery: JoinHandle<()>,
    notifier: JoinHandle<()>,
    health: JoinHandle<()>,
}

impl RelayService {
    /// Start the pipeline with the sink and transcoder named by `config`.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let sink = PrinterSink::from_config(&config.sink, &config.delivery);
        Self::start(config, sink, Arc::new(Cp850Transcoder))
    }

    /// Spawn the delivery loop, the notifier and the health monitor.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(sink = %sink))]
    pub fn start<S: Sink>(
        config: &RelayConfig,
        sink: S,
        transform: Arc<dyn PayloadTransform>,
    ) -> Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let (job_tx, job_rx) = queue::bounded(config.queue_capacity);
        let (callbacks, notifier) =
            callback_channel(config.callback_queue_capacity, config.callback_timeout)?;

        let callback_gauge = callbacks.gauge();

        let delivery = DeliveryLoop::new(sink, job_rx, callbacks, &config.delivery, shutdown.clone());
        let probe = HealthProbe {
            delivery: job_tx.gauge(),
            callbacks: callback_gauge,
            upstream: LinkStatus::new(false),
            sink: delivery.status(),
        };

        let ingest = IngestAdapter::new(job_tx, transform, shutdown.clone());
        let monitor = HealthMonitor::new(probe.clone(), config.health_interval, shutdown.clone());

        let service = Self {
            ingest,
            upstream: probe.upstream.clone(),
            probe,
            delivery: tokio::spawn(delivery.run()),
            notifier: tokio::spawn(notifier.run()),
            health: tokio::spawn(monitor.run()),
            shutdown,
        };
        info!(
            queue_capacity = config.queue_capacity,
            callback_queue_capacity = config.callback_queue_capacity,
            "relay started"
        );
        Ok(service)
    }

    /// Handle for feeding payloads into the pipeline.
    pub fn ingest(&self) -> IngestAdapter {
        self.ingest.clone()
    }

    /// Flag the broker collaborator sets when its subscription goes up or
    /// down.
    pub fn upstream(&self) -> LinkStatus {
        self.upstream.clone()
    }

    pub fn health(&self) -> HealthReport {
        self.probe.report()
    }

    /// Stop accepting work, report every undelivered job as failed, flush
    /// the callback queue and wait for all tasks to finish.
    pub async fn stop(self) -> Result<()> {
        info!("relay stopping");
        self.shutdown.cancel();
        drop(self.ingest);

        let mut result = Ok(());
        for (name, task) in [
            ("delivery", self.delivery),
            ("notifier", self.notifier),
            ("health", self.health),
        ] {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "task ended abnormally");
                if result.is_ok() {
                    result = Err(DruckpostError::Task(format!("{name}: {e}")));
                }
            }
        }

        info!("relay stopped");
        result
    }
}
