// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckpost Relay — ingest, bounded queues, ordered delivery with retry,
// printer sinks and delivery callbacks.  Builds on the domain types defined
// in `druckpost-core`.

pub mod cp850;
pub mod delivery;
pub mod health;
pub mod ingest;
pub mod notifier;
pub mod queue;
pub mod retry;
pub mod service;
pub mod sink;
pub mod transcode;

pub use delivery::{DeliveryLoop, SinkStatus};
pub use health::{HealthMonitor, HealthReport, LinkStatus};
pub use ingest::IngestAdapter;
pub use notifier::{CallbackSender, Notifier};
pub use service::RelayService;
pub use sink::{DeviceSink, PrinterSink, Sink, TcpSink};
pub use transcode::{Cp850Transcoder, PayloadTransform};
