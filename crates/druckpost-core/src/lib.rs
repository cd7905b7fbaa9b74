// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckpost — Core types, errors and configuration shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrokerConfig, DeliveryPolicy, RelayConfig, SinkTarget};
pub use error::DruckpostError;
pub use types::*;
