// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.
//
// Capacity, timeout, and port values are runtime configuration rather than
// compile-time constants so the dispatcher can be constructed with arbitrary
// values under test.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolmuxError};

/// Settings for one print server instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum number of simultaneous raw-print clients (slot table capacity).
    pub max_clients: usize,
    /// A raw-print job with no byte transferred for longer than this is
    /// cancelled and its client disconnected.
    pub job_timeout_ms: u64,
    /// Port for the raw byte-stream print listener (JetDirect convention).
    pub raw_port: u16,
    /// Port for the IPP listener (IANA-assigned for IPP is 631).
    pub ipp_port: u16,
    /// Port for the operator HTTP status/configuration pages.
    pub http_port: u16,
    /// Address all three listeners bind to.
    pub bind_addr: String,
    /// Directory where the spool engine writes received job data.
    pub spool_dir: PathBuf,
    /// Interval between dispatcher ticks in the run loop.
    pub tick_interval_ms: u64,
    /// Printer name advertised via mDNS and IPP printer attributes.
    pub printer_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 4,
            job_timeout_ms: 30_000,
            raw_port: 9100,
            ipp_port: 631,
            http_port: 8080,
            bind_addr: "0.0.0.0".into(),
            spool_dir: PathBuf::from("spool"),
            tick_interval_ms: 5,
            printer_name: "Spoolmux Printer".into(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults, so a partial file is
    /// valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SpoolmuxError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SpoolmuxError::Config(format!("parse {}: {e}", path.display())))?;
        Ok(config)
    }

    /// The job timeout as a `Duration`.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}
