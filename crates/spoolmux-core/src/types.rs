// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolmux print server.

use serde::{Deserialize, Serialize};

/// Index of a raw-print connection slot.
///
/// Slots are a fixed-capacity arena; the index is the job identity — there
/// is no separate job ID. A print job begins when a slot transitions
/// empty→occupied and ends when it transitions back.
pub type SlotIndex = usize;

/// Wireless security mode reported by a network scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiSecurity {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    Wpa3Psk,
    Unknown,
}

impl WifiSecurity {
    /// Human-readable label used on the WiFi configuration page.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Wep => "WEP",
            Self::WpaPsk => "WPA-PSK",
            Self::Wpa2Psk => "WPA2-PSK",
            Self::Wpa3Psk => "WPA3-PSK",
            Self::Unknown => "unknown",
        }
    }
}

/// One network produced by a WiFi scan.
///
/// Scans are modelled as a finite, non-restartable sequence of these
/// records so the HTTP handler stays decoupled from the network manager's
/// iteration mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub security: WifiSecurity,
    /// Received signal strength in dBm (negative; closer to 0 is stronger).
    pub signal_dbm: i16,
}

/// Occupancy of the connection slot table at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotUsage {
    pub used: usize,
    pub capacity: usize,
}

impl std::fmt::Display for SlotUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.used, self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_labels_are_stable() {
        assert_eq!(WifiSecurity::Open.label(), "open");
        assert_eq!(WifiSecurity::Wpa2Psk.label(), "WPA2-PSK");
    }

    #[test]
    fn slot_usage_displays_as_fraction() {
        let usage = SlotUsage { used: 2, capacity: 4 };
        assert_eq!(usage.to_string(), "2/4");
    }
}
