// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network manager seam.
//
// WiFi association and scanning are platform concerns outside the server
// core; the HTTP configuration pages only ever talk to this trait.

use tracing::{info, warn};

use spoolmux_core::types::WifiNetwork;

/// Platform networking collaborator for the `/wifi` pages.
pub trait NetworkManager {
    /// Current link status as display text.
    fn info(&self) -> String;

    /// Scan for nearby networks.
    ///
    /// The result is a finite, lazily produced sequence; it is consumed
    /// once while rendering and is not restartable mid-scan.
    fn scan(&mut self) -> Box<dyn Iterator<Item = WifiNetwork> + '_>;

    /// Begin an asynchronous reconnect to the given network. Called only
    /// after the HTTP response has been written and the connection closed,
    /// since reassociation may drop the link the client is on.
    fn connect_to(&mut self, ssid: &str, password: &str);
}

/// Network manager for hosts without managed WiFi (wired or container
/// deployments). Scans are empty and reconnect requests are refused.
#[derive(Default)]
pub struct StaticNetwork;

impl StaticNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl NetworkManager for StaticNetwork {
    fn info(&self) -> String {
        "wired/unmanaged link (WiFi configuration not available on this host)".into()
    }

    fn scan(&mut self) -> Box<dyn Iterator<Item = WifiNetwork> + '_> {
        Box::new(std::iter::empty())
    }

    fn connect_to(&mut self, ssid: &str, _password: &str) {
        warn!(ssid, "reconnect requested but this host has no managed WiFi");
    }
}

/// Network manager that answers from a fixed list. Useful for demos and
/// for exercising the `/wifi` page off-device.
pub struct FixedNetworks {
    networks: Vec<WifiNetwork>,
    connected: Option<String>,
}

impl FixedNetworks {
    pub fn new(networks: Vec<WifiNetwork>) -> Self {
        Self {
            networks,
            connected: None,
        }
    }
}

impl NetworkManager for FixedNetworks {
    fn info(&self) -> String {
        match &self.connected {
            Some(ssid) => format!("connected to {ssid}"),
            None => "not connected".into(),
        }
    }

    fn scan(&mut self) -> Box<dyn Iterator<Item = WifiNetwork> + '_> {
        Box::new(self.networks.iter().cloned())
    }

    fn connect_to(&mut self, ssid: &str, _password: &str) {
        info!(ssid, "connecting");
        self.connected = Some(ssid.to_string());
    }
}
