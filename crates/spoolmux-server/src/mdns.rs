// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// mDNS-SD advertisement for the print services.
//
// Registers `_ipp._tcp.local.` for the IPP endpoint and
// `_pdl-datastream._tcp.local.` for the raw byte-stream port so other
// devices on the LAN discover the printer automatically. Advertisement is
// best-effort: failures are logged and the server keeps working via
// direct IP.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

/// mDNS service type for plain IPP.
const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";

/// mDNS service type for raw socket printing (JetDirect).
const RAW_SERVICE_TYPE: &str = "_pdl-datastream._tcp.local.";

/// Keeps registered services alive; unregisters them on `shutdown`.
pub struct MdnsAdvertiser {
    daemon: Option<ServiceDaemon>,
    fullnames: Vec<String>,
}

impl MdnsAdvertiser {
    /// Register both print services under `printer_name`.
    pub fn advertise(printer_name: &str, ipp_port: u16, raw_port: u16) -> Self {
        let daemon = match ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to create mDNS daemon for advertisement");
                return Self {
                    daemon: None,
                    fullnames: Vec::new(),
                };
            }
        };

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "spoolmux".into());
        let host_fqdn = format!("{hostname}.local.");

        let mut fullnames = Vec::new();
        let services: [(&str, u16, &[(&str, &str)]); 2] = [
            (
                IPP_SERVICE_TYPE,
                ipp_port,
                &[
                    ("txtvers", "1"),
                    ("qtotal", "1"),
                    ("rp", "ipp/print"),
                    ("pdl", "application/octet-stream,text/plain"),
                ],
            ),
            (RAW_SERVICE_TYPE, raw_port, &[("txtvers", "1")]),
        ];

        for (service_type, port, properties) in services {
            match ServiceInfo::new(
                service_type,
                printer_name,
                &host_fqdn,
                "", // empty = auto-detect IP
                port,
                properties,
            ) {
                Ok(service_info) => {
                    let fullname = service_info.get_fullname().to_owned();
                    match daemon.register(service_info) {
                        Ok(_) => {
                            info!(service_type, port, "mDNS service registered");
                            fullnames.push(fullname);
                        }
                        Err(e) => warn!(service_type, error = %e, "mDNS register failed"),
                    }
                }
                Err(e) => warn!(service_type, error = %e, "mDNS ServiceInfo failed"),
            }
        }

        Self {
            daemon: Some(daemon),
            fullnames,
        }
    }

    /// Unregister all services and shut the daemon down.
    pub fn shutdown(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            for fullname in self.fullnames.drain(..) {
                match daemon.unregister(&fullname) {
                    Ok(_) => info!(name = %fullname, "mDNS service unregistered"),
                    Err(e) => warn!(name = %fullname, error = %e, "mDNS unregister failed"),
                }
            }
            if let Err(e) = daemon.shutdown() {
                warn!(error = %e, "mDNS daemon shutdown failed");
            }
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.shutdown();
    }
}
