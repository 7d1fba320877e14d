// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolmux Server — the single-threaded, tick-driven print multiplexer.
//
// One `PrintServer` drives three listeners (raw byte-stream printing, IPP,
// operator HTTP) and a fixed-capacity table of raw-print slots from a
// cooperative per-tick entry point. No handler blocks and no handler
// suspends; an external run loop calls `PrintServer::process` once per tick.

pub mod engine;
pub mod http;
pub mod ipp;
pub mod mdns;
pub mod netmgr;
pub mod server;
pub mod slots;
pub mod transport;

pub use engine::{PrintEngine, SpoolEngine};
pub use ipp::{EmbeddedIpp, IppService};
pub use netmgr::{NetworkManager, StaticNetwork};
pub use server::PrintServer;
pub use slots::SlotTable;
pub use transport::{Connection, Listener, TcpAcceptor};
