// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The protocol dispatcher and job lifecycle driver.
//
// `PrintServer::process` is the per-tick entry point. Each tick services,
// in this fixed order: every slot in index order, then at most one raw
// accept, then at most one IPP request, then at most one HTTP request.
// Callers must not assume any fairness across ticks beyond this order.
//
// Per occupied slot, the lifecycle policy applies in order: liveness check
// first (cheapest, avoids operating on dead handles), then the one-byte
// feed (the common case), then the timeout eviction (the rare recovery
// path). At most one byte moves per slot per tick, which bounds worst-case
// tick latency and gives every slot equal service however much data the
// peer has buffered. A stalled engine plus an idle client always ends in
// the timeout path, so no slot can be wedged indefinitely.

use std::time::Instant;

use tracing::{debug, info, warn};

use spoolmux_core::config::ServerConfig;
use spoolmux_core::error::Result;
use spoolmux_core::types::{SlotIndex, SlotUsage};

use crate::engine::PrintEngine;
use crate::http::{self, AfterResponse};
use crate::ipp::{EmbeddedIpp, IppService};
use crate::mdns::MdnsAdvertiser;
use crate::netmgr::NetworkManager;
use crate::slots::SlotTable;
use crate::transport::{Listener, TcpAcceptor};

/// Cap for one operator HTTP request (status pages and small forms only).
const MAX_HTTP_REQUEST_BYTES: usize = 16 * 1024;

/// What the lifecycle policy decided for one slot this tick.
enum SlotAction {
    /// Peer is gone; release gracefully.
    Disconnected,
    /// One byte can move.
    Feed,
    /// No activity within the job timeout; evict.
    Evict,
    /// Waiting for data or engine capacity.
    Idle,
}

/// The tick-driven multi-protocol print multiplexer.
pub struct PrintServer {
    config: ServerConfig,
    slots: SlotTable,
    engine: Box<dyn PrintEngine>,
    netmgr: Box<dyn NetworkManager>,
    ipp: Box<dyn IppService>,
    raw_listener: Box<dyn Listener>,
    ipp_listener: Box<dyn Listener>,
    http_listener: Box<dyn Listener>,
    mdns: Option<MdnsAdvertiser>,
}

impl PrintServer {
    /// Assemble a server from explicit parts. `bind` is the production
    /// path; this constructor is the seam for driving the dispatcher with
    /// scripted listeners and engines.
    pub fn new(
        config: ServerConfig,
        engine: Box<dyn PrintEngine>,
        netmgr: Box<dyn NetworkManager>,
        ipp: Box<dyn IppService>,
        raw_listener: Box<dyn Listener>,
        ipp_listener: Box<dyn Listener>,
        http_listener: Box<dyn Listener>,
    ) -> Self {
        let slots = SlotTable::new(config.max_clients);
        Self {
            config,
            slots,
            engine,
            netmgr,
            ipp,
            raw_listener,
            ipp_listener,
            http_listener,
            mdns: None,
        }
    }

    /// Bind all three listeners, wire up the embedded IPP endpoint, and
    /// advertise the services via mDNS.
    pub fn bind(
        config: ServerConfig,
        engine: Box<dyn PrintEngine>,
        netmgr: Box<dyn NetworkManager>,
    ) -> Result<Self> {
        let raw_listener = TcpAcceptor::bind(&config.bind_addr, config.raw_port)?;
        let ipp_listener = TcpAcceptor::bind(&config.bind_addr, config.ipp_port)?;
        let http_listener = TcpAcceptor::bind(&config.bind_addr, config.http_port)?;

        info!(
            raw_port = raw_listener.local_port(),
            ipp_port = ipp_listener.local_port(),
            http_port = http_listener.local_port(),
            max_clients = config.max_clients,
            "print server listening"
        );

        let ipp = EmbeddedIpp::new(config.printer_name.clone(), ipp_listener.local_port());
        let mdns = MdnsAdvertiser::advertise(
            &config.printer_name,
            ipp_listener.local_port(),
            raw_listener.local_port(),
        );

        let mut server = Self::new(
            config,
            engine,
            netmgr,
            Box::new(ipp),
            Box::new(raw_listener),
            Box::new(ipp_listener),
            Box::new(http_listener),
        );
        server.mdns = Some(mdns);
        Ok(server)
    }

    /// One dispatcher tick. Never blocks.
    pub fn process(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Tick with an explicit clock reading, so timeout behaviour is exact
    /// under test.
    pub(crate) fn tick_at(&mut self, now: Instant) {
        for index in 0..self.slots.capacity() {
            if self.slots.is_occupied(index) {
                self.drive_slot(index, now);
            }
        }
        self.accept_raw(now);
        self.service_ipp();
        self.service_http();
    }

    /// Current slot occupancy.
    pub fn usage(&self) -> SlotUsage {
        self.slots.usage()
    }

    /// Periodic status line for the operator log.
    pub fn log_status(&self) {
        info!(slots = %self.slots.usage(), "server slots");
    }

    /// Cancel in-flight jobs and withdraw the mDNS advertisement.
    pub fn shutdown(&mut self) {
        for index in 0..self.slots.capacity() {
            if self.slots.is_occupied(index) {
                warn!(slot = index, "cancelling in-flight job on shutdown");
                self.release(index, true);
            }
        }
        if let Some(mdns) = self.mdns.as_mut() {
            mdns.shutdown();
        }
    }

    // -- job lifecycle ------------------------------------------------------

    fn drive_slot(&mut self, index: SlotIndex, now: Instant) {
        let timeout = self.config.job_timeout();

        let action = {
            let Some(slot) = self.slots.get_mut(index) else {
                return;
            };
            if !slot.conn.is_alive() {
                SlotAction::Disconnected
            } else if slot.conn.has_data() && self.engine.can_print(index) {
                SlotAction::Feed
            } else if now.duration_since(slot.last_interaction) > timeout {
                SlotAction::Evict
            } else {
                SlotAction::Idle
            }
        };

        match action {
            SlotAction::Disconnected => {
                info!(slot = index, "client disconnected");
                self.release(index, false);
            }
            SlotAction::Feed => {
                if let Some(slot) = self.slots.get_mut(index) {
                    if let Some(byte) = slot.conn.try_read_byte() {
                        self.engine.print_byte(index, byte);
                        slot.last_interaction = now;
                    }
                }
            }
            SlotAction::Evict => {
                warn!(slot = index, "cancelling print job and disconnecting client");
                self.release(index, true);
            }
            SlotAction::Idle => {}
        }
    }

    /// Empty the slot, close its connection, and fire the end-of-job
    /// notification. Every occupy is paired with exactly one call here.
    fn release(&mut self, index: SlotIndex, failed: bool) {
        if let Some(slot) = self.slots.release(index) {
            drop(slot); // closes the connection before the engine hears about it
            self.engine.end_job(index, failed);
        }
    }

    // -- protocol listeners -------------------------------------------------

    /// Accept at most one raw-print client, and only when a slot is free.
    /// With a full table the pending connection is left in the listener
    /// backlog — backpressure, not rejection.
    fn accept_raw(&mut self, now: Instant) {
        let Some(index) = self.slots.find_free() else {
            return;
        };
        if let Some(conn) = self.raw_listener.poll() {
            info!(slot = index, peer = %conn.peer(), "raw print client connected");
            self.slots.occupy(index, conn, now);
            self.engine.start_job(index);
        }
    }

    /// Service at most one IPP request to completion. The handler owns the
    /// full exchange; the connection closes when it drops here.
    fn service_ipp(&mut self) {
        if let Some(mut conn) = self.ipp_listener.poll() {
            debug!(peer = %conn.peer(), "incoming IPP connection");
            if let Err(e) = self.ipp.handle(&mut *conn, &*self.engine) {
                warn!(peer = %conn.peer(), error = %e, "IPP request failed");
            }
        }
    }

    /// Service at most one operator HTTP request to completion.
    ///
    /// The connection is scoped to this function: every exit path —
    /// read failure, header parse failure, routed response — closes it by
    /// dropping it, so no branch has to remember closure.
    fn service_http(&mut self) {
        let Some(mut conn) = self.http_listener.poll() else {
            return;
        };
        let started = Instant::now();
        let peer = conn.peer();
        debug!(peer = %peer, "incoming HTTP connection");

        let raw = match conn.read_request(MAX_HTTP_REQUEST_BYTES) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(peer = %peer, error = %e, "HTTP read failed");
                return;
            }
        };
        let request = match http::parse_request(&raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %peer, error = %e, "HTTP header parse failed");
                return;
            }
        };

        let usage = self.slots.usage();
        let (response, after) = http::route(&request, &*self.engine, &mut *self.netmgr, usage);

        if let Err(e) = conn.write_all(&response) {
            warn!(peer = %peer, error = %e, "HTTP response write failed");
        }
        // Close before any deferred action: a WiFi reconnect may drop the
        // link this client is on.
        drop(conn);

        if let AfterResponse::ConnectWifi { ssid, password } = after {
            info!(ssid = %ssid, "triggering WiFi reconnect");
            self.netmgr.connect_to(&ssid, &password);
        }

        info!(
            peer = %peer,
            method = %request.method,
            path = %request.path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HTTP request handled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::transport::testing::{
        Event, EventLog, ScriptHandle, ScriptedConnection, ScriptedListener, event_log,
    };
    use crate::transport::Connection;
    use spoolmux_core::types::WifiNetwork;

    // -- fakes --------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum EngineEvent {
        Start(usize),
        Byte(usize, u8),
        End(usize, bool),
        Info,
    }

    struct RecordingEngine {
        events: Rc<RefCell<Vec<EngineEvent>>>,
        capacity_available: Rc<Cell<bool>>,
    }

    impl PrintEngine for RecordingEngine {
        fn can_print(&self, _slot: usize) -> bool {
            self.capacity_available.get()
        }
        fn print_byte(&mut self, slot: usize, byte: u8) {
            self.events.borrow_mut().push(EngineEvent::Byte(slot, byte));
        }
        fn start_job(&mut self, slot: usize) {
            self.events.borrow_mut().push(EngineEvent::Start(slot));
        }
        fn end_job(&mut self, slot: usize, failed: bool) {
            self.events.borrow_mut().push(EngineEvent::End(slot, failed));
        }
        fn info(&self) -> String {
            self.events.borrow_mut().push(EngineEvent::Info);
            "test engine".into()
        }
    }

    /// Network manager that writes into the shared transport event log so
    /// ordering against writes/closes is assertable.
    struct EventNetwork {
        log: EventLog,
    }

    impl NetworkManager for EventNetwork {
        fn info(&self) -> String {
            "test network".into()
        }
        fn scan(&mut self) -> Box<dyn Iterator<Item = WifiNetwork> + '_> {
            Box::new(std::iter::empty())
        }
        fn connect_to(&mut self, ssid: &str, password: &str) {
            self.log.borrow_mut().push(Event::ConnectTo {
                ssid: ssid.into(),
                password: password.into(),
            });
        }
    }

    struct CountingIpp {
        handled: Rc<Cell<usize>>,
    }

    impl IppService for CountingIpp {
        fn handle(
            &mut self,
            _conn: &mut dyn Connection,
            _engine: &dyn PrintEngine,
        ) -> spoolmux_core::error::Result<()> {
            self.handled.set(self.handled.get() + 1);
            Ok(())
        }
    }

    struct Harness {
        server: PrintServer,
        engine_events: Rc<RefCell<Vec<EngineEvent>>>,
        engine_capacity: Rc<Cell<bool>>,
        log: EventLog,
        raw_pending: Rc<RefCell<VecDeque<Box<dyn Connection>>>>,
        ipp_pending: Rc<RefCell<VecDeque<Box<dyn Connection>>>>,
        http_pending: Rc<RefCell<VecDeque<Box<dyn Connection>>>>,
        ipp_handled: Rc<Cell<usize>>,
    }

    fn harness(max_clients: usize, job_timeout_ms: u64) -> Harness {
        let config = ServerConfig {
            max_clients,
            job_timeout_ms,
            ..ServerConfig::default()
        };
        let engine_events = Rc::new(RefCell::new(Vec::new()));
        let engine_capacity = Rc::new(Cell::new(true));
        let log = event_log();
        let ipp_handled = Rc::new(Cell::new(0));

        let (raw_listener, raw_pending) = ScriptedListener::new();
        let (ipp_listener, ipp_pending) = ScriptedListener::new();
        let (http_listener, http_pending) = ScriptedListener::new();

        let server = PrintServer::new(
            config,
            Box::new(RecordingEngine {
                events: Rc::clone(&engine_events),
                capacity_available: Rc::clone(&engine_capacity),
            }),
            Box::new(EventNetwork {
                log: Rc::clone(&log),
            }),
            Box::new(CountingIpp {
                handled: Rc::clone(&ipp_handled),
            }),
            Box::new(raw_listener),
            Box::new(ipp_listener),
            Box::new(http_listener),
        );

        Harness {
            server,
            engine_events,
            engine_capacity,
            log,
            raw_pending,
            ipp_pending,
            http_pending,
            ipp_handled,
        }
    }

    impl Harness {
        fn push_raw(&self, data: &[u8]) -> ScriptHandle {
            let (conn, handle) = ScriptedConnection::new(data, Rc::clone(&self.log));
            self.raw_pending.borrow_mut().push_back(Box::new(conn));
            handle
        }

        fn push_http(&self, data: &[u8]) -> ScriptHandle {
            let (conn, handle) = ScriptedConnection::new(data, Rc::clone(&self.log));
            self.http_pending.borrow_mut().push_back(Box::new(conn));
            handle
        }

        fn engine_events(&self) -> Vec<EngineEvent> {
            self.engine_events.borrow().clone()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // -- raw slot lifecycle -------------------------------------------------

    #[test]
    fn accept_occupies_lowest_free_slot_and_starts_job() {
        let mut h = harness(4, 30_000);
        h.push_raw(b"");
        h.server.tick_at(Instant::now());

        assert_eq!(h.engine_events(), vec![EngineEvent::Start(0)]);
        assert_eq!(h.server.usage().to_string(), "1/4");
    }

    #[test]
    fn at_most_one_raw_accept_per_tick() {
        let mut h = harness(4, 30_000);
        h.push_raw(b"");
        h.push_raw(b"");

        h.server.tick_at(Instant::now());
        assert_eq!(h.raw_pending.borrow().len(), 1);
        assert_eq!(h.engine_events(), vec![EngineEvent::Start(0)]);

        h.server.tick_at(Instant::now());
        assert!(h.raw_pending.borrow().is_empty());
        assert_eq!(
            h.engine_events(),
            vec![EngineEvent::Start(0), EngineEvent::Start(1)]
        );
    }

    #[test]
    fn full_table_leaves_pending_connection_unaccepted() {
        let mut h = harness(1, 30_000);
        h.push_raw(b"");
        h.server.tick_at(Instant::now());
        assert_eq!(h.server.usage().to_string(), "1/1");

        h.push_raw(b"");
        for _ in 0..3 {
            h.server.tick_at(Instant::now());
        }
        // Backpressure: the second client stays in the backlog untouched.
        assert_eq!(h.raw_pending.borrow().len(), 1);
        assert_eq!(h.engine_events(), vec![EngineEvent::Start(0)]);
    }

    #[test]
    fn one_byte_per_slot_per_tick_even_when_more_is_buffered() {
        let mut h = harness(2, 30_000);
        let handle = h.push_raw(b"abc");
        let t0 = Instant::now();

        h.server.tick_at(t0); // slots scanned before accept, so no byte yet
        assert_eq!(h.engine_events(), vec![EngineEvent::Start(0)]);
        assert_eq!(handle.unread(), 3);

        h.server.tick_at(t0 + ms(1));
        assert_eq!(handle.unread(), 2);
        h.server.tick_at(t0 + ms(2));
        assert_eq!(handle.unread(), 1);

        assert_eq!(
            h.engine_events(),
            vec![
                EngineEvent::Start(0),
                EngineEvent::Byte(0, b'a'),
                EngineEvent::Byte(0, b'b'),
            ]
        );
    }

    #[test]
    fn stalled_engine_stops_consumption_until_capacity_returns() {
        let mut h = harness(1, 30_000);
        let handle = h.push_raw(b"xy");
        let t0 = Instant::now();
        h.server.tick_at(t0);

        h.engine_capacity.set(false);
        h.server.tick_at(t0 + ms(1));
        h.server.tick_at(t0 + ms(2));
        assert_eq!(handle.unread(), 2);

        h.engine_capacity.set(true);
        h.server.tick_at(t0 + ms(3));
        assert_eq!(handle.unread(), 1);
        assert!(h.engine_events().contains(&EngineEvent::Byte(0, b'x')));
    }

    #[test]
    fn graceful_disconnect_releases_with_failed_false() {
        let mut h = harness(1, 30_000);
        let handle = h.push_raw(b"");
        let t0 = Instant::now();
        h.server.tick_at(t0);

        handle.hang_up();
        h.server.tick_at(t0 + ms(1));

        assert_eq!(
            h.engine_events(),
            vec![EngineEvent::Start(0), EngineEvent::End(0, false)]
        );
        assert_eq!(h.server.usage().used, 0);
        // The connection itself was dropped (closed).
        assert!(h.log.borrow().contains(&Event::Closed));
    }

    #[test]
    fn hung_up_peer_with_buffered_data_still_drains() {
        let mut h = harness(1, 30_000);
        let handle = h.push_raw(b"z");
        let t0 = Instant::now();
        h.server.tick_at(t0);

        handle.hang_up();
        h.server.tick_at(t0 + ms(1)); // drains the final byte
        h.server.tick_at(t0 + ms(2)); // then notices the disconnect

        assert_eq!(
            h.engine_events(),
            vec![
                EngineEvent::Start(0),
                EngineEvent::Byte(0, b'z'),
                EngineEvent::End(0, false),
            ]
        );
    }

    #[test]
    fn idle_job_times_out_at_threshold_and_never_before() {
        let mut h = harness(1, 30_000);
        h.push_raw(b"");
        let t0 = Instant::now();
        h.server.tick_at(t0);

        h.server.tick_at(t0 + ms(29_999));
        assert_eq!(h.server.usage().used, 1, "29999ms elapsed: still occupied");

        h.server.tick_at(t0 + ms(30_000));
        assert_eq!(h.server.usage().used, 1, "exactly at threshold: still occupied");

        h.server.tick_at(t0 + ms(30_001));
        assert_eq!(h.server.usage().used, 0, "30001ms elapsed: evicted");
        assert_eq!(
            h.engine_events(),
            vec![EngineEvent::Start(0), EngineEvent::End(0, true)]
        );
    }

    #[test]
    fn byte_transfer_refreshes_the_timeout_clock() {
        let mut h = harness(1, 30_000);
        h.push_raw(b"q");
        let t0 = Instant::now();
        h.server.tick_at(t0);

        // One byte moves at t0+29s, pushing the deadline out.
        h.server.tick_at(t0 + ms(29_000));
        assert!(h.engine_events().contains(&EngineEvent::Byte(0, b'q')));

        h.server.tick_at(t0 + ms(59_000));
        assert_eq!(h.server.usage().used, 1);

        h.server.tick_at(t0 + ms(59_001));
        assert_eq!(h.server.usage().used, 0);
        assert!(h.engine_events().contains(&EngineEvent::End(0, true)));
    }

    #[test]
    fn start_and_end_notifications_strictly_alternate() {
        let mut h = harness(1, 30_000);
        let t0 = Instant::now();

        // First job: ends by disconnect.
        let first = h.push_raw(b"");
        h.server.tick_at(t0);
        first.hang_up();
        h.server.tick_at(t0 + ms(1));

        // Second job in the same slot: ends by timeout.
        h.push_raw(b"");
        h.server.tick_at(t0 + ms(2));
        h.server.tick_at(t0 + ms(40_000));

        assert_eq!(
            h.engine_events(),
            vec![
                EngineEvent::Start(0),
                EngineEvent::End(0, false),
                EngineEvent::Start(0),
                EngineEvent::End(0, true),
            ]
        );
    }

    #[test]
    fn shutdown_cancels_in_flight_jobs() {
        let mut h = harness(2, 30_000);
        h.push_raw(b"");
        h.server.tick_at(Instant::now());

        h.server.shutdown();
        assert_eq!(
            h.engine_events(),
            vec![EngineEvent::Start(0), EngineEvent::End(0, true)]
        );
        assert_eq!(h.server.usage().used, 0);
    }

    // -- IPP ----------------------------------------------------------------

    #[test]
    fn at_most_one_ipp_request_per_tick() {
        let mut h = harness(1, 30_000);
        for _ in 0..2 {
            let (conn, _handle) = ScriptedConnection::new(b"", Rc::clone(&h.log));
            h.ipp_pending.borrow_mut().push_back(Box::new(conn));
        }

        h.server.tick_at(Instant::now());
        assert_eq!(h.ipp_handled.get(), 1);
        h.server.tick_at(Instant::now());
        assert_eq!(h.ipp_handled.get(), 2);
    }

    // -- HTTP ---------------------------------------------------------------

    #[test]
    fn printer_info_served_and_connection_closed() {
        let mut h = harness(1, 30_000);
        h.push_http(b"GET /printerInfo HTTP/1.1\r\n\r\n");
        h.server.tick_at(Instant::now());

        let log = h.log.borrow();
        assert_eq!(
            log.as_slice(),
            &[
                Event::Wrote(b"HTTP/1.1 200 OK\r\n\r\ntest engine".to_vec()),
                Event::Closed,
            ]
        );
        assert_eq!(h.engine_events(), vec![EngineEvent::Info]);
    }

    #[test]
    fn wifi_connect_fires_after_response_written_and_closed() {
        let mut h = harness(1, 30_000);
        h.push_http(
            b"POST /wifi-connect HTTP/1.1\r\nContent-Length: 25\r\n\r\nSSID=Home&password=secret",
        );
        h.server.tick_at(Instant::now());

        let log = h.log.borrow();
        assert_eq!(log.len(), 3);
        assert!(matches!(log[0], Event::Wrote(ref bytes)
            if bytes.starts_with(b"HTTP/1.1 200 OK\r\n\r\n")));
        assert_eq!(log[1], Event::Closed);
        assert_eq!(
            log[2],
            Event::ConnectTo {
                ssid: "Home".into(),
                password: "secret".into(),
            }
        );
    }

    #[test]
    fn unparseable_http_request_is_dropped_and_closed() {
        let mut h = harness(1, 30_000);
        h.push_http(b"complete garbage");
        h.server.tick_at(Instant::now());

        // No response written, but the connection was still closed.
        assert_eq!(h.log.borrow().as_slice(), &[Event::Closed]);
    }

    #[test]
    fn unknown_path_gets_404_with_no_action_calls() {
        let mut h = harness(1, 30_000);
        h.push_http(b"GET /foo HTTP/1.1\r\n\r\n");
        h.server.tick_at(Instant::now());

        let log = h.log.borrow();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], Event::Wrote(ref bytes)
            if bytes.starts_with(b"HTTP/1.1 404 Not Found\r\n\r\n")));
        assert_eq!(log[1], Event::Closed);
        assert!(h.engine_events().is_empty());
    }

    #[test]
    fn at_most_one_http_request_per_tick() {
        let mut h = harness(1, 30_000);
        h.push_http(b"GET / HTTP/1.1\r\n\r\n");
        h.push_http(b"GET / HTTP/1.1\r\n\r\n");

        h.server.tick_at(Instant::now());
        assert_eq!(h.http_pending.borrow().len(), 1);
        h.server.tick_at(Instant::now());
        assert!(h.http_pending.borrow().is_empty());
    }
}
