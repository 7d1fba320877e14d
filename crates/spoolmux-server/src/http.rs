// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator-facing HTTP surface: a minimal request parser and a static
// (method, exact path) route table for the status and WiFi pages.
//
// Responses are deliberately bare — `HTTP/1.1 <code> <reason>\r\n\r\n<body>`
// with no structured headers — because the only consumers are browsers
// poking at an embedded device. Routing never writes to the connection
// itself; the dispatcher owns writing and closure so that closing cannot
// depend on any single branch remembering to do it.

use spoolmux_core::error::{Result, SpoolmuxError};
use spoolmux_core::types::SlotUsage;

use crate::engine::PrintEngine;
use crate::netmgr::NetworkManager;

/// A parsed operator HTTP request. Not retained across ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// What the dispatcher must do after the response has been written and the
/// connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterResponse {
    None,
    /// Trigger a WiFi reconnect. Deferred because reassociation can drop
    /// the very link the HTTP client is using.
    ConnectWifi { ssid: String, password: String },
}

// ---------------------------------------------------------------------------
// Wire-format helpers (shared with the transport and IPP modules)
// ---------------------------------------------------------------------------

/// Offset of the first byte after the header-terminating double CRLF, or
/// `None` if the headers are not yet complete.
pub(crate) fn header_end(raw: &[u8]) -> Option<usize> {
    find_subsequence(raw, b"\r\n\r\n").map(|pos| pos + 4)
}

/// Extract a Content-Length value from a raw header block.
pub(crate) fn content_length(headers: &[u8]) -> Option<usize> {
    let headers = String::from_utf8_lossy(headers);
    headers
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|val| val.trim().parse().ok())
}

/// First occurrence of `needle` in `haystack`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Parse the request line and body of a raw HTTP request.
///
/// Only the pieces the route table needs are kept: method, exact path, and
/// the body (bounded by Content-Length when one was declared). Header
/// fields other than Content-Length are ignored.
pub fn parse_request(raw: &[u8]) -> Result<HttpRequest> {
    let header_end = header_end(raw)
        .ok_or_else(|| SpoolmuxError::HttpParse("incomplete request header".into()))?;

    let head = &raw[..header_end - 4];
    let request_line_end = find_subsequence(head, b"\r\n").unwrap_or(head.len());
    let request_line = String::from_utf8_lossy(&head[..request_line_end]);

    let mut parts = request_line.split_ascii_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| SpoolmuxError::HttpParse("missing method".into()))?;
    let path = parts
        .next()
        .ok_or_else(|| SpoolmuxError::HttpParse("missing request path".into()))?;
    if parts.next().is_none() {
        return Err(SpoolmuxError::HttpParse("missing HTTP version".into()));
    }

    let mut body = raw[header_end..].to_vec();
    if let Some(len) = content_length(head) {
        body.truncate(len);
    }

    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
    })
}

/// Decode an `application/x-www-form-urlencoded` body into key/value pairs.
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(body)
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key), url_decode(value))
        })
        .collect()
}

/// Percent-decoding with `+` as space. Malformed escapes pass through
/// verbatim rather than failing the whole form.
fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                match bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| u8::from_str_radix(&String::from_utf8_lossy(hex), 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Route a request to its response.
///
/// Unmatched method+path pairs always fall through to 404 — exact matches
/// only, no prefixes or wildcards. The returned `AfterResponse` runs once
/// the dispatcher has written the response and dropped the connection.
pub fn route(
    req: &HttpRequest,
    engine: &dyn PrintEngine,
    net: &mut dyn NetworkManager,
    usage: SlotUsage,
) -> (Vec<u8>, AfterResponse) {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/") => (landing_page(usage), AfterResponse::None),
        ("GET", "/printerInfo") => (response(200, "OK", &engine.info()), AfterResponse::None),
        ("GET", "/wifi") => (wifi_page(net), AfterResponse::None),
        ("POST", "/wifi-connect") => wifi_connect(req),
        _ => (
            response(404, "Not Found", "<h1>Not found</h1>"),
            AfterResponse::None,
        ),
    }
}

/// Minimal response: status line, blank line, body. No structured headers.
fn response(code: u16, reason: &str, body: &str) -> Vec<u8> {
    format!("HTTP/1.1 {code} {reason}\r\n\r\n{body}").into_bytes()
}

fn landing_page(usage: SlotUsage) -> Vec<u8> {
    response(
        200,
        "OK",
        &format!(
            "<h1>Spoolmux print server</h1>\
             <p>Raw-print slots in use: {usage}</p>\
             <a href=\"/wifi\">WiFi configuration</a><br>\
             <a href=\"/printerInfo\">Printer info</a>"
        ),
    )
}

fn wifi_page(net: &mut dyn NetworkManager) -> Vec<u8> {
    let mut body = format!(
        "<h1>WiFi configuration</h1><p>Status: {}</p>\
         <form method=\"POST\" action=\"/wifi-connect\">\
         Available networks (choose one to connect):<ul>",
        net.info()
    );
    for network in net.scan() {
        body.push_str(&format!(
            "<li><input type=\"radio\" name=\"SSID\" value=\"{ssid}\">{ssid} ({security}, {dbm} dBm)</li>",
            ssid = network.ssid,
            security = network.security.label(),
            dbm = network.signal_dbm,
        ));
    }
    body.push_str(
        "</ul>Password (leave blank for open networks): \
         <input type=\"password\" name=\"password\">\
         <input type=\"submit\" value=\"Connect\"></form>",
    );
    response(200, "OK", &body)
}

fn wifi_connect(req: &HttpRequest) -> (Vec<u8>, AfterResponse) {
    let form = parse_form(&req.body);
    let field = |name: &str| {
        form.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    };

    let ssid = field("SSID");
    if ssid.is_empty() {
        return (
            response(400, "Bad Request", "<h1>Missing SSID</h1>"),
            AfterResponse::None,
        );
    }

    (
        response(200, "OK", "<h1>OK</h1>"),
        AfterResponse::ConnectWifi {
            ssid,
            password: field("password"),
        },
    )
}
