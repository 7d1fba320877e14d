// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Embedded IPP/1.1 request handler.
//
// IPP is transported over HTTP POST (RFC 8010 S3), but this handler works
// directly on the one-shot connection the dispatcher hands it: the whole
// request is read, the HTTP framing stripped, the binary IPP payload
// parsed, and one response written back — all within the tick that
// discovered the connection. No request state survives a tick boundary.
//
// Supported operations:
//
//   - Print-Job         (0x0002)  RFC 8011 S4.2.1
//   - Validate-Job      (0x0004)  RFC 8011 S4.2.3
//   - Get-Printer-Attrs (0x000B)  RFC 8011 S4.2.5
//
// Anything else gets `server-error-operation-not-supported`. Print-Job
// document data is hashed (SHA-256) and acknowledged; there is no job
// queue, so accepted jobs are reported as already completed.

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use spoolmux_core::error::{Result, SpoolmuxError};

use crate::engine::PrintEngine;
use crate::http;
use crate::transport::Connection;

/// Maximum bytes to accept for one IPP request (framing included).
const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

/// IPP version 1.1.
pub const IPP_VERSION_MAJOR: u8 = 0x01;
pub const IPP_VERSION_MINOR: u8 = 0x01;

// Delimiter tags (RFC 8010 S3.5.1).
pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;
pub const TAG_PRINTER_ATTRIBUTES: u8 = 0x04;

// Value tags (RFC 8010 S3.5.2).
pub const VALUE_TAG_INTEGER: u8 = 0x21;
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;
pub const VALUE_TAG_ENUM: u8 = 0x23;
pub const VALUE_TAG_TEXT: u8 = 0x41;
pub const VALUE_TAG_NAME: u8 = 0x42;
pub const VALUE_TAG_KEYWORD: u8 = 0x44;
pub const VALUE_TAG_URI: u8 = 0x45;
pub const VALUE_TAG_CHARSET: u8 = 0x47;
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;

// Operation ids (RFC 8011 S4).
pub const OP_PRINT_JOB: u16 = 0x0002;
pub const OP_VALIDATE_JOB: u16 = 0x0004;
pub const OP_GET_PRINTER_ATTRIBUTES: u16 = 0x000B;

// Status codes (RFC 8011 S4.1.8).
pub const STATUS_OK: u16 = 0x0000;
pub const STATUS_CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;
pub const STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;

/// job-state: completed (RFC 8011 S4.3.7).
const JOB_STATE_COMPLETED: i32 = 9;

/// printer-state: idle (RFC 8011 S4.4.11).
const PRINTER_STATE_IDLE: i32 = 3;

// ---------------------------------------------------------------------------
// Parsed request model
// ---------------------------------------------------------------------------

/// One parsed IPP attribute.
#[derive(Debug, Clone)]
pub struct IppAttribute {
    pub value_tag: u8,
    /// Empty for additional values of a 1setOf.
    pub name: String,
    pub value: Vec<u8>,
}

/// Attributes under one delimiter tag.
#[derive(Debug, Clone)]
pub struct IppAttributeGroup {
    pub delimiter: u8,
    pub attributes: Vec<IppAttribute>,
}

impl IppAttributeGroup {
    /// First attribute with the given name, decoded as UTF-8.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| String::from_utf8(a.value.clone()).ok())
    }
}

/// A fully parsed IPP request.
#[derive(Debug)]
pub struct IppRequest {
    pub version_major: u8,
    pub version_minor: u8,
    pub operation_id: u16,
    /// Echoed back in the response.
    pub request_id: u32,
    pub attribute_groups: Vec<IppAttributeGroup>,
    /// Everything after the end-of-attributes tag.
    pub document_data: Vec<u8>,
}

impl IppRequest {
    pub fn operation_attributes(&self) -> Option<&IppAttributeGroup> {
        self.attribute_groups
            .iter()
            .find(|g| g.delimiter == TAG_OPERATION_ATTRIBUTES)
    }
}

// ---------------------------------------------------------------------------
// Binary parser (RFC 8010 S3.1)
// ---------------------------------------------------------------------------

/// Byte cursor over the request payload.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SpoolmuxError::Ipp(format!("truncated {what}")));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Parse a raw IPP message body.
pub fn parse_ipp_request(data: &[u8]) -> Result<IppRequest> {
    if data.len() < 8 {
        return Err(SpoolmuxError::Ipp(format!(
            "request too short: {} bytes (minimum 8)",
            data.len()
        )));
    }

    let mut cur = Cursor { data, pos: 0 };
    let version_major = cur.u8("version")?;
    let version_minor = cur.u8("version")?;
    let operation_id = cur.u16("operation-id")?;
    let request_id = cur.u32("request-id")?;

    let mut groups: Vec<IppAttributeGroup> = Vec::new();
    let mut current: Option<IppAttributeGroup> = None;

    while cur.remaining() > 0 {
        let tag = cur.u8("tag")?;

        // Delimiter tags occupy 0x00..=0x0F.
        if tag <= 0x0F {
            if let Some(group) = current.take() {
                groups.push(group);
            }
            if tag == TAG_END_OF_ATTRIBUTES {
                break;
            }
            current = Some(IppAttributeGroup {
                delimiter: tag,
                attributes: Vec::new(),
            });
            continue;
        }

        let name_len = cur.u16("name-length")? as usize;
        let name = String::from_utf8_lossy(cur.take(name_len, "attribute name")?).into_owned();
        let value_len = cur.u16("value-length")? as usize;
        let value = cur.take(value_len, "attribute value")?.to_vec();

        let attr = IppAttribute {
            value_tag: tag,
            name,
            value,
        };
        match current.as_mut() {
            Some(group) => group.attributes.push(attr),
            // Attribute outside any group is malformed; discard it.
            None => warn!("IPP attribute outside of any group — discarded"),
        }
    }

    if let Some(group) = current.take() {
        groups.push(group);
    }

    Ok(IppRequest {
        version_major,
        version_minor,
        operation_id,
        request_id,
        attribute_groups: groups,
        document_data: data[cur.pos..].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Binary response builder (RFC 8010 S3.4)
// ---------------------------------------------------------------------------

/// Builder for IPP response messages.
pub struct IppResponseBuilder {
    buf: Vec<u8>,
}

impl IppResponseBuilder {
    pub fn new(status_code: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(IPP_VERSION_MAJOR);
        buf.push(IPP_VERSION_MINOR);
        buf.extend_from_slice(&status_code.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        Self { buf }
    }

    pub fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_TEXT, name, value.as_bytes())
    }

    pub fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_NAME, name, value.as_bytes())
    }

    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_KEYWORD, name, value.as_bytes())
    }

    /// Additional value of a 1setOf: name-length zero (RFC 8010 S3.1.4).
    pub fn keyword_additional(&mut self, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_KEYWORD, "", value.as_bytes())
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_URI, name, value.as_bytes())
    }

    pub fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_CHARSET, name, value.as_bytes())
    }

    pub fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(VALUE_TAG_NATURAL_LANGUAGE, name, value.as_bytes())
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.attr(VALUE_TAG_INTEGER, name, &value.to_be_bytes())
    }

    pub fn enum_attr(&mut self, name: &str, value: i32) -> &mut Self {
        self.attr(VALUE_TAG_ENUM, name, &value.to_be_bytes())
    }

    pub fn boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.attr(VALUE_TAG_BOOLEAN, name, &[u8::from(value)])
    }

    fn attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        self.buf.push(value_tag);
        self.buf
            .extend_from_slice(&(name.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.buf.push(TAG_END_OF_ATTRIBUTES);
        self.buf
    }
}

/// Response whose operation group carries only the required charset,
/// language, and a status message.
fn status_response(status: u16, request_id: u32, message: &str) -> Vec<u8> {
    let mut resp = IppResponseBuilder::new(status, request_id);
    resp.begin_group(TAG_OPERATION_ATTRIBUTES)
        .charset("attributes-charset", "utf-8")
        .natural_language("attributes-natural-language", "en")
        .text("status-message", message);
    resp.build()
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// The IPP collaborator seam: owns the full request/response exchange on a
/// connection the dispatcher discovered this tick.
pub trait IppService {
    fn handle(&mut self, conn: &mut dyn Connection, engine: &dyn PrintEngine) -> Result<()>;
}

/// The built-in IPP/1.1 endpoint.
pub struct EmbeddedIpp {
    printer_name: String,
    port: u16,
    next_job_id: i32,
}

impl EmbeddedIpp {
    pub fn new(printer_name: impl Into<String>, port: u16) -> Self {
        Self {
            printer_name: printer_name.into(),
            port,
            next_job_id: 1,
        }
    }

    fn printer_uri(&self) -> String {
        format!("ipp://localhost:{}/ipp/print", self.port)
    }

    fn dispatch(&mut self, request: &IppRequest, engine: &dyn PrintEngine) -> Vec<u8> {
        match request.operation_id {
            OP_PRINT_JOB => self.print_job(request),
            OP_VALIDATE_JOB => {
                debug!("Validate-Job: successful-ok");
                status_response(STATUS_OK, request.request_id, "successful-ok")
            }
            OP_GET_PRINTER_ATTRIBUTES => self.printer_attributes(request, engine),
            other => {
                warn!(operation = %format!("0x{other:04X}"), "unsupported IPP operation");
                status_response(
                    STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED,
                    request.request_id,
                    &format!("Operation 0x{other:04X} is not supported"),
                )
            }
        }
    }

    /// Print-Job (0x0002): acknowledge the document and account for it.
    ///
    /// There is no job queue and the exchange is synchronous, so by the
    /// time the response is written the document has been fully received —
    /// the job is reported as completed rather than pending.
    fn print_job(&mut self, request: &IppRequest) -> Vec<u8> {
        let op_attrs = request.operation_attributes();
        let document_name = op_attrs
            .and_then(|g| g.get_string("job-name"))
            .or_else(|| op_attrs.and_then(|g| g.get_string("document-name")))
            .unwrap_or_else(|| "Untitled Document".into());

        let document_hash = if request.document_data.is_empty() {
            "empty".into()
        } else {
            let mut hasher = Sha256::new();
            hasher.update(&request.document_data);
            hex::encode(hasher.finalize())
        };

        let job_id = self.next_job_id;
        self.next_job_id += 1;

        info!(
            job_id,
            doc_name = %document_name,
            doc_bytes = request.document_data.len(),
            doc_hash = %document_hash,
            "Print-Job accepted"
        );

        let printer_uri = self.printer_uri();
        let mut resp = IppResponseBuilder::new(STATUS_OK, request.request_id);
        resp.begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en")
            .text("status-message", "successful-ok");
        resp.begin_group(TAG_JOB_ATTRIBUTES)
            .integer("job-id", job_id)
            .uri("job-uri", &format!("{printer_uri}/jobs/{job_id}"))
            .enum_attr("job-state", JOB_STATE_COMPLETED)
            .keyword("job-state-reasons", "job-completed-successfully");
        resp.build()
    }

    /// Get-Printer-Attributes (0x000B): identity, state, and capabilities.
    fn printer_attributes(&self, request: &IppRequest, engine: &dyn PrintEngine) -> Vec<u8> {
        let printer_uri = self.printer_uri();

        let mut resp = IppResponseBuilder::new(STATUS_OK, request.request_id);
        resp.begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en")
            .text("status-message", "successful-ok");
        resp.begin_group(TAG_PRINTER_ATTRIBUTES)
            .uri("printer-uri-supported", &printer_uri)
            .name_attr("printer-name", &self.printer_name)
            .text("printer-info", &engine.info())
            .enum_attr("printer-state", PRINTER_STATE_IDLE)
            .keyword("printer-state-reasons", "none")
            .boolean("printer-is-accepting-jobs", true)
            .keyword("ipp-versions-supported", "1.1")
            .keyword("operations-supported", "Print-Job")
            .keyword_additional("Validate-Job")
            .keyword_additional("Get-Printer-Attributes")
            .keyword("document-format-supported", "application/octet-stream")
            .keyword_additional("text/plain")
            .keyword("document-format-default", "application/octet-stream")
            .charset("charset-configured", "utf-8")
            .charset("charset-supported", "utf-8")
            .natural_language("natural-language-configured", "en")
            .natural_language("generated-natural-language-supported", "en")
            .keyword("uri-security-supported", "none")
            .keyword("uri-authentication-supported", "none")
            .keyword("compression-supported", "none");

        debug!("Get-Printer-Attributes: returning capabilities");
        resp.build()
    }
}

impl IppService for EmbeddedIpp {
    fn handle(&mut self, conn: &mut dyn Connection, engine: &dyn PrintEngine) -> Result<()> {
        let raw = conn.read_request(MAX_REQUEST_BYTES)?;
        if raw.is_empty() {
            debug!(peer = %conn.peer(), "empty IPP request — closing");
            return Ok(());
        }

        // Some clients wrap IPP in an HTTP POST, others send raw IPP.
        let body = match http::header_end(&raw) {
            Some(offset) => &raw[offset..],
            None => &raw[..],
        };

        let response = match parse_ipp_request(body) {
            Ok(request) => {
                debug!(
                    peer = %conn.peer(),
                    version = %format!("{}.{}", request.version_major, request.version_minor),
                    operation = %format!("0x{:04X}", request.operation_id),
                    request_id = request.request_id,
                    "parsed IPP request"
                );
                self.dispatch(&request, engine)
            }
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "malformed IPP request");
                // No trustworthy request-id to echo.
                status_response(
                    STATUS_CLIENT_ERROR_BAD_REQUEST,
                    0,
                    &format!("Malformed IPP request: {e}"),
                )
            }
        };

        let envelope = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/ipp\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            response.len()
        );
        conn.write_all(envelope.as_bytes())?;
        conn.write_all(&response)?;

        info!(
            peer = %conn.peer(),
            response_bytes = response.len(),
            "IPP response sent"
        );
        Ok(())
    }
}
