// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolmux.

use thiserror::Error;

/// Top-level error type for all Spoolmux operations.
///
/// Nothing in the server core treats these as fatal: every failure path
/// resolves to a connection or slot being released and the tick loop
/// continuing.
#[derive(Debug, Error)]
pub enum SpoolmuxError {
    // -- Transport errors --
    #[error("listener bind failed: {0}")]
    Bind(String),

    #[error("connection error: {0}")]
    Connection(String),

    // -- Protocol errors --
    #[error("HTTP request parse failed: {0}")]
    HttpParse(String),

    #[error("IPP request failed: {0}")]
    Ipp(String),

    // -- Print engine --
    #[error("print engine error: {0}")]
    Engine(String),

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolmuxError>;
