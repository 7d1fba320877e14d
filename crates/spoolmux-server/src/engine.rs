// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print engine seam and the host-side spool-file implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use spoolmux_core::error::Result;
use spoolmux_core::types::SlotIndex;

/// The physical printing/spooling engine, keyed by slot index.
///
/// The server core only ever calls through this interface; it never
/// inspects engine internals. Start/end notifications for a given slot
/// strictly alternate and begin with start.
///
/// `end_job(_, failed)` policy: `failed` is `true` only when the job was
/// evicted on timeout. Any peer disconnect — clean end-of-stream or a drop
/// mid-transfer — reports `failed = false`; the engine decides what a
/// truncated job means for its medium.
pub trait PrintEngine {
    /// Whether the engine can accept another byte for this slot's job.
    fn can_print(&self, slot: SlotIndex) -> bool;

    /// Feed one byte of job data.
    fn print_byte(&mut self, slot: SlotIndex, byte: u8);

    /// A slot transitioned empty→occupied.
    fn start_job(&mut self, slot: SlotIndex);

    /// A slot transitioned occupied→empty.
    fn end_job(&mut self, slot: SlotIndex, failed: bool);

    /// Human-readable engine status, served verbatim on `/printerInfo`.
    fn info(&self) -> String;
}

/// A job currently being written to the spool directory.
struct SpoolJob {
    writer: BufWriter<File>,
    path: PathBuf,
    bytes: u64,
}

/// Engine that spools each job to a file (`job-<seq>.prn`).
///
/// One open job per slot, mirroring the one-job-per-slot identity of the
/// dispatcher. If a spool file cannot be created the job simply never
/// reports capacity, so its bytes are never consumed and the dispatcher's
/// timeout path evicts the client.
pub struct SpoolEngine {
    dir: PathBuf,
    jobs: Vec<Option<SpoolJob>>,
    next_seq: u64,
    completed: u64,
    cancelled: u64,
}

impl SpoolEngine {
    /// Create the spool directory if needed and an engine with `capacity`
    /// job positions.
    pub fn new(dir: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut jobs = Vec::with_capacity(capacity);
        jobs.resize_with(capacity, || None);
        Ok(Self {
            dir,
            jobs,
            next_seq: 1,
            completed: 0,
            cancelled: 0,
        })
    }
}

impl PrintEngine for SpoolEngine {
    fn can_print(&self, slot: SlotIndex) -> bool {
        self.jobs.get(slot).is_some_and(Option::is_some)
    }

    fn print_byte(&mut self, slot: SlotIndex, byte: u8) {
        let Some(Some(job)) = self.jobs.get_mut(slot) else {
            debug!(slot, "byte for a slot with no open job — dropped");
            return;
        };
        if let Err(e) = job.writer.write_all(&[byte]) {
            error!(slot, path = %job.path.display(), error = %e, "spool write failed");
        } else {
            job.bytes += 1;
        }
    }

    fn start_job(&mut self, slot: SlotIndex) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let path = self.dir.join(format!("job-{seq}.prn"));
        match File::create(&path) {
            Ok(file) => {
                info!(slot, path = %path.display(), "spool job started");
                if let Some(entry) = self.jobs.get_mut(slot) {
                    *entry = Some(SpoolJob {
                        writer: BufWriter::new(file),
                        path,
                        bytes: 0,
                    });
                }
            }
            Err(e) => {
                // Leaving the job closed makes can_print stay false; the
                // dispatcher's timeout path then evicts the client.
                error!(slot, path = %path.display(), error = %e, "spool file create failed");
            }
        }
    }

    fn end_job(&mut self, slot: SlotIndex, failed: bool) {
        let Some(job) = self.jobs.get_mut(slot).and_then(Option::take) else {
            debug!(slot, "end for a slot with no open job");
            return;
        };
        let mut writer = job.writer;
        if let Err(e) = writer.flush() {
            error!(slot, path = %job.path.display(), error = %e, "spool flush failed");
        }
        if failed {
            self.cancelled += 1;
            info!(slot, path = %job.path.display(), bytes = job.bytes, "spool job cancelled");
        } else {
            self.completed += 1;
            info!(slot, path = %job.path.display(), bytes = job.bytes, "spool job completed");
        }
    }

    fn info(&self) -> String {
        let active = self.jobs.iter().filter(|j| j.is_some()).count();
        format!(
            "Spool engine: {active} active, {} completed, {} cancelled (dir: {})",
            self.completed,
            self.cancelled,
            self.dir.display()
        )
    }
}
