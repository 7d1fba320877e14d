// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fixed-capacity connection slot table.
//
// A slot is either empty or occupied; an occupied slot exclusively owns its
// connection handle and carries the time of the last byte transfer. The
// slot index is the job identity. Occupy/release transitions are the sole
// authority for print-job start/end boundaries — the dispatcher pairs every
// occupy with a start-of-job notification and every release with exactly
// one end-of-job notification.

use std::time::Instant;

use spoolmux_core::types::{SlotIndex, SlotUsage};

use crate::transport::Connection;

/// One occupied raw-print connection position.
pub struct Slot {
    /// Exclusively owned while the slot is occupied; released (and thereby
    /// closed, via drop) on eviction or disconnect.
    pub conn: Box<dyn Connection>,
    /// Time of the last byte transferred, or of slot creation.
    pub last_interaction: Instant,
}

/// Arena of raw-print slots with capacity fixed at construction.
///
/// No dynamic resizing: capacity exhaustion is observable behaviour
/// (backpressure on the raw listener), not something the table hides.
pub struct SlotTable {
    slots: Vec<Option<Slot>>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest-indexed free slot, or `None` when the table is full.
    pub fn find_free(&self) -> Option<SlotIndex> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn is_occupied(&self, index: SlotIndex) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    /// Place a connection into a free slot.
    ///
    /// The caller must have obtained `index` from `find_free`; occupying an
    /// occupied slot would silently drop a live connection mid-job.
    pub fn occupy(&mut self, index: SlotIndex, conn: Box<dyn Connection>, now: Instant) {
        debug_assert!(self.slots[index].is_none(), "occupying a non-free slot");
        self.slots[index] = Some(Slot {
            conn,
            last_interaction: now,
        });
    }

    /// Empty a slot, returning its contents so the caller can finish
    /// end-of-job bookkeeping before the connection drops.
    pub fn release(&mut self, index: SlotIndex) -> Option<Slot> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut Slot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn usage(&self) -> SlotUsage {
        SlotUsage {
            used: self.slots.iter().filter(|s| s.is_some()).count(),
            capacity: self.slots.len(),
        }
    }
}
