//! Lock-free primitives shared between control and clock threads.

use arc_swap::ArcSwap;
use atomic_float::AtomicF64;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use timbrel_midi::{MidiEvent, MidiEventHandler, SharedHandler};

/// Cache-line aligned atomic bool.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }
}

impl Clone for AtomicFlag {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Cache-line aligned atomic f64.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicDouble {
    value: AtomicF64,
}

impl AtomicDouble {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: f64) -> f64 {
        self.value.swap(value, Ordering::AcqRel)
    }
}

impl Clone for AtomicDouble {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicDouble {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Single-slot request cell holding a non-negative value, `-1` when empty.
///
/// Only one request can be in flight: [`SlotCell::offer`] succeeds only on
/// an empty slot, and the consumer clears it with [`SlotCell::clear_if`] so
/// a request posted after it was taken is never lost.
#[derive(Debug)]
#[repr(align(64))]
pub struct SlotCell {
    value: AtomicI64,
}

impl SlotCell {
    pub const EMPTY: i64 = -1;

    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(Self::EMPTY),
        }
    }

    /// Post `value` if the slot is empty. Returns false if occupied.
    #[inline]
    pub fn offer(&self, value: i64) -> bool {
        self.value
            .compare_exchange(Self::EMPTY, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Overwrite whatever is pending.
    #[inline]
    pub fn force(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn peek(&self) -> Option<i64> {
        let v = self.value.load(Ordering::Acquire);
        (v >= 0).then_some(v)
    }

    /// Empty the slot if it still holds `value`.
    #[inline]
    pub fn clear_if(&self, value: i64) -> bool {
        self.value
            .compare_exchange(value, Self::EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SlotCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Event handler that can be replaced while the clock thread dispatches
/// through it.
pub struct HandlerCell {
    handler: ArcSwap<SharedHandler>,
}

impl HandlerCell {
    pub fn new(handler: SharedHandler) -> Self {
        Self {
            handler: ArcSwap::from_pointee(handler),
        }
    }

    pub fn set(&self, handler: SharedHandler) {
        self.handler.store(Arc::new(handler));
    }

    #[inline]
    pub fn dispatch(&self, event: &MidiEvent) -> timbrel_midi::Result<()> {
        self.handler.load().handle_midi_event(event)
    }
}
