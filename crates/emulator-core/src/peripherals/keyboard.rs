//! Edge-triggered keyboard controller.
//!
//! The host injects key edges between instruction steps. Each edge latches
//! into a single DATA register; an edge arriving while the previous one is
//! still unread replaces it and raises OVERRUN, so a program that is not
//! polling (for example while it waits on a flash write) sees only the last
//! edge of a burst.

use std::collections::VecDeque;

use super::RegisterDevice;
use crate::FaultCode;

/// DATA register: last latched edge.
pub const KEYBOARD_DATA: u32 = 0x400E_1400;
/// STATUS register: bit 0 edge pending, bit 1 overrun.
pub const KEYBOARD_STATUS: u32 = 0x400E_1404;

const STATUS_PENDING: u32 = 0x1;
const STATUS_OVERRUN: u32 = 0x2;
const DATA_RELEASED: u32 = 0x80;

/// One key edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct KeyEvent {
    /// Key code, 7 bits.
    pub code: u8,
    /// `true` for a press, `false` for a release.
    pub pressed: bool,
}

impl KeyEvent {
    /// Key press edge.
    #[must_use]
    pub const fn press(code: u8) -> Self {
        Self {
            code,
            pressed: true,
        }
    }

    /// Key release edge.
    #[must_use]
    pub const fn release(code: u8) -> Self {
        Self {
            code,
            pressed: false,
        }
    }

    /// DATA register encoding.
    #[must_use]
    pub const fn data(self) -> u32 {
        let released = if self.pressed { 0 } else { DATA_RELEASED };
        (self.code as u32 & 0x7F) | released
    }
}

/// Host-side source of key edges, polled when a program waits for a key.
pub trait InputSource {
    /// Returns the next edge, if one is available now.
    fn poll(&mut self) -> Option<KeyEvent>;
}

impl<F> InputSource for F
where
    F: FnMut() -> Option<KeyEvent>,
{
    fn poll(&mut self) -> Option<KeyEvent> {
        self()
    }
}

/// Input source replaying a fixed list of edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedInput {
    events: VecDeque<KeyEvent>,
}

impl ScriptedInput {
    /// Creates a source that yields `events` in order.
    pub fn new(events: impl IntoIterator<Item = KeyEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    /// Number of edges not yet delivered.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> Option<KeyEvent> {
        self.events.pop_front()
    }
}

/// Keyboard controller registers plus the queue of injected edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct KeyboardController {
    data: u32,
    pending: bool,
    overrun: bool,
    queued: VecDeque<KeyEvent>,
}

impl KeyboardController {
    /// Returns `true` when `addr` is a keyboard register.
    #[must_use]
    pub const fn owns_register(addr: u32) -> bool {
        addr == KEYBOARD_DATA || addr == KEYBOARD_STATUS
    }

    /// Queues an injected edge until the next step boundary.
    pub fn queue(&mut self, event: KeyEvent) {
        self.queued.push_back(event);
    }

    /// Latches every queued edge in order; returns how many were latched.
    pub fn latch_queued(&mut self) -> usize {
        let count = self.queued.len();
        while let Some(event) = self.queued.pop_front() {
            self.latch(event);
        }
        count
    }

    /// Latches one edge into DATA.
    pub fn latch(&mut self, event: KeyEvent) {
        if self.pending {
            self.overrun = true;
        }
        self.data = event.data();
        self.pending = true;
    }

    /// Returns `true` while an edge is latched and unread.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns `true` when an unread edge was overwritten.
    #[must_use]
    pub const fn overrun(&self) -> bool {
        self.overrun
    }

    /// Clears registers and drops queued edges.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl RegisterDevice for KeyboardController {
    fn read32(&mut self, addr: u32, _now: u64) -> Result<u32, FaultCode> {
        match addr {
            KEYBOARD_DATA => {
                self.pending = false;
                Ok(self.data)
            }
            KEYBOARD_STATUS => {
                let pending = if self.pending { STATUS_PENDING } else { 0 };
                let overrun = if self.overrun { STATUS_OVERRUN } else { 0 };
                self.overrun = false;
                Ok(pending | overrun)
            }
            _ => Err(FaultCode::BusFault),
        }
    }

    fn write32(&mut self, addr: u32, _value: u32, _now: u64) -> Result<(), FaultCode> {
        if Self::owns_register(addr) {
            Ok(())
        } else {
            Err(FaultCode::BusFault)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        InputSource, KeyEvent, KeyboardController, ScriptedInput, KEYBOARD_DATA, KEYBOARD_STATUS,
    };
    use crate::peripherals::RegisterDevice;

    #[test]
    fn burst_of_edges_keeps_only_the_last() {
        let mut keyboard = KeyboardController::default();
        keyboard.queue(KeyEvent::press(0x10));
        keyboard.queue(KeyEvent::release(0x10));
        keyboard.queue(KeyEvent::press(0x21));
        assert_eq!(keyboard.read32(KEYBOARD_STATUS, 0), Ok(0));
        assert_eq!(keyboard.latch_queued(), 3);
        assert_eq!(keyboard.read32(KEYBOARD_STATUS, 0), Ok(0x3));
        assert_eq!(keyboard.read32(KEYBOARD_DATA, 0), Ok(0x21));
        assert_eq!(keyboard.read32(KEYBOARD_STATUS, 0), Ok(0));
    }

    #[test]
    fn release_sets_bit_seven() {
        assert_eq!(KeyEvent::release(0x05).data(), 0x85);
        assert_eq!(KeyEvent::press(0xFF).data(), 0x7F);
    }

    #[test]
    fn scripted_and_closure_sources_yield_in_order() {
        let mut scripted = ScriptedInput::new([KeyEvent::press(1), KeyEvent::press(2)]);
        assert_eq!(scripted.poll(), Some(KeyEvent::press(1)));
        assert_eq!(scripted.remaining(), 1);

        let mut next = 0_u8;
        let mut counter = move || {
            next += 1;
            Some(KeyEvent::press(next))
        };
        assert_eq!(counter.poll(), Some(KeyEvent::press(1)));
        assert_eq!(counter.poll(), Some(KeyEvent::press(2)));
    }
}
