//! Router rules: windowed affine transforms on channel and parameters.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use timbrel_midi::EventType;

/// Upper bound of the unity window.
pub const WINDOW_MAX: i32 = 999_999;

/// Match window plus transform for one event field.
///
/// With `min <= max` the window matches `[min, max]`. With `min > max` it
/// matches everything except the open interval `(max, min)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub min: i32,
    pub max: i32,
    pub mul: f32,
    pub add: i32,
}

impl Window {
    /// Matches every value and leaves it unchanged.
    pub const fn unity() -> Self {
        Self {
            min: 0,
            max: WINDOW_MAX,
            mul: 1.0,
            add: 0,
        }
    }

    pub const fn new(min: i32, max: i32, mul: f32, add: i32) -> Self {
        Self { min, max, mul, add }
    }

    #[inline]
    pub fn contains(&self, value: i64) -> bool {
        let (min, max) = (i64::from(self.min), i64::from(self.max));
        if min > max {
            !(value > max && value < min)
        } else {
            value >= min && value <= max
        }
    }

    #[inline]
    pub fn apply(&self, value: i64) -> i64 {
        (value as f64 * f64::from(self.mul)).round() as i64 + i64::from(self.add)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if !self.mul.is_finite() {
            return Err(Error::InvalidRule(format!(
                "{field} multiplier {} is not finite",
                self.mul
            )));
        }
        if self.min < 0 || self.max < 0 {
            return Err(Error::InvalidRule(format!(
                "{field} window {}..{} has a negative bound",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::unity()
    }
}

/// Which rule list a rule belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    Note,
    Cc,
    ProgChange,
    PitchBend,
    ChannelPressure,
    KeyPressure,
}

impl RuleType {
    pub const COUNT: usize = 6;

    pub const ALL: [RuleType; Self::COUNT] = [
        RuleType::Note,
        RuleType::Cc,
        RuleType::ProgChange,
        RuleType::PitchBend,
        RuleType::ChannelPressure,
        RuleType::KeyPressure,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Rule list consulted for `kind`, or `None` for unroutable kinds.
    pub fn for_event(kind: EventType) -> Option<RuleType> {
        match kind {
            EventType::NoteOn | EventType::NoteOff => Some(RuleType::Note),
            EventType::ControlChange => Some(RuleType::Cc),
            EventType::ProgramChange => Some(RuleType::ProgChange),
            EventType::PitchBend => Some(RuleType::PitchBend),
            EventType::ChannelPressure => Some(RuleType::ChannelPressure),
            EventType::KeyPressure => Some(RuleType::KeyPressure),
            _ => None,
        }
    }
}

/// A routing rule: channel, param1 and param2 windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterRule {
    pub chan: Window,
    pub param1: Window,
    pub param2: Window,
}

impl RouterRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chan(mut self, min: i32, max: i32, mul: f32, add: i32) -> Self {
        self.chan = Window::new(min, max, mul, add);
        self
    }

    pub fn with_param1(mut self, min: i32, max: i32, mul: f32, add: i32) -> Self {
        self.param1 = Window::new(min, max, mul, add);
        self
    }

    pub fn with_param2(mut self, min: i32, max: i32, mul: f32, add: i32) -> Self {
        self.param2 = Window::new(min, max, mul, add);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.chan.validate("channel")?;
        self.param1.validate("param1")?;
        self.param2.validate("param2")
    }
}

/// Whether a rule is accepting events or only draining open keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active { pending: u32 },
    Retiring { pending: NonZeroU32 },
}

/// What a note/sustain event did to the open-key table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum KeyChange {
    None,
    Opened,
    Closed,
    /// Closed the last key of a retiring rule.
    Drained,
}

/// A rule installed in a router, with its pending-event state.
#[derive(Debug)]
pub(crate) struct InstalledRule {
    pub(crate) rule: RouterRule,
    keys_cc: [bool; 128],
    pub(crate) lifecycle: Lifecycle,
}

impl InstalledRule {
    pub(crate) fn new(rule: RouterRule) -> Self {
        Self {
            rule,
            keys_cc: [false; 128],
            lifecycle: Lifecycle::Active { pending: 0 },
        }
    }

    #[inline]
    pub(crate) fn pending(&self) -> u32 {
        match self.lifecycle {
            Lifecycle::Active { pending } => pending,
            Lifecycle::Retiring { pending } => pending.get(),
        }
    }

    #[inline]
    pub(crate) fn is_retiring(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Retiring { .. })
    }

    /// Ask the rule to retire. Returns `true` if it can be freed right away.
    pub(crate) fn retire(&mut self) -> bool {
        match NonZeroU32::new(self.pending()) {
            Some(pending) => {
                self.lifecycle = Lifecycle::Retiring { pending };
                false
            }
            None => true,
        }
    }

    pub(crate) fn open(&mut self, key: u32) -> KeyChange {
        let Some(slot) = self.keys_cc.get_mut(key as usize) else {
            return KeyChange::None;
        };
        if *slot {
            return KeyChange::None;
        }
        *slot = true;
        self.lifecycle = match self.lifecycle {
            Lifecycle::Active { pending } => Lifecycle::Active {
                pending: pending.saturating_add(1),
            },
            Lifecycle::Retiring { pending } => Lifecycle::Retiring {
                pending: pending.saturating_add(1),
            },
        };
        KeyChange::Opened
    }

    pub(crate) fn close(&mut self, key: u32) -> KeyChange {
        let Some(slot) = self.keys_cc.get_mut(key as usize) else {
            return KeyChange::None;
        };
        if !*slot {
            return KeyChange::None;
        }
        *slot = false;
        match self.lifecycle {
            Lifecycle::Active { pending } => {
                self.lifecycle = Lifecycle::Active {
                    pending: pending.saturating_sub(1),
                };
                KeyChange::Closed
            }
            Lifecycle::Retiring { pending } => match NonZeroU32::new(pending.get() - 1) {
                Some(left) => {
                    self.lifecycle = Lifecycle::Retiring { pending: left };
                    KeyChange::Closed
                }
                None => {
                    self.lifecycle = Lifecycle::Active { pending: 0 };
                    KeyChange::Drained
                }
            },
        }
    }
}
