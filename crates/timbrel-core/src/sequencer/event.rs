//! Sequencer events.

use serde::{Deserialize, Serialize};

/// Identifies a registered sequencer client. IDs start at 1 and are never
/// reused.
pub type ClientId = u32;

/// Event payloads understood by the sequencer and its synth binding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SeqEventKind {
    NoteOn {
        channel: u32,
        key: u32,
        velocity: u32,
    },
    NoteOff {
        channel: u32,
        key: u32,
    },
    /// Note-on followed by a note-off `duration` ticks later.
    Note {
        channel: u32,
        key: u32,
        velocity: u32,
        duration: u32,
    },
    ControlChange {
        channel: u32,
        control: u32,
        value: u32,
    },
    ProgramChange {
        channel: u32,
        program: u32,
    },
    ProgramSelect {
        channel: u32,
        sfont_id: u32,
        bank: u32,
        program: u32,
    },
    PitchBend {
        channel: u32,
        value: u32,
    },
    PitchWheelSens {
        channel: u32,
        value: u32,
    },
    BankSelect {
        channel: u32,
        bank: u32,
    },
    AllSoundsOff {
        channel: u32,
    },
    AllNotesOff {
        channel: u32,
    },
    ChannelPressure {
        channel: u32,
        value: u32,
    },
    KeyPressure {
        channel: u32,
        key: u32,
        value: u32,
    },
    SystemReset,
    /// Change the sequencer time scale (ticks per second) when dispatched.
    Scale {
        scale: f64,
    },
    /// Opaque wake-up delivered to the destination unchanged.
    Timer {
        data: u64,
    },
    Unregistering,
}

/// Payload discriminant, used to filter queued events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeqEventType {
    NoteOn,
    NoteOff,
    Note,
    ControlChange,
    ProgramChange,
    ProgramSelect,
    PitchBend,
    PitchWheelSens,
    BankSelect,
    AllSoundsOff,
    AllNotesOff,
    ChannelPressure,
    KeyPressure,
    SystemReset,
    Scale,
    Timer,
    Unregistering,
}

impl SeqEventKind {
    pub fn event_type(&self) -> SeqEventType {
        match self {
            SeqEventKind::NoteOn { .. } => SeqEventType::NoteOn,
            SeqEventKind::NoteOff { .. } => SeqEventType::NoteOff,
            SeqEventKind::Note { .. } => SeqEventType::Note,
            SeqEventKind::ControlChange { .. } => SeqEventType::ControlChange,
            SeqEventKind::ProgramChange { .. } => SeqEventType::ProgramChange,
            SeqEventKind::ProgramSelect { .. } => SeqEventType::ProgramSelect,
            SeqEventKind::PitchBend { .. } => SeqEventType::PitchBend,
            SeqEventKind::PitchWheelSens { .. } => SeqEventType::PitchWheelSens,
            SeqEventKind::BankSelect { .. } => SeqEventType::BankSelect,
            SeqEventKind::AllSoundsOff { .. } => SeqEventType::AllSoundsOff,
            SeqEventKind::AllNotesOff { .. } => SeqEventType::AllNotesOff,
            SeqEventKind::ChannelPressure { .. } => SeqEventType::ChannelPressure,
            SeqEventKind::KeyPressure { .. } => SeqEventType::KeyPressure,
            SeqEventKind::SystemReset => SeqEventType::SystemReset,
            SeqEventKind::Scale { .. } => SeqEventType::Scale,
            SeqEventKind::Timer { .. } => SeqEventType::Timer,
            SeqEventKind::Unregistering => SeqEventType::Unregistering,
        }
    }

    /// Tie-break rank for events due on the same tick (lower runs first).
    ///
    /// Resets and client removal come before ordinary events, and note-ons
    /// come last so that controller changes on the same tick affect them.
    #[inline]
    pub fn priority(&self) -> u8 {
        match self {
            SeqEventKind::SystemReset => 0,
            SeqEventKind::Unregistering => 1,
            SeqEventKind::NoteOn { .. } | SeqEventKind::Note { .. } => 3,
            _ => 2,
        }
    }
}

/// A time-stamped event addressed to a client.
///
/// `time` is an absolute tick; it is filled in by
/// [`Sequencer::send_at`](super::Sequencer::send_at).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequencerEvent {
    pub time: u64,
    pub source: Option<ClientId>,
    pub dest: ClientId,
    pub note_id: Option<u64>,
    pub kind: SeqEventKind,
}

impl SequencerEvent {
    pub fn new(kind: SeqEventKind) -> Self {
        Self {
            time: 0,
            source: None,
            dest: 0,
            note_id: None,
            kind,
        }
    }

    pub fn with_source(mut self, source: ClientId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_dest(mut self, dest: ClientId) -> Self {
        self.dest = dest;
        self
    }

    pub fn with_note_id(mut self, note_id: u64) -> Self {
        self.note_id = Some(note_id);
        self
    }

    pub fn note_on(channel: u32, key: u32, velocity: u32) -> Self {
        Self::new(SeqEventKind::NoteOn {
            channel,
            key,
            velocity,
        })
    }

    pub fn note_off(channel: u32, key: u32) -> Self {
        Self::new(SeqEventKind::NoteOff { channel, key })
    }

    pub fn note(channel: u32, key: u32, velocity: u32, duration: u32) -> Self {
        Self::new(SeqEventKind::Note {
            channel,
            key,
            velocity,
            duration,
        })
    }

    pub fn control_change(channel: u32, control: u32, value: u32) -> Self {
        Self::new(SeqEventKind::ControlChange {
            channel,
            control,
            value,
        })
    }

    pub fn system_reset() -> Self {
        Self::new(SeqEventKind::SystemReset)
    }

    pub fn timer(data: u64) -> Self {
        Self::new(SeqEventKind::Timer { data })
    }

    pub fn unregistering() -> Self {
        Self::new(SeqEventKind::Unregistering)
    }

    #[inline]
    pub fn event_type(&self) -> SeqEventType {
        self.kind.event_type()
    }
}
