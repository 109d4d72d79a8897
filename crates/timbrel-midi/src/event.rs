//! MIDI event data model shared by the player, sequencer and router.

use serde::{Deserialize, Serialize};

/// Number of MIDI channels tracked per player.
pub const MAX_NUMBER_OF_CHANNELS: usize = 16;

/// Maximum number of tracks a single song may carry.
pub const MAX_NUMBER_OF_TRACKS: usize = 128;

/// Highest 14-bit pitch bend value.
pub const PITCH_BEND_MAX: u32 = 16383;

/// Pitch bend value for "wheel centered".
pub const PITCH_BEND_CENTER: u32 = 8192;

/// Default MIDI tempo (µs per quarter note), 120 BPM.
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Controller numbers the core cares about.
pub mod cc {
    pub const BANK_SELECT_MSB: u32 = 0;
    pub const DATA_ENTRY_MSB: u32 = 6;
    pub const BANK_SELECT_LSB: u32 = 32;
    pub const DATA_ENTRY_LSB: u32 = 38;
    pub const SUSTAIN_SWITCH: u32 = 64;
    pub const RPN_LSB: u32 = 100;
    pub const RPN_MSB: u32 = 101;
    pub const ALL_SOUND_OFF: u32 = 120;
    pub const ALL_NOTES_OFF: u32 = 123;
}

/// Kind of a [`MidiEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    NoteOff,
    NoteOn,
    KeyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    Sysex,
    SystemReset,
    SetTempo,
    EndOfTrack,
    Text,
    Lyric,
    Marker,
    TimeSignature,
    KeySignature,
    OtherMeta,
}

impl EventType {
    /// Channel voice messages (the ones a channel number applies to).
    #[inline]
    pub fn is_channel_message(self) -> bool {
        matches!(
            self,
            EventType::NoteOff
                | EventType::NoteOn
                | EventType::KeyPressure
                | EventType::ControlChange
                | EventType::ProgramChange
                | EventType::ChannelPressure
                | EventType::PitchBend
        )
    }

    /// Meta events only exist inside MIDI files and never reach a synth.
    #[inline]
    pub fn is_meta(self) -> bool {
        matches!(
            self,
            EventType::SetTempo
                | EventType::EndOfTrack
                | EventType::Text
                | EventType::Lyric
                | EventType::Marker
                | EventType::TimeSignature
                | EventType::KeySignature
                | EventType::OtherMeta
        )
    }

    /// Whether `param2` carries data for this kind.
    #[inline]
    pub fn has_param2(self) -> bool {
        matches!(
            self,
            EventType::NoteOff
                | EventType::NoteOn
                | EventType::KeyPressure
                | EventType::ControlChange
        )
    }

    /// Upper nibble of the MIDI status byte for channel messages.
    #[inline]
    pub fn status_nibble(self) -> Option<u8> {
        match self {
            EventType::NoteOff => Some(0x80),
            EventType::NoteOn => Some(0x90),
            EventType::KeyPressure => Some(0xA0),
            EventType::ControlChange => Some(0xB0),
            EventType::ProgramChange => Some(0xC0),
            EventType::ChannelPressure => Some(0xD0),
            EventType::PitchBend => Some(0xE0),
            _ => None,
        }
    }
}

/// A single MIDI event.
///
/// `dtime` is the delta in ticks from the previous event of the same track;
/// it is zero for live and sequenced events. `data` holds the sysex payload
/// (without the framing `F0`/`F7` bytes) or the bytes of a text meta event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub kind: EventType,
    pub channel: u32,
    pub param1: u32,
    pub param2: u32,
    pub dtime: u32,
    pub data: Option<Box<[u8]>>,
}

impl MidiEvent {
    #[inline]
    pub fn new(kind: EventType, channel: u32, param1: u32, param2: u32) -> Self {
        Self {
            kind,
            channel,
            param1,
            param2,
            dtime: 0,
            data: None,
        }
    }

    #[inline]
    pub fn note_on(channel: u32, key: u32, velocity: u32) -> Self {
        Self::new(EventType::NoteOn, channel, key, velocity)
    }

    #[inline]
    pub fn note_off(channel: u32, key: u32, velocity: u32) -> Self {
        Self::new(EventType::NoteOff, channel, key, velocity)
    }

    #[inline]
    pub fn control_change(channel: u32, control: u32, value: u32) -> Self {
        Self::new(EventType::ControlChange, channel, control, value)
    }

    #[inline]
    pub fn program_change(channel: u32, program: u32) -> Self {
        Self::new(EventType::ProgramChange, channel, program, 0)
    }

    /// `value` is the 14-bit wheel position, [`PITCH_BEND_CENTER`] = no bend.
    #[inline]
    pub fn pitch_bend(channel: u32, value: u32) -> Self {
        Self::new(EventType::PitchBend, channel, value, 0)
    }

    #[inline]
    pub fn channel_pressure(channel: u32, pressure: u32) -> Self {
        Self::new(EventType::ChannelPressure, channel, pressure, 0)
    }

    #[inline]
    pub fn key_pressure(channel: u32, key: u32, pressure: u32) -> Self {
        Self::new(EventType::KeyPressure, channel, key, pressure)
    }

    pub fn sysex(payload: &[u8]) -> Self {
        Self {
            data: Some(payload.into()),
            ..Self::new(EventType::Sysex, 0, 0, 0)
        }
    }

    #[inline]
    pub fn system_reset() -> Self {
        Self::new(EventType::SystemReset, 0, 0, 0)
    }

    /// Tempo meta event, `tempo` in µs per quarter note.
    #[inline]
    pub fn set_tempo(tempo: u32) -> Self {
        Self::new(EventType::SetTempo, 0, tempo, 0)
    }

    #[inline]
    pub fn end_of_track() -> Self {
        Self::new(EventType::EndOfTrack, 0, 0, 0)
    }

    /// Text-carrying meta event (`Text`, `Lyric` or `Marker`).
    pub fn meta_text(kind: EventType, text: &[u8]) -> Self {
        Self {
            data: Some(text.into()),
            ..Self::new(kind, 0, 0, 0)
        }
    }

    #[inline]
    pub fn with_dtime(mut self, dtime: u32) -> Self {
        self.dtime = dtime;
        self
    }

    #[inline]
    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.kind == EventType::NoteOn && self.param2 > 0
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.kind == EventType::NoteOff || (self.kind == EventType::NoteOn && self.param2 == 0)
    }

    #[inline]
    pub fn is_meta(&self) -> bool {
        self.kind.is_meta()
    }

    #[inline]
    pub fn key(&self) -> Option<u32> {
        match self.kind {
            EventType::NoteOn | EventType::NoteOff | EventType::KeyPressure => Some(self.param1),
            _ => None,
        }
    }

    #[inline]
    pub fn velocity(&self) -> Option<u32> {
        match self.kind {
            EventType::NoteOn | EventType::NoteOff => Some(self.param2),
            _ => None,
        }
    }

    /// µs per quarter note for `SetTempo` events.
    #[inline]
    pub fn tempo(&self) -> Option<u32> {
        (self.kind == EventType::SetTempo).then_some(self.param1)
    }

    #[inline]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Raw wire bytes for channel messages and system reset.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if self.kind == EventType::SystemReset {
            return Some(vec![0xFF]);
        }
        let status = self.kind.status_nibble()? | (self.channel & 0x0F) as u8;
        let bytes = match self.kind {
            EventType::ProgramChange | EventType::ChannelPressure => {
                vec![status, (self.param1 & 0x7F) as u8]
            }
            EventType::PitchBend => vec![
                status,
                (self.param1 & 0x7F) as u8,
                ((self.param1 >> 7) & 0x7F) as u8,
            ],
            _ => vec![status, (self.param1 & 0x7F) as u8, (self.param2 & 0x7F) as u8],
        };
        Some(bytes)
    }
}

/// Builder for channel events when a chained style reads better.
#[derive(Clone, Copy, Debug)]
pub struct MidiEventBuilder {
    kind: EventType,
    channel: u32,
    param1: u32,
    param2: u32,
    dtime: u32,
}

impl MidiEventBuilder {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            channel: 0,
            param1: 0,
            param2: 0,
            dtime: 0,
        }
    }

    #[inline]
    pub fn channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    #[inline]
    pub fn params(mut self, param1: u32, param2: u32) -> Self {
        self.param1 = param1;
        self.param2 = param2;
        self
    }

    #[inline]
    pub fn dtime(mut self, dtime: u32) -> Self {
        self.dtime = dtime;
        self
    }

    #[inline]
    pub fn build(self) -> MidiEvent {
        MidiEvent::new(self.kind, self.channel, self.param1, self.param2).with_dtime(self.dtime)
    }
}
