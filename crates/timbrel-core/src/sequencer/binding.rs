//! Sequencer client that plays events on a synth.

use super::event::{ClientId, SeqEventKind, SequencerEvent};
use super::Sequencer;
use crate::lockfree::{AtomicFlag, HandlerCell};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use timbrel_midi::{cc, MidiEvent, SharedHandler};
use tracing::{debug, warn};

struct BindingState {
    handler: HandlerCell,
    attached: AtomicFlag,
}

/// Registers a destination client that turns sequencer events into MIDI
/// events for a handler (normally the synth).
///
/// `Note` events are split into a note-on now and a note-off queued
/// `duration` ticks later. The binding detaches itself when its client
/// receives `Unregistering`.
pub struct SynthBinding {
    id: ClientId,
    state: Arc<BindingState>,
}

impl SynthBinding {
    pub fn register(seq: &Sequencer, name: &str, handler: SharedHandler) -> Self {
        let state = Arc::new(BindingState {
            handler: HandlerCell::new(handler),
            attached: AtomicFlag::new(true),
        });
        let callback_state = Arc::clone(&state);
        let id = seq.register_client(name, move |_tick, event, seq| {
            callback_state.deliver(event, seq);
        });
        debug!("Synth bound to sequencer as client {}", id);
        Self { id, state }
    }

    pub fn client_id(&self) -> ClientId {
        self.id
    }

    pub fn is_attached(&self) -> bool {
        self.state.attached.get()
    }

    /// Unregister from `seq`.
    pub fn detach(&self, seq: &Sequencer) -> crate::Result<()> {
        seq.unregister_client(self.id)
    }
}

impl BindingState {
    fn deliver(&self, event: &SequencerEvent, seq: &Sequencer) {
        if let SeqEventKind::Unregistering = event.kind {
            self.attached.set(false);
            debug!("Synth binding {} detached", event.dest);
            return;
        }
        if !self.attached.get() {
            return;
        }

        if let SeqEventKind::Note {
            channel,
            key,
            duration,
            ..
        } = event.kind
        {
            let mut off = SequencerEvent::note_off(channel, key).with_dest(event.dest);
            off.source = event.source;
            off.note_id = event.note_id;
            let at = event.time.saturating_add(u64::from(duration));
            if let Err(e) = seq.send_at(&off, at, true) {
                warn!("Note-off for key {} not scheduled: {}", key, e);
            }
        }

        for midi in Self::to_midi(&event.kind) {
            if let Err(e) = self.handler.dispatch(&midi) {
                warn!("Synth rejected {:?}: {}", midi.kind, e);
            }
        }
    }

    fn to_midi(kind: &SeqEventKind) -> SmallVec<[MidiEvent; 4]> {
        match *kind {
            SeqEventKind::NoteOn {
                channel,
                key,
                velocity,
            }
            | SeqEventKind::Note {
                channel,
                key,
                velocity,
                ..
            } => smallvec![MidiEvent::note_on(channel, key, velocity)],
            SeqEventKind::NoteOff { channel, key } => {
                smallvec![MidiEvent::note_off(channel, key, 0)]
            }
            SeqEventKind::ControlChange {
                channel,
                control,
                value,
            } => smallvec![MidiEvent::control_change(channel, control, value)],
            SeqEventKind::ProgramChange { channel, program } => {
                smallvec![MidiEvent::program_change(channel, program)]
            }
            SeqEventKind::ProgramSelect {
                channel,
                bank,
                program,
                ..
            } => {
                let mut out = Self::bank_select(channel, bank);
                out.push(MidiEvent::program_change(channel, program));
                out
            }
            SeqEventKind::PitchBend { channel, value } => {
                smallvec![MidiEvent::pitch_bend(channel, value)]
            }
            SeqEventKind::PitchWheelSens { channel, value } => smallvec![
                MidiEvent::control_change(channel, cc::RPN_MSB, 0),
                MidiEvent::control_change(channel, cc::RPN_LSB, 0),
                MidiEvent::control_change(channel, cc::DATA_ENTRY_MSB, value),
                MidiEvent::control_change(channel, cc::DATA_ENTRY_LSB, 0),
            ],
            SeqEventKind::BankSelect { channel, bank } => Self::bank_select(channel, bank),
            SeqEventKind::AllSoundsOff { channel } => {
                smallvec![MidiEvent::control_change(channel, cc::ALL_SOUND_OFF, 0)]
            }
            SeqEventKind::AllNotesOff { channel } => {
                smallvec![MidiEvent::control_change(channel, cc::ALL_NOTES_OFF, 0)]
            }
            SeqEventKind::ChannelPressure { channel, value } => {
                smallvec![MidiEvent::channel_pressure(channel, value)]
            }
            SeqEventKind::KeyPressure {
                channel,
                key,
                value,
            } => smallvec![MidiEvent::key_pressure(channel, key, value)],
            SeqEventKind::SystemReset => smallvec![MidiEvent::system_reset()],
            SeqEventKind::Scale { .. }
            | SeqEventKind::Timer { .. }
            | SeqEventKind::Unregistering => SmallVec::new(),
        }
    }

    fn bank_select(channel: u32, bank: u32) -> SmallVec<[MidiEvent; 4]> {
        smallvec![
            MidiEvent::control_change(channel, cc::BANK_SELECT_MSB, (bank >> 7) & 0x7F),
            MidiEvent::control_change(channel, cc::BANK_SELECT_LSB, bank & 0x7F),
        ]
    }
}
