//! Standard MIDI File loading and writing.
//!
//! Parsing and encoding go through `midly`. Only metrical (ticks per quarter
//! note) timing is supported.

use crate::error::{Error, Result};
use crate::event::{EventType, MidiEvent, MAX_NUMBER_OF_TRACKS};
use crate::track::Track;
use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::Path;
use tracing::debug;

/// A song: division plus one [`Track`] per SMF track.
#[derive(Debug, Clone)]
pub struct MidiFile {
    /// Ticks per quarter note.
    pub division: u16,
    pub tracks: Vec<Track>,
}

impl MidiFile {
    pub fn new(division: u16) -> Result<Self> {
        if division == 0 || division > 0x7FFF {
            return Err(Error::InvalidDivision(division));
        }
        Ok(Self {
            division,
            tracks: Vec::new(),
        })
    }

    pub fn add_track(&mut self, track: Track) -> Result<()> {
        if self.tracks.len() >= MAX_NUMBER_OF_TRACKS {
            return Err(Error::TooManyTracks {
                count: self.tracks.len() + 1,
                max: MAX_NUMBER_OF_TRACKS,
            });
        }
        self.tracks.push(track);
        Ok(())
    }

    /// Load and parse a MIDI file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Parse SMF bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let smf = Smf::parse(data)?;

        let division = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int(),
            Timing::Timecode(_, _) => return Err(Error::MidiUnsupportedTiming),
        };
        if division == 0 {
            return Err(Error::InvalidDivision(division));
        }
        if smf.tracks.len() > MAX_NUMBER_OF_TRACKS {
            return Err(Error::TooManyTracks {
                count: smf.tracks.len(),
                max: MAX_NUMBER_OF_TRACKS,
            });
        }

        debug!(
            "Parsing MIDI file: {} tracks, {} ticks per beat",
            smf.tracks.len(),
            division
        );

        let tracks: Vec<Track> = smf.tracks.iter().map(|t| Self::parse_track(t)).collect();

        debug!(
            "Parsed {} events across {} tracks",
            tracks.iter().map(Track::len).sum::<usize>(),
            tracks.len()
        );

        Ok(Self { division, tracks })
    }

    fn parse_track(events: &[TrackEvent]) -> Track {
        let mut track = Track::new();
        // Deltas of skipped events carry over to the next kept one.
        let mut carry = 0u32;

        for event in events {
            let delta = carry + event.delta.as_int();
            if let TrackEventKind::Meta(MetaMessage::TrackName(name)) = event.kind {
                track.set_name(String::from_utf8_lossy(name));
            }
            match Self::convert_event(&event.kind) {
                Some(converted) => {
                    track.push(converted.with_dtime(delta));
                    carry = 0;
                }
                None => carry = delta,
            }
        }

        track
    }

    fn convert_event(kind: &TrackEventKind) -> Option<MidiEvent> {
        let event = match *kind {
            TrackEventKind::Midi { channel, message } => {
                let ch = u32::from(channel.as_int());
                match message {
                    MidiMessage::NoteOn { key, vel } => {
                        MidiEvent::note_on(ch, key.as_int().into(), vel.as_int().into())
                    }
                    MidiMessage::NoteOff { key, vel } => {
                        MidiEvent::note_off(ch, key.as_int().into(), vel.as_int().into())
                    }
                    MidiMessage::Aftertouch { key, vel } => {
                        MidiEvent::key_pressure(ch, key.as_int().into(), vel.as_int().into())
                    }
                    MidiMessage::Controller { controller, value } => MidiEvent::control_change(
                        ch,
                        controller.as_int().into(),
                        value.as_int().into(),
                    ),
                    MidiMessage::ProgramChange { program } => {
                        MidiEvent::program_change(ch, program.as_int().into())
                    }
                    MidiMessage::ChannelAftertouch { vel } => {
                        MidiEvent::channel_pressure(ch, vel.as_int().into())
                    }
                    MidiMessage::PitchBend { bend } => {
                        MidiEvent::pitch_bend(ch, bend.0.as_int().into())
                    }
                }
            }
            TrackEventKind::SysEx(bytes) => {
                let payload = bytes.strip_suffix(&[0xF7]).unwrap_or(bytes);
                MidiEvent::sysex(payload)
            }
            TrackEventKind::Escape(_) => return None,
            TrackEventKind::Meta(meta) => match meta {
                MetaMessage::Tempo(tempo) => MidiEvent::set_tempo(tempo.as_int()),
                MetaMessage::EndOfTrack => MidiEvent::end_of_track(),
                MetaMessage::Text(text) => MidiEvent::meta_text(EventType::Text, text),
                MetaMessage::Lyric(text) => MidiEvent::meta_text(EventType::Lyric, text),
                MetaMessage::Marker(text) => MidiEvent::meta_text(EventType::Marker, text),
                MetaMessage::TimeSignature(num, den, clocks, notated) => {
                    MidiEvent::meta_text(EventType::TimeSignature, &[num, den, clocks, notated])
                }
                MetaMessage::KeySignature(sharps, minor) => MidiEvent::meta_text(
                    EventType::KeySignature,
                    &[sharps as u8, u8::from(minor)],
                ),
                MetaMessage::TrackName(_) => return None,
                _ => MidiEvent::new(EventType::OtherMeta, 0, 0, 0),
            },
        };
        Some(event)
    }

    /// Encode as an SMF (format 0 for one track, format 1 otherwise).
    ///
    /// `OtherMeta` events are not written; their delta time is folded into
    /// the next event.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let format = if self.tracks.len() == 1 {
            Format::SingleTrack
        } else {
            Format::Parallel
        };
        let mut smf = Smf::new(Header::new(
            format,
            Timing::Metrical(u15::from(self.division)),
        ));

        // midly borrows payloads, so framed sysex buffers must outlive `smf`.
        let framed: Vec<Vec<Vec<u8>>> = self
            .tracks
            .iter()
            .map(|track| {
                track
                    .events()
                    .iter()
                    .filter(|e| e.kind == EventType::Sysex)
                    .map(|e| {
                        let mut bytes = e.data().unwrap_or_default().to_vec();
                        bytes.push(0xF7);
                        bytes
                    })
                    .collect()
            })
            .collect();

        for (track, sysex) in self.tracks.iter().zip(framed.iter()) {
            let mut sysex = sysex.iter();
            let mut out: Vec<TrackEvent> = Vec::with_capacity(track.len() + 1);
            let mut carry = 0u32;
            let mut terminated = false;

            for event in track.events() {
                let delta = carry + event.dtime;
                let kind = match event.kind {
                    EventType::Sysex => match sysex.next() {
                        Some(bytes) => TrackEventKind::SysEx(bytes),
                        None => continue,
                    },
                    _ => match Self::encode_event(event)? {
                        Some(kind) => kind,
                        None => {
                            carry = delta;
                            continue;
                        }
                    },
                };
                carry = 0;
                if event.kind == EventType::EndOfTrack {
                    terminated = true;
                }
                out.push(TrackEvent {
                    delta: u28::from(delta),
                    kind,
                });
                if terminated {
                    break;
                }
            }

            if !terminated {
                out.push(TrackEvent {
                    delta: u28::from(carry),
                    kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
                });
            }
            smf.tracks.push(out);
        }

        let mut buffer = Vec::new();
        smf.write_std(&mut buffer)?;
        Ok(buffer)
    }

    fn encode_event(event: &MidiEvent) -> Result<Option<TrackEventKind<'_>>> {
        if event.kind.is_channel_message() && event.channel > 15 {
            return Err(Error::Unencodable(format!(
                "channel {} out of range",
                event.channel
            )));
        }
        let channel = u4::from(event.channel as u8);
        let p1 = u7::from((event.param1 & 0x7F) as u8);
        let p2 = u7::from((event.param2 & 0x7F) as u8);

        let message = match event.kind {
            EventType::NoteOn => MidiMessage::NoteOn { key: p1, vel: p2 },
            EventType::NoteOff => MidiMessage::NoteOff { key: p1, vel: p2 },
            EventType::KeyPressure => MidiMessage::Aftertouch { key: p1, vel: p2 },
            EventType::ControlChange => MidiMessage::Controller {
                controller: p1,
                value: p2,
            },
            EventType::ProgramChange => MidiMessage::ProgramChange { program: p1 },
            EventType::ChannelPressure => MidiMessage::ChannelAftertouch { vel: p1 },
            EventType::PitchBend => MidiMessage::PitchBend {
                bend: midly::PitchBend(u14::from((event.param1 & 0x3FFF) as u16)),
            },
            EventType::SetTempo => {
                if event.param1 == 0 || event.param1 > 0x00FF_FFFF {
                    return Err(Error::Unencodable(format!("tempo {}", event.param1)));
                }
                return Ok(Some(TrackEventKind::Meta(MetaMessage::Tempo(u24::from(
                    event.param1,
                )))));
            }
            EventType::EndOfTrack => {
                return Ok(Some(TrackEventKind::Meta(MetaMessage::EndOfTrack)));
            }
            EventType::Text => {
                return Ok(Some(TrackEventKind::Meta(MetaMessage::Text(
                    event.data().unwrap_or_default(),
                ))));
            }
            EventType::Lyric => {
                return Ok(Some(TrackEventKind::Meta(MetaMessage::Lyric(
                    event.data().unwrap_or_default(),
                ))));
            }
            EventType::Marker => {
                return Ok(Some(TrackEventKind::Meta(MetaMessage::Marker(
                    event.data().unwrap_or_default(),
                ))));
            }
            EventType::TimeSignature => {
                return match event.data() {
                    Some(&[num, den, clocks, notated]) => Ok(Some(TrackEventKind::Meta(
                        MetaMessage::TimeSignature(num, den, clocks, notated),
                    ))),
                    _ => Err(Error::Unencodable("malformed time signature".into())),
                };
            }
            EventType::KeySignature => {
                return match event.data() {
                    Some(&[sharps, minor]) => Ok(Some(TrackEventKind::Meta(
                        MetaMessage::KeySignature(sharps as i8, minor != 0),
                    ))),
                    _ => Err(Error::Unencodable("malformed key signature".into())),
                };
            }
            EventType::SystemReset => {
                return Err(Error::Unencodable(
                    "system reset has no file representation".into(),
                ));
            }
            EventType::OtherMeta | EventType::Sysex => return Ok(None),
        };

        Ok(Some(TrackEventKind::Midi { channel, message }))
    }

    /// Longest track length in ticks.
    pub fn total_ticks(&self) -> u64 {
        self.tracks.iter().map(Track::total_ticks).max().unwrap_or(0)
    }
}
