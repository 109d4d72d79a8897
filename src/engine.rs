//! TimbrelEngine that wires the player, sequencer and router to a synth.

use crate::Result;
use std::path::Path;
use std::sync::Arc;
use timbrel_core::{
    ClientId, MidiRouter, Player, SampleTimer, Sequencer, Settings, SynthBinding,
};
use timbrel_midi::{MidiEvent, MidiEventHandler, MidiFile};
use tracing::{debug, warn};

/// The synthesizer the engine drives.
///
/// Only two capabilities are needed: rendering audio and accepting MIDI
/// events through [`MidiEventHandler`].
pub trait Synth: MidiEventHandler {
    /// Render `left.len()` frames. Both slices have the same length.
    fn write(&self, left: &mut [f32], right: &mut [f32]);
}

/// Sequencing core bound to one synth.
///
/// Event flow:
///
/// ```text
/// Player ──┐
///          ├─> MidiRouter ──> Synth
/// live ────┘                    ^
/// Sequencer ── SynthBinding ────┘
/// ```
///
/// With sample clocks (the default), [`TimbrelEngine::render`] advances the
/// player and sequencer after each block, so playback is locked to the
/// rendered audio and works offline.
///
/// # Example
///
/// ```ignore
/// use timbrel::prelude::*;
///
/// let engine = TimbrelEngine::builder(Arc::new(MySynth::new())).build()?;
/// engine.player().add("song.mid");
/// engine.player().play()?;
///
/// let (mut left, mut right) = (vec![0.0; 64], vec![0.0; 64]);
/// engine.render(&mut left, &mut right);
/// ```
pub struct TimbrelEngine<S: Synth + 'static> {
    settings: Settings,
    synth: Arc<S>,
    router: Arc<MidiRouter>,
    player: Player,
    sequencer: Sequencer,
    binding: SynthBinding,
    sequencer_clock: Option<SampleTimer>,
}

impl<S: Synth + 'static> TimbrelEngine<S> {
    /// Create a new engine builder
    pub fn builder(synth: Arc<S>) -> crate::TimbrelEngineBuilder<S> {
        crate::TimbrelEngineBuilder::new(synth)
    }

    pub(crate) fn from_parts(
        settings: Settings,
        synth: Arc<S>,
        router: Arc<MidiRouter>,
        player: Player,
        sequencer: Sequencer,
        binding: SynthBinding,
        sequencer_clock: Option<SampleTimer>,
    ) -> Self {
        Self {
            settings,
            synth,
            router,
            player,
            sequencer,
            binding,
            sequencer_clock,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn synth(&self) -> &Arc<S> {
        &self.synth
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn router(&self) -> &MidiRouter {
        &self.router
    }

    /// Sequencer client that plays events on the synth.
    pub fn synth_client(&self) -> ClientId {
        self.binding.client_id()
    }

    /// Render one block, then advance the sample clocks by its length.
    pub fn render(&self, left: &mut [f32], right: &mut [f32]) {
        self.synth.write(left, right);

        let frames = left.len() as u64;
        self.player.advance_samples(frames);
        if let Some(clock) = &self.sequencer_clock {
            let msec = clock.advance(frames);
            self.sequencer.process(msec);
        }
    }

    /// Feed a live event through the router.
    pub fn handle_midi_event(&self, event: &MidiEvent) -> Result<()> {
        self.router.handle_event(event)?;
        Ok(())
    }

    /// Parse a MIDI file now and queue it on the player.
    pub fn queue_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let song = MidiFile::load(path.as_ref())?;
        debug!(
            "Queued {} ({} tracks)",
            path.as_ref().display(),
            song.tracks.len()
        );
        self.player.add_song(song);
        Ok(())
    }

    pub fn sample_rate(&self) -> Result<f64> {
        Ok(self.settings.get_num(timbrel_core::keys::SYNTH_SAMPLE_RATE)?)
    }

    /// Change the sample rate the sample clocks count against.
    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<()> {
        self.settings
            .set_num(timbrel_core::keys::SYNTH_SAMPLE_RATE, sample_rate)?;
        self.player.set_sample_rate(sample_rate);
        if let Some(clock) = &self.sequencer_clock {
            clock.set_sample_rate(sample_rate);
        }
        Ok(())
    }
}

impl<S: Synth + 'static> Drop for TimbrelEngine<S> {
    fn drop(&mut self) {
        if let Err(e) = self.binding.detach(&self.sequencer) {
            warn!("Synth binding not detached: {}", e);
        }
        self.sequencer.shutdown();
    }
}
