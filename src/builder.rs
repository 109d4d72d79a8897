//! Builder for configuring and constructing a `TimbrelEngine`.

use crate::engine::Synth;
use crate::{Result, TimbrelEngine};
use std::sync::Arc;
use timbrel_core::{
    keys, MidiRouter, Player, SampleTimer, Sequencer, Settings, SynthBinding,
};
use timbrel_midi::{SharedHandler, TracingHandler};
use tracing::info;

/// Clock sources and queue sizes come from [`Settings`]; pass your own to
/// override the defaults.
///
/// # Example
///
/// ```ignore
/// use timbrel::prelude::*;
///
/// let settings = Settings::new();
/// settings.set_str(keys::PLAYER_TIMING_SOURCE, "system")?;
///
/// let engine = TimbrelEngine::builder(synth)
///     .settings(settings)
///     .midi_dump(true)
///     .build()?;
/// ```
pub struct TimbrelEngineBuilder<S: Synth + 'static> {
    synth: Arc<S>,
    settings: Option<Settings>,
    midi_dump: bool,
}

impl<S: Synth + 'static> TimbrelEngineBuilder<S> {
    pub fn new(synth: Arc<S>) -> Self {
        Self {
            synth,
            settings: None,
            midi_dump: false,
        }
    }

    /// Default: `Settings::new()`
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Log every event entering and leaving the router.
    pub fn midi_dump(mut self, enabled: bool) -> Self {
        self.midi_dump = enabled;
        self
    }

    pub fn build(self) -> Result<TimbrelEngine<S>> {
        let settings = self.settings.unwrap_or_default();
        let synth_handler: SharedHandler = self.synth.clone();

        let channels = settings.get_int(keys::SYNTH_MIDI_CHANNELS)?;
        let channels = u32::try_from(channels).map_err(|_| {
            timbrel_core::Error::InvalidConfig(format!("midi channel count {channels}"))
        })?;

        let router_out: SharedHandler = if self.midi_dump {
            Arc::new(TracingHandler::new("router-out", synth_handler.clone()))
        } else {
            synth_handler.clone()
        };
        let router = Arc::new(MidiRouter::new(channels, router_out));
        let router_in: SharedHandler = if self.midi_dump {
            Arc::new(TracingHandler::new("router-in", router.clone()))
        } else {
            router.clone()
        };

        let player = Player::new(&settings, router_in)?;

        let sequencer = Sequencer::with_settings(&settings)?;
        let binding = SynthBinding::register(&sequencer, "synth", synth_handler);
        let sequencer_clock = if sequencer.uses_system_timer() {
            None
        } else {
            Some(SampleTimer::new(settings.get_num(keys::SYNTH_SAMPLE_RATE)?))
        };

        info!(
            "Timbrel engine ready ({} channels, player on {} clock)",
            channels,
            if player.uses_system_timer() {
                "system"
            } else {
                "sample"
            }
        );

        Ok(TimbrelEngine::from_parts(
            settings,
            self.synth,
            router,
            player,
            sequencer,
            binding,
            sequencer_clock,
        ))
    }
}
