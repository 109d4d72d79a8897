//! Event dispatch capability shared by the player, sequencer and router.

use crate::error::Result;
use crate::event::MidiEvent;
use std::sync::Arc;
use tracing::debug;

/// Receives MIDI events. Implementations must be callable from the audio
/// or timer thread.
pub trait MidiEventHandler: Send + Sync {
    fn handle_midi_event(&self, event: &MidiEvent) -> Result<()>;
}

impl<F> MidiEventHandler for F
where
    F: Fn(&MidiEvent) -> Result<()> + Send + Sync,
{
    fn handle_midi_event(&self, event: &MidiEvent) -> Result<()> {
        self(event)
    }
}

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn MidiEventHandler>;

/// Wrap a closure as a [`SharedHandler`].
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: Fn(&MidiEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Logs every event at debug level, then forwards it to the inner handler
/// (if any).
pub struct TracingHandler {
    label: &'static str,
    inner: Option<SharedHandler>,
}

impl TracingHandler {
    pub fn new(label: &'static str, inner: SharedHandler) -> Self {
        Self {
            label,
            inner: Some(inner),
        }
    }

    /// A terminal handler that only logs.
    pub fn sink(label: &'static str) -> Self {
        Self { label, inner: None }
    }
}

impl MidiEventHandler for TracingHandler {
    fn handle_midi_event(&self, event: &MidiEvent) -> Result<()> {
        debug!(
            target: "timbrel::midi",
            "{}: {:?} ch={} p1={} p2={}",
            self.label,
            event.kind,
            event.channel,
            event.param1,
            event.param2
        );
        match &self.inner {
            Some(inner) => inner.handle_midi_event(event),
            None => Ok(()),
        }
    }
}
