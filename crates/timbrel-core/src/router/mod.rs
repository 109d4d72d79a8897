//! Rule-based MIDI router.
//!
//! Each routable event type has its own rule list. An incoming event is
//! offered to every rule of its list, newest first; each matching rule
//! emits one transformed copy, so overlapping rules fan out.
//!
//! Rules track which keys (or the sustain pedal) they have opened. Removing
//! a rule that still has open keys only retires it: it keeps passing the
//! note-offs and sustain releases that close those keys, and is freed once
//! the last one has gone through.
//!
//! # Locking
//!
//! One mutex guards every rule list. Output events are collected under the
//! lock and dispatched after it is released, and rules freed during the call
//! are dropped after dispatch.

mod rule;

pub use rule::{RouterRule, RuleType, Window, WINDOW_MAX};

use crate::lockfree::HandlerCell;
use crate::{Error, Result};
use parking_lot::Mutex;
use rule::{InstalledRule, KeyChange};
use smallvec::SmallVec;
use timbrel_midi::{
    cc, EventType, MidiEvent, MidiEventHandler, SharedHandler, PITCH_BEND_MAX,
};
use tracing::{debug, warn};

type RuleLists = [Vec<InstalledRule>; RuleType::COUNT];

/// Output buffer for one routed event.
type Outputs = SmallVec<[MidiEvent; 4]>;

pub struct MidiRouter {
    channel_count: u32,
    rules: Mutex<RuleLists>,
    handler: HandlerCell,
}

impl MidiRouter {
    /// Router with one unity rule per type.
    pub fn new(channel_count: u32, handler: SharedHandler) -> Self {
        let router = Self {
            channel_count,
            rules: Mutex::new(Default::default()),
            handler: HandlerCell::new(handler),
        };
        router.set_default_rules();
        router
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub fn set_handler(&self, handler: SharedHandler) {
        self.handler.set(handler);
    }

    /// Replace all rules with one unity rule per type. Rules with open keys
    /// retire instead of disappearing.
    pub fn set_default_rules(&self) {
        let freed = {
            let mut lists = self.rules.lock();
            let freed = Self::retire_all(&mut lists);
            for list in lists.iter_mut() {
                list.push(InstalledRule::new(RouterRule::new()));
            }
            freed
        };
        debug!("Router reset to default rules ({} freed)", freed.len());
    }

    /// Remove all rules. Rules with open keys retire instead of disappearing.
    pub fn clear_rules(&self) {
        let freed = {
            let mut lists = self.rules.lock();
            Self::retire_all(&mut lists)
        };
        debug!("Router rules cleared ({} freed)", freed.len());
    }

    fn retire_all(lists: &mut RuleLists) -> Vec<InstalledRule> {
        let mut freed = Vec::new();
        for list in lists.iter_mut() {
            let mut kept = Vec::with_capacity(list.len());
            for mut rule in list.drain(..) {
                if rule.retire() {
                    freed.push(rule);
                } else {
                    kept.push(rule);
                }
            }
            *list = kept;
        }
        freed
    }

    /// Install `rule` for `rule_type`. It is evaluated before every rule
    /// already present.
    pub fn add_rule(&self, rule: RouterRule, rule_type: RuleType) -> Result<()> {
        if let Err(e) = rule.validate() {
            warn!("Rejected router rule for {:?}: {}", rule_type, e);
            return Err(e);
        }
        self.rules.lock()[rule_type.index()].push(InstalledRule::new(rule));
        debug!("Added router rule for {:?}: {:?}", rule_type, rule);
        Ok(())
    }

    /// Installed rules of one type, retiring ones included.
    pub fn rule_count(&self, rule_type: RuleType) -> usize {
        self.rules.lock()[rule_type.index()].len()
    }

    pub fn retiring_count(&self, rule_type: RuleType) -> usize {
        self.rules.lock()[rule_type.index()]
            .iter()
            .filter(|r| r.is_retiring())
            .count()
    }

    /// Route one event and dispatch the results.
    ///
    /// Fails with [`Error::RouteFailed`] if any rule discarded its output or
    /// the handler rejected an output event.
    pub fn handle_event(&self, event: &MidiEvent) -> Result<()> {
        let mut incoming = event.clone();
        if incoming.kind == EventType::NoteOn && incoming.param2 == 0 {
            incoming.kind = EventType::NoteOff;
            incoming.param2 = 127;
        }

        let Some(rule_type) = RuleType::for_event(incoming.kind) else {
            // System reset, sysex and anything unroutable bypass the rules.
            return self
                .handler
                .dispatch(&incoming)
                .map_err(|_| Error::RouteFailed { dropped: 1 });
        };

        let mut outputs = Outputs::new();
        let mut dropped = 0usize;
        let mut freed: SmallVec<[InstalledRule; 1]> = SmallVec::new();

        {
            let mut lists = self.rules.lock();
            let list = &mut lists[rule_type.index()];

            let mut index = list.len();
            while index > 0 {
                index -= 1;
                match self.apply_rule(&mut list[index], &incoming) {
                    RuleOutcome::Skip => {}
                    RuleOutcome::Discard => dropped += 1,
                    RuleOutcome::Emit(out, change) => {
                        outputs.push(out);
                        if change == KeyChange::Drained {
                            freed.push(list.remove(index));
                        }
                    }
                }
            }
        }

        for event in &outputs {
            if self.handler.dispatch(event).is_err() {
                dropped += 1;
            }
        }
        if !freed.is_empty() {
            debug!("Freed {} retired {:?} rule(s)", freed.len(), rule_type);
        }
        drop(freed);

        if dropped > 0 {
            return Err(Error::RouteFailed { dropped });
        }
        Ok(())
    }

    fn apply_rule(&self, installed: &mut InstalledRule, event: &MidiEvent) -> RuleOutcome {
        let kind = event.kind;
        let is_sustain = kind == EventType::ControlChange && event.param1 == cc::SUSTAIN_SWITCH;
        let closes = kind == EventType::NoteOff || (is_sustain && event.param2 < 64);
        let opens = kind == EventType::NoteOn || (is_sustain && event.param2 >= 64);

        if installed.is_retiring() && !closes {
            return RuleOutcome::Skip;
        }

        let rule = &installed.rule;
        let (chan, p1, p2) = (
            i64::from(event.channel),
            i64::from(event.param1),
            i64::from(event.param2),
        );
        if !rule.chan.contains(chan) || !rule.param1.contains(p1) {
            return RuleOutcome::Skip;
        }
        let windows_param2 = matches!(
            kind,
            EventType::NoteOn | EventType::ControlChange | EventType::KeyPressure
        );
        if windows_param2 && !rule.param2.contains(p2) {
            return RuleOutcome::Skip;
        }

        let new_chan = rule.chan.apply(chan);
        if new_chan < 0 || new_chan >= i64::from(self.channel_count) {
            return RuleOutcome::Discard;
        }

        let p1_max = match kind {
            EventType::PitchBend => i64::from(PITCH_BEND_MAX),
            _ => 127,
        };
        let mut new_p1 = rule.param1.apply(p1);
        if !(0..=p1_max).contains(&new_p1) {
            match kind {
                EventType::ControlChange | EventType::ProgramChange => {
                    return RuleOutcome::Discard
                }
                _ => new_p1 = new_p1.clamp(0, p1_max),
            }
        }

        let new_p2 = if kind.has_param2() {
            rule.param2.apply(p2).clamp(0, 127)
        } else {
            p2
        };

        let change = if opens {
            installed.open(event.param1)
        } else if closes {
            installed.close(event.param1)
        } else {
            KeyChange::None
        };

        let mut out = MidiEvent::new(kind, new_chan as u32, new_p1 as u32, new_p2 as u32);
        out.data = event.data.clone();
        RuleOutcome::Emit(out, change)
    }
}

impl MidiEventHandler for MidiRouter {
    fn handle_midi_event(&self, event: &MidiEvent) -> timbrel_midi::Result<()> {
        self.handle_event(event)
            .map_err(|e| timbrel_midi::Error::EventRejected(e.to_string()))
    }
}

enum RuleOutcome {
    Skip,
    Discard,
    Emit(MidiEvent, KeyChange),
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;
    use timbrel_midi::handler_fn;

    fn recording_router(channels: u32) -> (MidiRouter, Arc<PlMutex<Vec<MidiEvent>>>) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let sink = log.clone();
        let router = MidiRouter::new(
            channels,
            handler_fn(move |e| {
                sink.lock().push(e.clone());
                Ok(())
            }),
        );
        (router, log)
    }

    #[test]
    fn test_default_rules_pass_through() {
        let (router, log) = recording_router(16);
        router.handle_event(&MidiEvent::note_on(3, 60, 90)).unwrap();
        router.handle_event(&MidiEvent::pitch_bend(3, 9000)).unwrap();
        assert_eq!(
            *log.lock(),
            vec![MidiEvent::note_on(3, 60, 90), MidiEvent::pitch_bend(3, 9000)]
        );
    }

    #[test]
    fn test_note_on_zero_velocity_becomes_note_off() {
        let (router, log) = recording_router(16);
        router.handle_event(&MidiEvent::note_on(0, 60, 0)).unwrap();
        assert_eq!(*log.lock(), vec![MidiEvent::note_off(0, 60, 127)]);
    }

    #[test]
    fn test_system_events_bypass_rules() {
        let (router, log) = recording_router(16);
        router.clear_rules();
        router.handle_event(&MidiEvent::system_reset()).unwrap();
        router.handle_event(&MidiEvent::sysex(&[0x7E, 0x7F])).unwrap();
        router.handle_event(&MidiEvent::note_on(0, 60, 90)).unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_window_inversion() {
        let (router, log) = recording_router(16);
        router.clear_rules();
        router
            .add_rule(RouterRule::new().with_param1(5, 2, 1.0, 0), RuleType::Note)
            .unwrap();

        for key in 0..8 {
            router.handle_event(&MidiEvent::note_on(0, key, 100)).unwrap();
        }
        let keys: Vec<u32> = log.lock().iter().map(|e| e.param1).collect();
        assert_eq!(keys, vec![0, 1, 2, 5, 6, 7]);
    }

    #[test]
    fn test_fan_out_newest_first() {
        let (router, log) = recording_router(16);
        router
            .add_rule(RouterRule::new().with_chan(0, 15, 1.0, 1), RuleType::Note)
            .unwrap();
        router.handle_event(&MidiEvent::note_on(0, 60, 100)).unwrap();
        let channels: Vec<u32> = log.lock().iter().map(|e| e.channel).collect();
        assert_eq!(channels, vec![1, 0]);
    }

    #[test]
    fn test_channel_out_of_range_fails() {
        let (router, log) = recording_router(16);
        router
            .add_rule(RouterRule::new().with_chan(0, 15, 1.0, 8), RuleType::Cc)
            .unwrap();
        let result = router.handle_event(&MidiEvent::control_change(10, 7, 100));
        assert!(matches!(result, Err(Error::RouteFailed { dropped: 1 })));
        // The unity rule still delivered its copy.
        assert_eq!(*log.lock(), vec![MidiEvent::control_change(10, 7, 100)]);
    }

    #[test]
    fn test_param1_policies() {
        let (router, log) = recording_router(16);
        router.clear_rules();
        for rule_type in [RuleType::Note, RuleType::Cc, RuleType::PitchBend] {
            router
                .add_rule(RouterRule::new().with_param1(0, 20_000, 2.0, 0), rule_type)
                .unwrap();
        }

        router.handle_event(&MidiEvent::note_on(0, 100, 80)).unwrap();
        assert!(router
            .handle_event(&MidiEvent::control_change(0, 100, 1))
            .is_err());
        router.handle_event(&MidiEvent::pitch_bend(0, 9000)).unwrap();

        let out = log.lock();
        assert_eq!(out[0], MidiEvent::note_on(0, 127, 80));
        assert_eq!(out[1], MidiEvent::pitch_bend(0, PITCH_BEND_MAX));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_param2_clamped() {
        let (router, log) = recording_router(16);
        router.clear_rules();
        router
            .add_rule(RouterRule::new().with_param2(0, 127, 3.0, 0), RuleType::Note)
            .unwrap();
        router.handle_event(&MidiEvent::note_on(0, 60, 100)).unwrap();
        assert_eq!(log.lock()[0].param2, 127);
    }

    #[test]
    fn test_safe_retirement() {
        let (router, log) = recording_router(16);
        router.handle_event(&MidiEvent::note_on(0, 60, 100)).unwrap();

        router.clear_rules();
        assert_eq!(router.rule_count(RuleType::Note), 1);
        assert_eq!(router.retiring_count(RuleType::Note), 1);
        assert_eq!(router.rule_count(RuleType::Cc), 0);

        // New notes are not passed by a retiring rule.
        router.handle_event(&MidiEvent::note_on(0, 62, 100)).unwrap();
        assert_eq!(log.lock().len(), 1);

        router.handle_event(&MidiEvent::note_off(0, 60, 0)).unwrap();
        assert_eq!(log.lock().last(), Some(&MidiEvent::note_off(0, 60, 0)));
        assert_eq!(router.rule_count(RuleType::Note), 0);
    }

    #[test]
    fn test_sustain_keeps_cc_rule_alive() {
        let (router, log) = recording_router(16);
        router
            .handle_event(&MidiEvent::control_change(0, cc::SUSTAIN_SWITCH, 127))
            .unwrap();
        router.set_default_rules();
        assert_eq!(router.rule_count(RuleType::Cc), 2);

        router
            .handle_event(&MidiEvent::control_change(0, cc::SUSTAIN_SWITCH, 0))
            .unwrap();
        assert_eq!(router.rule_count(RuleType::Cc), 1);
        // Released by the retiring rule and the fresh default rule.
        assert_eq!(log.lock().len(), 3);
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let (router, _) = recording_router(16);
        let result = router.add_rule(
            RouterRule::new().with_param2(0, 127, f32::INFINITY, 0),
            RuleType::Note,
        );
        assert!(matches!(result, Err(Error::InvalidRule(_))));
        assert_eq!(router.rule_count(RuleType::Note), 1);
    }
}
