//! Pitch-bend-aware channel assignment.
//!
//! Symi notes each carry their own microtonal bend, and pitch bend is
//! per-channel MIDI state, so two overlapping notes can only share a
//! channel when their bend offsets agree within the configured cents
//! tolerance. Everything else is interval-graph coloring, solved with the
//! standard greedy sweep: process notes by start time, reclaim a channel
//! once its holder has been silent for at least the time tolerance. When
//! one track's 15 usable channels are all simultaneously held at mutually
//! incompatible bends, a new track is opened with its own independent pool
//! rather than failing the export; per-channel state (pitch bend, RPN
//! range) lives per-track, so a fresh track always has room.

use super::MidiExportOptions;
use crate::error::{Result, SymiError};
use crate::resolve::NoteEvent;

/// MIDI channel 9 is conventionally reserved for drums; Symi never targets
/// it.
const DRUM_CHANNEL: u8 = 9;

/// Safety bound on how many note tracks a single export may open. Normal
/// scores, even with many overlapping microtonal voices, settle onto a
/// handful of tracks; this only fires for a pathological input where
/// `ticksPerQuarter` is so low that rounding collapses an unreasonable
/// number of distinct start times onto the same tick, manufacturing
/// unbounded simultaneous contention.
const MAX_TRACKS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelAssignment {
    pub track: usize,
    pub channel: u8,
}

/// What one channel is currently doing: when its last note ends, which
/// bend offset (cents from the nearest key) it is parked at, and whether
/// that bend is mid-ramp from an `@`-chain (a ramping channel can never be
/// shared, its bend is a moving target).
#[derive(Clone, Copy, Debug)]
struct ChannelState {
    channel: u8,
    end: f64,
    bend_cents: f64,
    ramping: bool,
}

fn bend_cents_of(freq: f64) -> f64 {
    let exact_key = 69.0 + 12.0 * (freq / 440.0).log2();
    let key = exact_key.round().clamp(0.0, 127.0);
    (exact_key - key) * 100.0
}

pub fn assign_channels(
    notes: &[&NoteEvent],
    options: &MidiExportOptions,
) -> Result<Vec<ChannelAssignment>> {
    let available: Vec<u8> = (0u8..16).filter(|&c| c != DRUM_CHANNEL).collect();

    let mut order: Vec<usize> = (0..notes.len()).collect();
    order.sort_by(|&a, &b| notes[a].start_sec.partial_cmp(&notes[b].start_sec).unwrap());

    let mut assigned = vec![ChannelAssignment { track: 0, channel: 0 }; notes.len()];
    let mut tracks: Vec<Vec<ChannelState>> = vec![Vec::new()];

    for i in order {
        let start = notes[i].start_sec;
        let end = start + notes[i].duration_sec;
        let bend_cents = bend_cents_of(notes[i].freq);
        let is_ramp = notes[i].chain_to_freq.is_some();

        let mut placed = None;
        'tracks: for (track_idx, states) in tracks.iter_mut().enumerate() {
            // A channel already parked at (or close enough to) this note's
            // bend can carry it alongside whatever else it holds.
            if !is_ramp {
                if let Some(s) = states.iter_mut().find(|s| {
                    !s.ramping && (s.bend_cents - bend_cents).abs() <= options.max_tolerance_cents
                }) {
                    s.end = s.end.max(end);
                    placed = Some(ChannelAssignment { track: track_idx, channel: s.channel });
                    break 'tracks;
                }
            }
            // A channel whose holder has been silent long enough can be
            // re-bent without touching a sounding note.
            if let Some(s) = states
                .iter_mut()
                .find(|s| s.end + options.time_tolerance_sec <= start)
            {
                s.end = end;
                s.bend_cents = bend_cents;
                s.ramping = is_ramp;
                placed = Some(ChannelAssignment { track: track_idx, channel: s.channel });
                break 'tracks;
            }
            // A channel this track has never used yet.
            if let Some(&channel) = available.iter().find(|c| !states.iter().any(|s| s.channel == **c)) {
                states.push(ChannelState {
                    channel,
                    end,
                    bend_cents,
                    ramping: is_ramp,
                });
                placed = Some(ChannelAssignment { track: track_idx, channel });
                break 'tracks;
            }
        }

        let assignment = match placed {
            Some(a) => a,
            None => {
                if tracks.len() >= MAX_TRACKS {
                    return Err(SymiError::NoChannelAvailable {
                        tracks_opened: tracks.len(),
                        available_channels: available.len(),
                    });
                }
                let channel = available[0];
                tracks.push(vec![ChannelState {
                    channel,
                    end,
                    bend_cents,
                    ramping: is_ramp,
                }]);
                ChannelAssignment { track: tracks.len() - 1, channel }
            }
        };
        assigned[i] = assignment;
    }

    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::NoteEvent;

    fn note(freq: f64, start: f64, dur: f64) -> NoteEvent {
        NoteEvent {
            freq,
            start_sec: start,
            duration_sec: dur,
            start_bar: 0,
            start_tick: (0, 1),
            duration_tick: (0, 1),
            span_from: 0,
            span_to: 0,
            span_invoked_from: None,
            span_invoked_to: None,
            pitch_ratio: None,
            chain_to_freq: None,
        }
    }

    /// `offset_cents` above A4, so each distinct offset needs its own bend.
    fn bent(offset_cents: f64, start: f64, dur: f64) -> NoteEvent {
        note(440.0 * 2f64.powf(offset_cents / 1200.0), start, dur)
    }

    #[test]
    fn non_overlapping_notes_share_a_channel() {
        let options = MidiExportOptions::default();
        let notes = vec![bent(10.0, 0.0, 1.0), bent(30.0, 1.0 + options.time_tolerance_sec, 1.0)];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        assert_eq!(channels[0], channels[1]);
    }

    #[test]
    fn overlapping_notes_with_different_bends_get_distinct_channels() {
        let options = MidiExportOptions::default();
        let notes = vec![bent(10.0, 0.0, 2.0), bent(30.0, 0.5, 2.0)];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        assert_ne!(channels[0], channels[1]);
        assert_eq!(channels[0].track, channels[1].track);
    }

    #[test]
    fn overlapping_notes_with_matching_bend_share_a_channel() {
        let options = MidiExportOptions::default();
        // A 12-TET octave: both notes sit exactly on their keys, bend 0.
        let notes = vec![note(220.0, 0.0, 2.0), note(440.0, 0.5, 2.0)];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        assert_eq!(channels[0], channels[1]);
    }

    #[test]
    fn a_ramping_chain_never_shares_its_channel() {
        let options = MidiExportOptions::default();
        let mut glide = note(440.0, 0.0, 2.0);
        glide.chain_to_freq = Some(466.164);
        let plain = note(440.0, 0.5, 1.0);
        let notes = vec![glide, plain];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        assert_ne!(channels[0], channels[1]);
    }

    #[test]
    fn sixteen_incompatible_notes_open_a_second_track_instead_of_failing() {
        let options = MidiExportOptions::default();
        // 16 simultaneous notes, each a further 5 cents sharp: no two are
        // within the 1-cent default tolerance of each other.
        let notes: Vec<NoteEvent> = (0..16).map(|i| bent(5.0 * i as f64, 0.0, 1.0)).collect();
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        assert_eq!(channels.len(), 16);
        let max_track = channels.iter().map(|c| c.track).max().unwrap();
        assert_eq!(max_track, 1, "15 channels per track should force exactly one overflow track for 16 incompatible notes");
        // No two notes sharing a track may share a channel.
        for t in 0..=max_track {
            let on_track: Vec<u8> = channels.iter().filter(|c| c.track == t).map(|c| c.channel).collect();
            let mut sorted = on_track.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), on_track.len());
        }
    }

    #[test]
    fn drum_channel_is_never_assigned() {
        let options = MidiExportOptions::default();
        let notes: Vec<NoteEvent> = (0..15).map(|i| bent(5.0 * i as f64, 0.0, 1.0)).collect();
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        assert!(channels.iter().all(|c| c.channel != 9));
    }
}
