//! Standard MIDI File serialization via `midly`: a conductor track plus
//! note tracks, absolute ticks sorted and rewritten as deltas before
//! handing them to `Smf::write`.
//!
//! Every note carries its own microtonal offset, so each gets an RPN 0,0
//! bend-range declaration and a per-note pitch-bend message on whatever
//! channel [`super::channel::assign_channels`] gave it, scoped to the
//! track that assignment picked. Each note track gets its own RPN dedup
//! set, since channel 3 on track 2 carries independent bend state from
//! channel 3 on track 1. An `@`-chain ramps the bend across the note's
//! duration in fixed steps rather than snapping straight to the target.
//!
//! The emitted file carries a full status byte on every event. `midly`'s
//! writer always applies running-status compression, so the encoded
//! bytes are post-processed by [`expand_running_status`] before they
//! leave this module.

use super::channel::ChannelAssignment;
use super::{check_time_tolerance, resolve_chain_target_bend, resolve_pitch_to_key_and_bend, ticks_per_second, MidiExportOptions};
use crate::error::{Result, SymiError};
use crate::resolve::NoteEvent;
use midly::{Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, Track, TrackEvent, TrackEventKind};
use std::collections::HashSet;

const CHAIN_RAMP_STEPS: u32 = 8;

struct PendingEvent {
    tick: u32,
    channel: u8,
    kind: MidiEventKind,
}

enum MidiEventKind {
    ProgramChange(u8),
    RpnBendRange(u8),
    Bend(f64),
    NoteOn(u8, u8),
    NoteOff(u8),
}

pub(crate) fn build_and_write(notes: &[&NoteEvent], channels: &[ChannelAssignment], options: &MidiExportOptions) -> Result<Vec<u8>> {
    let tps = ticks_per_second(options.tpq);
    let tick_of = |sec: f64| -> u32 { (sec * tps).round().max(0.0) as u32 };

    let track_count = channels.iter().map(|c| c.track).max().map(|m| m + 1).unwrap_or(0).max(1);
    let mut per_track_pending: Vec<Vec<PendingEvent>> = (0..track_count).map(|_| Vec::new()).collect();
    let mut per_track_ranges: Vec<HashSet<u8>> = (0..track_count).map(|_| HashSet::new()).collect();

    for (note, assignment) in notes.iter().zip(channels) {
        check_time_tolerance(note, options)?;

        let channel = assignment.channel;
        let pending = &mut per_track_pending[assignment.track];
        let ranges_declared = &mut per_track_ranges[assignment.track];

        if ranges_declared.insert(channel) {
            pending.push(PendingEvent {
                tick: 0,
                channel,
                kind: MidiEventKind::ProgramChange(options.program),
            });
            pending.push(PendingEvent {
                tick: 0,
                channel,
                kind: MidiEventKind::RpnBendRange(options.bend_range_semitones),
            });
        }

        let span = (note.span_from, note.span_to);
        let resolved = resolve_pitch_to_key_and_bend(note.freq, options, span)?;
        let start_tick = tick_of(note.start_sec);
        let end_tick = tick_of(note.start_sec + note.duration_sec).max(start_tick + 1);

        match note.chain_to_freq {
            None => {
                pending.push(PendingEvent {
                    tick: start_tick,
                    channel,
                    kind: MidiEventKind::Bend(resolved.bend),
                });
            }
            Some(to_freq) => {
                let to_bend = resolve_chain_target_bend(resolved.key, to_freq, options, span)?;
                for step in 0..=CHAIN_RAMP_STEPS {
                    let t = step as f64 / CHAIN_RAMP_STEPS as f64;
                    let bend = resolved.bend + (to_bend - resolved.bend) * t;
                    let tick = start_tick + ((end_tick - start_tick) as f64 * t).round() as u32;
                    pending.push(PendingEvent {
                        tick,
                        channel,
                        kind: MidiEventKind::Bend(bend),
                    });
                }
            }
        }

        pending.push(PendingEvent {
            tick: start_tick,
            channel,
            kind: MidiEventKind::NoteOn(resolved.key, options.velocity),
        });
        pending.push(PendingEvent {
            tick: end_tick,
            channel,
            kind: MidiEventKind::NoteOff(resolved.key),
        });
    }

    for pending in &mut per_track_pending {
        pending.sort_by_key(|e| e.tick);
    }

    let note_tracks: Vec<Track> = per_track_pending.iter().map(|p| build_track(p)).collect();
    let conductor_track = build_conductor_track();

    let header = Header {
        format: Format::Parallel,
        timing: Timing::Metrical(options.tpq.into()),
    };
    let mut tracks = vec![conductor_track];
    tracks.extend(note_tracks);
    let smf = Smf { header, tracks };

    let mut out = Vec::new();
    smf.write(&mut out)
        .map_err(|e| SymiError::Midi(format!("failed to write SMF: {}", e)))?;
    expand_running_status(&out)
}

/// Rewrites an encoded SMF so every event carries a full status byte.
///
/// `midly` omits the status byte of a channel message whose status equals
/// the previous one (running status) and offers no switch to turn that
/// off. This walks each MTrk payload, tracks the running status the same
/// way a reader would, and re-inserts the remembered byte wherever the
/// writer dropped it, then patches the chunk length. Framing, deltas and
/// data bytes pass through untouched, so running the expansion twice is a
/// no-op.
fn expand_running_status(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < 8 || &bytes[0..4] != b"MThd" {
        return Err(SymiError::Midi("malformed SMF header".into()));
    }
    let header_len = 8 + u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if bytes.len() < header_len {
        return Err(SymiError::Midi("truncated SMF header".into()));
    }
    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..header_len]);

    let mut pos = header_len;
    while pos < bytes.len() {
        if bytes.len() < pos + 8 || &bytes[pos..pos + 4] != b"MTrk" {
            return Err(SymiError::Midi("malformed SMF track chunk".into()));
        }
        let len = u32::from_be_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]) as usize;
        if bytes.len() < pos + 8 + len {
            return Err(SymiError::Midi("truncated SMF track chunk".into()));
        }
        let expanded = expand_track_payload(&bytes[pos + 8..pos + 8 + len])?;
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(expanded.len() as u32).to_be_bytes());
        out.extend_from_slice(&expanded);
        pos += 8 + len;
    }
    Ok(out)
}

fn expand_track_payload(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut pos = 0usize;
    let mut status: Option<u8> = None;
    while pos < payload.len() {
        copy_varlen(payload, &mut pos, &mut out)?;
        let first = *payload
            .get(pos)
            .ok_or_else(|| SymiError::Midi("truncated SMF event".into()))?;
        match first {
            0xFF => {
                // Meta: type byte, varlen length, data. Cancels running
                // status, like sysex.
                status = None;
                out.push(first);
                pos += 1;
                let kind = *payload
                    .get(pos)
                    .ok_or_else(|| SymiError::Midi("truncated meta event".into()))?;
                out.push(kind);
                pos += 1;
                let len = copy_varlen(payload, &mut pos, &mut out)?;
                copy_bytes(payload, &mut pos, &mut out, len as usize)?;
            }
            0xF0 | 0xF7 => {
                status = None;
                out.push(first);
                pos += 1;
                let len = copy_varlen(payload, &mut pos, &mut out)?;
                copy_bytes(payload, &mut pos, &mut out, len as usize)?;
            }
            s if s >= 0x80 => {
                status = Some(s);
                out.push(s);
                pos += 1;
                copy_bytes(payload, &mut pos, &mut out, channel_data_len(s))?;
            }
            _ => {
                // Data byte in status position: the writer used running
                // status here. Re-insert the remembered status.
                let s = status.ok_or_else(|| SymiError::Midi("data byte with no running status".into()))?;
                out.push(s);
                copy_bytes(payload, &mut pos, &mut out, channel_data_len(s))?;
            }
        }
    }
    Ok(out)
}

fn channel_data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Copies one variable-length quantity through and returns its value.
fn copy_varlen(payload: &[u8], pos: &mut usize, out: &mut Vec<u8>) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        let b = *payload
            .get(*pos)
            .ok_or_else(|| SymiError::Midi("truncated varlen quantity".into()))?;
        out.push(b);
        *pos += 1;
        value = (value << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(SymiError::Midi("overlong varlen quantity".into()))
}

fn copy_bytes(payload: &[u8], pos: &mut usize, out: &mut Vec<u8>, len: usize) -> Result<()> {
    let end = *pos + len;
    if end > payload.len() {
        return Err(SymiError::Midi("truncated SMF event data".into()));
    }
    out.extend_from_slice(&payload[*pos..end]);
    *pos = end;
    Ok(())
}

fn build_conductor_track<'a>() -> Track<'a> {
    let microseconds_per_quarter = (60_000_000.0 / super::REFERENCE_BPM) as u32;
    vec![
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(microseconds_per_quarter.into())),
        },
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]
}

fn build_track<'a>(pending: &[PendingEvent]) -> Track<'a> {
    let mut events = Vec::with_capacity(pending.len() + 1);
    let mut prev_tick = 0u32;
    for p in pending {
        let delta = p.tick.saturating_sub(prev_tick);
        prev_tick = p.tick;
        let message = match &p.kind {
            MidiEventKind::ProgramChange(program) => MidiMessage::ProgramChange {
                program: (*program).into(),
            },
            MidiEventKind::RpnBendRange(semitones) => {
                // RPN 0,0 selects pitch-bend range; data entry sets it in
                // semitones (MSB) and cents (LSB, always 0 here).
                events.push(TrackEvent {
                    delta: delta.into(),
                    kind: TrackEventKind::Midi {
                        channel: p.channel.into(),
                        message: MidiMessage::Controller { controller: 101.into(), value: 0.into() },
                    },
                });
                events.push(TrackEvent {
                    delta: 0.into(),
                    kind: TrackEventKind::Midi {
                        channel: p.channel.into(),
                        message: MidiMessage::Controller { controller: 100.into(), value: 0.into() },
                    },
                });
                events.push(TrackEvent {
                    delta: 0.into(),
                    kind: TrackEventKind::Midi {
                        channel: p.channel.into(),
                        message: MidiMessage::Controller { controller: 6.into(), value: (*semitones).into() },
                    },
                });
                MidiMessage::Controller { controller: 38.into(), value: 0.into() }
            }
            MidiEventKind::Bend(bend) => {
                // from_int takes the signed bend in [-8192, 8191].
                let raw = (bend.clamp(-1.0, 1.0) * 8191.0).round() as i16;
                MidiMessage::PitchBend {
                    bend: PitchBend::from_int(raw),
                }
            }
            MidiEventKind::NoteOn(key, vel) => MidiMessage::NoteOn {
                key: (*key).into(),
                vel: (*vel).into(),
            },
            MidiEventKind::NoteOff(key) => MidiMessage::NoteOff {
                key: (*key).into(),
                vel: 0.into(),
            },
        };
        events.push(TrackEvent {
            delta: if matches!(p.kind, MidiEventKind::RpnBendRange(_)) { 0.into() } else { delta.into() },
            kind: TrackEventKind::Midi {
                channel: p.channel.into(),
                message,
            },
        });
    }
    events.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::assign_channels;

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

    #[test]
    fn writes_a_valid_smf_header() {
        let options = MidiExportOptions::default();
        let notes = vec![note(261.625565, 0.0, 0.5), note(293.665, 0.5, 0.5)];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        let bytes = build_and_write(&refs, &channels, &options).unwrap();
        assert_eq!(&bytes[0..4], b"MThd");
        assert!(bytes.len() > 14);
    }

    #[test]
    fn chain_note_emits_ramp_of_bend_messages() {
        let options = MidiExportOptions::default();
        let mut n = note(261.625565, 0.0, 1.0);
        n.chain_to_freq = Some(261.625565 * 2f64.powf(100.0 / 1200.0));
        let notes = vec![n];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        let bytes = build_and_write(&refs, &channels, &options).unwrap();

        let smf = midly::Smf::parse(&bytes).unwrap();
        let bends = smf.tracks[1]
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TrackEventKind::Midi {
                        message: MidiMessage::PitchBend { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(bends as u32, CHAIN_RAMP_STEPS + 1);
    }

    #[test]
    fn every_event_carries_a_full_status_byte() {
        let options = MidiExportOptions::default();
        // Two simultaneous zero-bend notes share a channel, so their
        // NoteOns (and NoteOffs) land back to back with identical status,
        // exactly where the encoder would otherwise use running status.
        let notes = vec![note(220.0, 0.0, 1.0), note(440.0, 0.0, 1.0)];
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        let bytes = build_and_write(&refs, &channels, &options).unwrap();

        // Expansion inserts a status byte wherever one is missing, so a
        // fully-expanded file passes through unchanged.
        assert_eq!(expand_running_status(&bytes).unwrap(), bytes);
        // And the result still parses to the same events.
        let smf = midly::Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
    }

    #[test]
    fn sixteen_overlapping_notes_produce_a_second_note_track() {
        let options = MidiExportOptions::default();
        let notes: Vec<NoteEvent> = (0..16).map(|i| note(440.0 + i as f64, 0.0, 1.0)).collect();
        let refs: Vec<&NoteEvent> = notes.iter().collect();
        let channels = assign_channels(&refs, &options).unwrap();
        let bytes = build_and_write(&refs, &channels, &options).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        // One conductor track plus two note tracks (15 channels fit on
        // the first, the 16th overflows to a second).
        assert_eq!(smf.tracks.len(), 3);
    }
}
