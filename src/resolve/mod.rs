//! Time resolver: walks the expanded AST and turns it into a flat,
//! time-ordered `Vec<Event>`.
//!
//! Beat positions stay exact `Rational` whole-note counts; only the final
//! beats-to-seconds conversion touches `f64`, and only using whatever
//! BPM/beat-anchor were in effect at the moment a given span of beats was
//! walked. Control nodes only ever appear as direct children of `Root`,
//! so the piecewise-constant BPM schedule reduces to "apply the current
//! rate as you go" with no separate schedule table.

mod pitch;

use crate::ast::{ChainKind, Node, Origin, Pitch};
use crate::diagnostics::Diagnostics;
use crate::rational::{rational, Rational};
use crate::span::Span;
use serde::{Deserialize, Serialize};

pub use pitch::{resolve_pitch_hz, PitchContext};

use pitch::spell_midi_number;

/// A sounding or sustained note. `chain_to_freq`/`chain_to_pitch_ratio` are
/// set only for `@`-chains and carry the target of the pitch-bend ramp the
/// MIDI emitter builds from this event; plain notes leave them `None`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NoteEvent {
    pub freq: f64,
    pub start_sec: f64,
    pub duration_sec: f64,
    pub start_bar: i64,
    pub start_tick: (i64, i64),
    pub duration_tick: (i64, i64),
    pub span_from: usize,
    pub span_to: usize,
    pub span_invoked_from: Option<usize>,
    pub span_invoked_to: Option<usize>,
    pub pitch_ratio: Option<f64>,
    pub chain_to_freq: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewMeasureEvent {
    pub start_bar: i64,
    pub start_sec: f64,
    pub span_from: usize,
    pub span_to: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BaseFrequencyDefEvent {
    pub freq: f64,
    pub start_sec: f64,
    pub span_from: usize,
    pub span_to: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind")]
pub enum Event {
    Note(NoteEvent),
    NewMeasure(NewMeasureEvent),
    BaseFrequencyDef(BaseFrequencyDefEvent),
}

impl Event {
    pub fn start_sec(&self) -> f64 {
        match self {
            Event::Note(e) => e.start_sec,
            Event::NewMeasure(e) => e.start_sec,
            Event::BaseFrequencyDef(e) => e.start_sec,
        }
    }
}

/// Per-voice running position, threaded independently through each
/// concurrent chord voice and through ghost lines.
#[derive(Clone, Debug)]
struct Voice {
    cursor_beats: Rational,
    cursor_sec: f64,
    last_spell_octave: Option<i32>,
    last_note_index: Option<usize>,
}

impl Default for Voice {
    fn default() -> Self {
        Voice {
            cursor_beats: rational(0, 1),
            cursor_sec: 0.0,
            last_spell_octave: None,
            last_note_index: None,
        }
    }
}

impl Voice {
    fn at(cursor_beats: Rational, cursor_sec: f64) -> Self {
        Voice {
            cursor_beats,
            cursor_sec,
            last_spell_octave: None,
            last_note_index: None,
        }
    }
}

struct Resolver {
    beat_unit: Rational,
    time_sig: (i64, i64),
    bpm: f64,
    beat_anchor: Rational,
    pitch_ctx: PitchContext,
    last_bar_emitted: i64,
    events: Vec<Event>,
    diags: Diagnostics,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver {
            beat_unit: rational(1, 4),
            time_sig: (4, 4),
            bpm: 120.0,
            beat_anchor: rational(1, 4),
            pitch_ctx: PitchContext::default(),
            last_bar_emitted: -1,
            events: Vec::new(),
            diags: Diagnostics::new(),
        }
    }
}

pub fn resolve(root: &Node) -> (Vec<Event>, Diagnostics) {
    let mut r = Resolver::default();
    let Node::Root { items, .. } = root else {
        return (r.events, r.diags);
    };
    log::debug!("resolving {} top-level items", items.len());

    let mut voice = Voice::default();
    r.advance_voice(&mut voice, rational(0, 1)); // emits the opening bar marker
    let mut prev_line_start = (voice.cursor_beats, voice.cursor_sec);

    for item in items {
        match item {
            Node::ControlTimeSig { num, den, .. } => {
                r.time_sig = (*num, *den);
            }
            Node::ControlBpm { beat_fraction, bpm, .. } => {
                r.bpm = *bpm;
                r.beat_anchor = beat_fraction.unwrap_or_else(|| rational(1, 4));
            }
            Node::ControlBaseFreq { items: pairs, span } => {
                r.resolve_control_base_freq(pairs, *span, &mut voice);
            }
            Node::GhostLine { body, .. } => {
                let mut ghost = Voice::at(prev_line_start.0, prev_line_start.1);
                r.resolve_line_body(&mut ghost, body);
            }
            other => {
                prev_line_start = (voice.cursor_beats, voice.cursor_sec);
                r.resolve_line_body(&mut voice, other);
            }
        }
    }

    r.events
        .sort_by(|a, b| a.start_sec().partial_cmp(&b.start_sec()).unwrap());
    (r.events, r.diags)
}

impl Resolver {
    /// `<A4=432>` style headers. The target pitch becomes the new base
    /// frequency; if the reference is a spelled pitch, the 12-TET grid is
    /// also re-pinned so that spelling sounds at the target frequency
    /// (spelled pitches otherwise ignore base-frequency changes).
    fn resolve_control_base_freq(&mut self, pairs: &[(Option<Pitch>, Pitch)], span: Span, voice: &mut Voice) {
        for (reference, target) in pairs {
            let freq = resolve_pitch_hz(target, &self.pitch_ctx, &mut voice.last_spell_octave);
            if !(freq > 0.0 && freq.is_finite()) {
                self.diags.error("base frequency must be positive", span);
                continue;
            }
            if let Some(Pitch::Spell {
                letter,
                accidentals,
                octave,
                micro_offset,
            }) = reference
            {
                let midi = spell_midi_number(*letter, *accidentals, octave.unwrap_or(4));
                self.pitch_ctx.anchor_midi = midi;
                // The anchor stores the plain spelling's frequency, so a
                // quarter-tone-shifted reference pins its un-shifted peer.
                self.pitch_ctx.anchor_freq = freq * 2f64.powf(-(*micro_offset as f64) / 24.0);
            }
            self.pitch_ctx.base_freq = freq;
            self.events.push(Event::BaseFrequencyDef(BaseFrequencyDefEvent {
                freq,
                start_sec: voice.cursor_sec,
                span_from: span.from,
                span_to: span.to,
            }));
        }
    }

    fn resolve_line_body(&mut self, voice: &mut Voice, body: &Node) -> Rational {
        match body {
            Node::Sequence { items, .. } => self.resolve_sequence(voice, items),
            Node::Chord { voices, .. } => self.resolve_chord(voice, voices),
            other => self.resolve_atom(voice, other, self.beat_unit),
        }
    }

    /// Walks one comma-separated `Sequence`, returning the total beats
    /// consumed. `Quantize` is special-cased here rather than in
    /// `resolve_atom` because it rescales the sequence's comma unit for
    /// everything after it, so `{4}A,B,C,D,[,,,]` lays all four notes (and
    /// the trailing extension) out in quarter-unit slices.
    fn resolve_sequence(&mut self, voice: &mut Voice, items: &[Node]) -> Rational {
        let mut local_unit = self.beat_unit;
        let mut total = rational(0, 1);
        for item in items {
            match item {
                Node::Quantize { n, m, children, span } => {
                    let slice = self.beat_unit / rational((*m).max(1), 1);
                    local_unit = slice;
                    total = total + self.resolve_quantize_box(voice, *n, *m, children, *span, slice);
                }
                _ => {
                    total = total + self.resolve_atom(voice, item, local_unit);
                }
            }
        }
        total
    }

    /// Resolves each voice of a `Chord` independently from the same
    /// starting cursor; the chord's overall consumed duration is the
    /// longest voice, and the calling voice continues from there.
    fn resolve_chord(&mut self, voice: &mut Voice, voices: &[Node]) -> Rational {
        let start = (voice.cursor_beats, voice.cursor_sec);
        let mut winner: Option<Voice> = None;
        for v in voices {
            let mut sub = Voice::at(start.0, start.1);
            match v {
                Node::Sequence { items, .. } => {
                    self.resolve_sequence(&mut sub, items);
                }
                other => {
                    self.resolve_atom(&mut sub, other, self.beat_unit);
                }
            }
            winner = match winner {
                Some(w) if w.cursor_beats >= sub.cursor_beats => Some(w),
                _ => Some(sub),
            };
        }
        if let Some(w) = winner {
            let consumed = w.cursor_beats - start.0;
            voice.cursor_beats = w.cursor_beats;
            voice.cursor_sec = w.cursor_sec;
            voice.last_spell_octave = w.last_spell_octave;
            voice.last_note_index = w.last_note_index;
            consumed
        } else {
            rational(0, 1)
        }
    }

    /// Resolves one atom-position node, returning the beats it consumed,
    /// and advances `voice`'s cursor by that amount. `unit` is the default
    /// duration assigned to this position absent any `DurationScope`/
    /// `Quantize` override.
    fn resolve_atom(&mut self, voice: &mut Voice, node: &Node, unit: Rational) -> Rational {
        match node {
            Node::Note { pitch, span, origin } => {
                let consumed = unit;
                let freq = resolve_pitch_hz(pitch, &self.pitch_ctx, &mut voice.last_spell_octave);
                if freq > 0.0 && freq.is_finite() {
                    self.push_note(voice, freq, *span, origin, consumed, None);
                } else {
                    self.diags.error("note resolves to a non-positive frequency", *span);
                }
                self.advance_voice(voice, consumed);
                consumed
            }
            Node::Chain { from, to, span, origin, kind: ChainKind::Chain } => {
                let consumed = unit;
                let Node::Note { pitch: from_pitch, .. } = from.as_ref() else {
                    self.diags.error("chain source must be a pitch", *span);
                    self.advance_voice(voice, consumed);
                    return consumed;
                };
                let Some(to_pitch) = chain_target(to) else {
                    self.diags.error("chain target must be a pitch", *span);
                    self.advance_voice(voice, consumed);
                    return consumed;
                };
                // Source resolves first so an octave-less target inherits
                // the source's octave (`C4@G` glides up a fifth).
                let from_freq = resolve_pitch_hz(from_pitch, &self.pitch_ctx, &mut voice.last_spell_octave);
                let to_freq = resolve_pitch_hz(to_pitch, &self.pitch_ctx, &mut voice.last_spell_octave);
                if from_freq > 0.0 && from_freq.is_finite() && to_freq > 0.0 && to_freq.is_finite() {
                    self.push_note(voice, from_freq, *span, origin, consumed, Some(to_freq));
                } else {
                    self.diags.error("chain resolves to a non-positive frequency", *span);
                }
                self.advance_voice(voice, consumed);
                consumed
            }
            Node::Rest { count, .. } => {
                let consumed = unit * rational(*count as i64, 1);
                self.advance_voice(voice, consumed);
                consumed
            }
            Node::Sustain { span, .. } => {
                if let Some(idx) = voice.last_note_index {
                    self.extend_note(idx, unit);
                } else {
                    self.diags.error("sustain has no preceding note on this voice", *span);
                }
                self.advance_voice(voice, unit);
                unit
            }
            Node::CommaDuration { comma_count, span } => {
                let extra = unit * rational(*comma_count as i64, 1);
                if let Some(idx) = voice.last_note_index {
                    self.extend_note(idx, extra);
                } else {
                    self.diags.error("comma-duration extension has no preceding note", *span);
                }
                self.advance_voice(voice, extra);
                extra
            }
            Node::DurationScope { duration, children, .. } => {
                let new_unit = self.beat_unit * *duration;
                match children.first() {
                    Some(child) => self.resolve_atom(voice, child, new_unit),
                    None => {
                        self.advance_voice(voice, new_unit);
                        new_unit
                    }
                }
            }
            Node::Quantize { n, m, children, span } => {
                let slice = unit / rational((*m).max(1), 1);
                self.resolve_quantize_box(voice, *n, *m, children, *span, slice)
            }
            Node::Group { items, .. } => self.resolve_group(voice, items, unit),
            Node::Sequence { items, .. } => self.resolve_sequence(voice, items),
            Node::Chord { voices: chord_voices, .. } => self.resolve_chord(voice, chord_voices),
            Node::MacroCall { name, span } => {
                self.diags.error(format!("unexpanded macro call '{}' reached resolver", name), *span);
                rational(0, 1)
            }
            _ => rational(0, 1),
        }
    }

    fn resolve_group(&mut self, voice: &mut Voice, items: &[Node], unit: Rational) -> Rational {
        if items.is_empty() {
            return rational(0, 1);
        }
        let share = unit / rational(items.len() as i64, 1);
        let mut total = rational(0, 1);
        for item in items {
            total = total + self.resolve_atom(voice, item, share);
        }
        total
    }

    /// Lays out the atoms attached directly to a `{n:m}` box, one slice
    /// (`unit/m`) each. A run that fills all `n` slots closes the box and
    /// the remaining `(m-n)` slices pad silently; a shorter run leaves the
    /// box open for the following comma-separated items, which continue at
    /// the slice unit. Atoms beyond `n` overflow past the box with an error
    /// rather than being dropped.
    fn resolve_quantize_box(
        &mut self,
        voice: &mut Voice,
        n: i64,
        m: i64,
        children: &[Node],
        span: Span,
        slice: Rational,
    ) -> Rational {
        let mut consumed = rational(0, 1);
        for child in children {
            consumed = consumed + self.resolve_atom(voice, child, slice);
        }
        let slots = n.max(0) as usize;
        if children.len() > slots {
            self.diags.error(
                format!(
                    "quantize {{{}:{}}} overflows by {} atom(s)",
                    n,
                    m,
                    children.len() - slots
                ),
                span,
            );
        } else if children.len() == slots && m > n {
            let padding = slice * rational(m - n, 1);
            self.advance_voice(voice, padding);
            consumed = consumed + padding;
        }
        consumed
    }

    fn push_note(
        &mut self,
        voice: &mut Voice,
        freq: f64,
        span: Span,
        origin: &Origin,
        consumed: Rational,
        chain_to_freq: Option<f64>,
    ) {
        let pitch_ratio = Some(freq / self.pitch_ctx.base_freq);
        let duration_sec = self.beats_to_seconds(consumed);
        let bar_duration = self.bar_duration_beats();
        let start_bar = floor_div(voice.cursor_beats, bar_duration);
        let bar_start_beats = bar_duration * rational(start_bar, 1);
        let tick_in_bar = voice.cursor_beats - bar_start_beats;

        let (invoked_from, invoked_to) = match origin {
            Origin::Direct => (None, None),
            Origin::Expanded { call_span } => (Some(call_span.from), Some(call_span.to)),
        };

        let idx = self.events.len();
        self.events.push(Event::Note(NoteEvent {
            freq,
            start_sec: voice.cursor_sec,
            duration_sec,
            start_bar,
            start_tick: as_tick(tick_in_bar),
            duration_tick: as_tick(consumed),
            span_from: span.from,
            span_to: span.to,
            span_invoked_from: invoked_from,
            span_invoked_to: invoked_to,
            pitch_ratio,
            chain_to_freq,
        }));
        voice.last_note_index = Some(idx);
    }

    fn extend_note(&mut self, idx: usize, extra_beats: Rational) {
        let extra_sec = self.beats_to_seconds(extra_beats);
        if let Event::Note(e) = &mut self.events[idx] {
            e.duration_sec += extra_sec;
            let (n, d) = crate::rational::as_pair(rational(e.duration_tick.0, e.duration_tick.1) + extra_beats);
            e.duration_tick = (n, d);
        }
    }

    fn bar_duration_beats(&self) -> Rational {
        rational(self.time_sig.0, self.time_sig.1)
    }

    fn beats_to_seconds(&self, delta: Rational) -> f64 {
        let (n, d) = crate::rational::as_pair(delta);
        let beats_f = n as f64 / d as f64;
        let (an, ad) = crate::rational::as_pair(self.beat_anchor);
        let anchor_f = an as f64 / ad as f64;
        beats_f * 60.0 / (self.bpm * anchor_f)
    }

    fn advance_voice(&mut self, voice: &mut Voice, delta_beats: Rational) {
        let old_beats = voice.cursor_beats;
        let new_beats = old_beats + delta_beats;
        let bar_duration = self.bar_duration_beats();
        let old_bar = floor_div(old_beats, bar_duration);
        let new_bar = floor_div(new_beats, bar_duration);

        let mut bar = old_bar;
        while bar <= new_bar {
            if bar > self.last_bar_emitted {
                let bar_start_beats = bar_duration * rational(bar, 1);
                let offset = if bar_start_beats >= old_beats {
                    bar_start_beats - old_beats
                } else {
                    rational(0, 1)
                };
                let start_sec = voice.cursor_sec + self.beats_to_seconds(offset);
                self.events.push(Event::NewMeasure(NewMeasureEvent {
                    start_bar: bar,
                    start_sec,
                    span_from: 0,
                    span_to: 0,
                }));
                self.last_bar_emitted = bar;
            }
            bar += 1;
        }

        voice.cursor_sec += self.beats_to_seconds(delta_beats);
        voice.cursor_beats = new_beats;
    }
}

/// Rightmost pitch of a (right-associative) chain: `A@B@C` glides from
/// `A`'s frequency toward `C`'s.
fn chain_target(node: &Node) -> Option<&Pitch> {
    match node {
        Node::Note { pitch, .. } => Some(pitch),
        Node::Chain { to, .. } => chain_target(to),
        _ => None,
    }
}

fn floor_div(value: Rational, by: Rational) -> i64 {
    (value / by).floor().to_integer()
}

fn as_tick(r: Rational) -> (i64, i64) {
    crate::rational::as_pair(r)
}
