//! Short sound effects for answer feedback.
//!
//! Every tone is an isolated oscillator/gain pair scheduled on a shared
//! output, so overlapping triggers layer instead of cutting each other off.

use std::f64::consts::TAU;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::data::SelectionError;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Gain an exponential ramp decays to; exponential ramps cannot reach zero.
const SILENCE: f64 = 0.001;
const ATTACK: f64 = 0.01;
/// Longest stretch of silence kept between rendered tones.
const MAX_GAP: f64 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SoundTheme {
    Classic,
    Soft,
    Retro,
}

impl SoundTheme {
    /// Parses a selection where `"none"` (or blank) turns sounds off.
    pub fn parse_selection(selection: &str) -> Result<Option<Self>, SelectionError> {
        match selection.trim() {
            "" | "none" | "off" => Ok(None),
            other => other.parse().map(Some),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Soft => "soft",
            Self::Retro => "retro",
        }
    }

    pub fn tones(&self, effect: SoundEffect) -> Vec<Tone> {
        let waveform = match self {
            Self::Classic => Waveform::Sine,
            Self::Soft => Waveform::Triangle,
            Self::Retro => Waveform::Square,
        };
        let gain = match self {
            Self::Soft => 0.12,
            Self::Classic => 0.2,
            Self::Retro => 0.08,
        };

        match effect {
            SoundEffect::Correct => vec![
                Tone::new(0.0, 0.12, 880.0, 880.0, gain, waveform),
                Tone::new(0.1, 0.2, 1318.5, 1318.5, gain, waveform),
            ],
            SoundEffect::Incorrect => vec![
                Tone::new(0.0, 0.3, 220.0, 110.0, gain, waveform),
            ],
            SoundEffect::Complete => [523.25, 659.25, 783.99, 1046.5]
                .iter()
                .enumerate()
                .map(|(i, freq)| Tone::new(i as f64 * 0.12, 0.25, *freq, *freq, gain, waveform))
                .collect(),
        }
    }
}

impl FromStr for SoundTheme {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classic" => Ok(Self::Classic),
            "soft" => Ok(Self::Soft),
            "retro" => Ok(Self::Retro),
            other => Err(SelectionError::Sound(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SoundEffect {
    Correct,
    Incorrect,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
}

impl Waveform {
    fn sample(&self, phase: f64) -> f64 {
        let phase = phase.rem_euclid(1.0);

        match self {
            Self::Sine => (phase * TAU).sin(),
            Self::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

/// A frequency ramp under a short attack and exponential release.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    /// Seconds after the trigger.
    pub offset: f64,
    pub duration: f64,
    pub start_freq: f64,
    pub end_freq: f64,
    pub peak_gain: f64,
    pub waveform: Waveform,
}

impl Tone {
    pub fn new(
        offset: f64,
        duration: f64,
        start_freq: f64,
        end_freq: f64,
        peak_gain: f64,
        waveform: Waveform,
    ) -> Self {
        Self {
            offset,
            duration,
            start_freq,
            end_freq,
            peak_gain,
            waveform,
        }
    }

    pub fn frequency_at(&self, t: f64) -> f64 {
        let progress = (t / self.duration).clamp(0.0, 1.0);
        self.start_freq * (self.end_freq / self.start_freq).powf(progress)
    }

    pub fn gain_at(&self, t: f64) -> f64 {
        if t < 0.0 || t > self.duration {
            return 0.0;
        }

        let attack = ATTACK.min(self.duration);

        if t < attack {
            return self.peak_gain * t / attack;
        }

        let release = self.duration - attack;
        if release <= 0.0 {
            return self.peak_gain;
        }

        let progress = (t - attack) / release;
        self.peak_gain * (SILENCE / self.peak_gain).powf(progress)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledTone {
    /// Absolute output time in seconds.
    pub start: f64,
    pub tone: Tone,
}

impl ScheduledTone {
    pub fn end(&self) -> f64 {
        self.start + self.tone.duration
    }
}

pub trait AudioOutput {
    fn is_closed(&self) -> bool;

    /// Output clock in seconds.
    fn current_time(&self) -> f64;

    fn schedule(&mut self, tone: ScheduledTone);
}

/// An output that renders scheduled tones into mono f32 PCM.
///
/// Idle time is not kept: gaps between tones shrink to at most `MAX_GAP`,
/// and a burst is mixed down and dropped from the schedule once the clock
/// has passed all of it.
#[derive(Clone, Debug)]
pub struct SampleBuffer {
    sample_rate: u32,
    clock: f64,
    scheduled: Vec<ScheduledTone>,
    rendered: Vec<f32>,
    closed: bool,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl SampleBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: 0.0,
            scheduled: Vec::new(),
            rendered: Vec::new(),
            closed: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn scheduled(&self) -> &[ScheduledTone] {
        &self.scheduled
    }

    /// Moves the output clock forward, e.g. by the wall time between triggers.
    pub fn advance(&mut self, seconds: f64) {
        self.clock += seconds.max(0.0);

        let finished = !self.scheduled.is_empty()
            && self.scheduled.iter().all(|tone| tone.end() <= self.clock);

        if finished {
            let burst = std::mem::take(&mut self.scheduled);
            let mut rendered = std::mem::take(&mut self.rendered);

            self.append_burst(&mut rendered, &burst);
            self.rendered = rendered;
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn render(&self) -> Vec<f32> {
        let mut samples = self.rendered.clone();

        if !self.scheduled.is_empty() {
            self.append_burst(&mut samples, &self.scheduled);
        }

        samples
    }

    fn append_burst(&self, samples: &mut Vec<f32>, burst: &[ScheduledTone]) {
        if !samples.is_empty() {
            let gap = (MAX_GAP * f64::from(self.sample_rate)).round() as usize;
            samples.resize(samples.len() + gap, 0.0);
        }

        samples.extend(self.mix(burst));
    }

    fn mix(&self, burst: &[ScheduledTone]) -> Vec<f32> {
        let rate = f64::from(self.sample_rate);
        let tones = compress_gaps(burst);
        let end = tones.iter().map(ScheduledTone::end).fold(0.0, f64::max);
        let mut samples = vec![0.0f64; (end * rate).ceil() as usize];

        for scheduled in &tones {
            let first = (scheduled.start * rate).floor() as usize;
            let last = ((scheduled.end() * rate).ceil() as usize).min(samples.len());
            let mut phase = 0.0;

            for (i, sample) in samples.iter_mut().enumerate().take(last).skip(first) {
                let t = i as f64 / rate - scheduled.start;
                let tone = &scheduled.tone;

                *sample += tone.waveform.sample(phase) * tone.gain_at(t);
                phase += tone.frequency_at(t) / rate;
            }
        }

        samples
            .into_iter()
            .map(|sample| sample.clamp(-1.0, 1.0) as f32)
            .collect()
    }
}

/// Moves tones earlier so the burst starts at zero and no silence between
/// them exceeds `MAX_GAP`. Overlaps are kept as scheduled.
fn compress_gaps(burst: &[ScheduledTone]) -> Vec<ScheduledTone> {
    let mut tones = burst.to_vec();
    tones.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut shift = tones.first().map_or(0.0, |tone| tone.start);
    let mut sounding_until = shift;

    for tone in &mut tones {
        if tone.start > sounding_until + MAX_GAP {
            shift += tone.start - sounding_until - MAX_GAP;
        }
        sounding_until = sounding_until.max(tone.end());
        tone.start -= shift;
    }

    tones
}

impl AudioOutput for SampleBuffer {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn current_time(&self) -> f64 {
        self.clock
    }

    fn schedule(&mut self, tone: ScheduledTone) {
        self.scheduled.push(tone);
    }
}

/// Lazily created output, recreated whenever the engine reports it closed.
pub struct SharedOutput<O> {
    output: Option<O>,
    create: fn() -> O,
}

impl<O: AudioOutput> SharedOutput<O> {
    pub fn new(create: fn() -> O) -> Self {
        Self {
            output: None,
            create,
        }
    }

    pub fn get(&mut self) -> &mut O {
        if self.output.as_ref().map_or(false, AudioOutput::is_closed) {
            tracing::debug!("audio output closed, recreating");
            self.output = None;
        }

        let create = self.create;
        self.output.get_or_insert_with(create)
    }

    pub fn current(&self) -> Option<&O> {
        self.output.as_ref()
    }

    pub fn play(&mut self, theme: SoundTheme, effect: SoundEffect) {
        let output = self.get();
        let now = output.current_time();

        for tone in theme.tones(effect) {
            output.schedule(ScheduledTone {
                start: now + tone.offset,
                tone,
            });
        }

        tracing::trace!(theme = theme.as_str(), ?effect, "scheduled sound effect");
    }
}

static OUTPUT: Lazy<Mutex<SharedOutput<SampleBuffer>>> =
    Lazy::new(|| Mutex::new(SharedOutput::new(SampleBuffer::default)));

pub fn play(theme: SoundTheme, effect: SoundEffect) {
    OUTPUT
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .play(theme, effect);
}

/// Runs `f` against the process-wide output, creating it if needed.
pub fn with_output<T>(f: impl FnOnce(&mut SampleBuffer) -> T) -> T {
    f(OUTPUT.lock().unwrap_or_else(PoisonError::into_inner).get())
}
