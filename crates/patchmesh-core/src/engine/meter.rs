//! Level meters: decaying audio peak and MIDI velocity per channel
//!
//! The held level lives in the kernel (plain floats, real-time thread
//! only). After every buffer it is published as hundredths of a unit with a
//! relaxed store, either into [`PublishedLevels`] for in-process readers or
//! into the shared-memory segment for the out-of-process monitor.
//!
//! Ballistics: the held level first decays by a fixed amount per frame
//! (top of the scale to the floor in [`LEVEL_DECAY_SECONDS`]), then takes
//! the max with the buffer's instantaneous value. It rises immediately and
//! never falls faster than the decay rate.

use std::sync::atomic::{AtomicI32, Ordering};

use super::midi::MidiSource;
use crate::types::{
    PortKind, LEVEL_DECAY_SECONDS, LEVEL_FLOOR_DB, LEVEL_HEADROOM_DB, PORT_MAX, SAMPLE_RATE,
    VELOCITY_MAX,
};

/// Unit a meter works in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterScale {
    /// dBFS plus headroom, floor at -64 dB
    Decibels,
    /// MIDI note-on velocity, 0..=127
    Velocity,
}

impl MeterScale {
    pub fn for_kind(kind: PortKind) -> Self {
        match kind {
            PortKind::Midi | PortKind::Osc => MeterScale::Velocity,
            PortKind::Audio | PortKind::Cv => MeterScale::Decibels,
        }
    }

    /// Resting value
    pub fn floor(self) -> f32 {
        match self {
            MeterScale::Decibels => LEVEL_FLOOR_DB,
            MeterScale::Velocity => 0.0,
        }
    }

    /// Distance from the top of the scale to the floor
    pub fn span(self) -> f32 {
        match self {
            MeterScale::Decibels => LEVEL_HEADROOM_DB - LEVEL_FLOOR_DB,
            MeterScale::Velocity => VELOCITY_MAX,
        }
    }

    /// Fixed-point form of a level
    #[inline]
    pub fn publish_value(self, level: f32) -> i32 {
        (level * 100.0).round() as i32
    }
}

/// Instantaneous level of a buffer peak in dB
///
/// `6 + 20·log10(peak / 2)`, so a full-scale peak reads about 0 dB.
#[inline]
pub fn peak_to_db(peak: f32) -> f32 {
    if peak > 0.0 {
        (LEVEL_HEADROOM_DB + 20.0 * (peak * 0.5).log10()).max(LEVEL_FLOOR_DB)
    } else {
        LEVEL_FLOOR_DB
    }
}

/// Published per-channel levels for in-process readers
pub struct PublishedLevels {
    levels: [AtomicI32; PORT_MAX],
}

impl PublishedLevels {
    pub fn new(scale: MeterScale) -> Self {
        let floor = scale.publish_value(scale.floor());
        Self {
            levels: std::array::from_fn(|_| AtomicI32::new(floor)),
        }
    }

    /// Published value of a channel (hundredths); 0 out of range
    #[inline]
    pub fn get(&self, channel: usize) -> i32 {
        self.levels
            .get(channel)
            .map_or(0, |level| level.load(Ordering::Relaxed))
    }

    /// Cells the kernel publishes into
    pub fn cells(&self) -> &[AtomicI32] {
        &self.levels
    }
}

/// Per-channel hold/decay state, owned by the real-time kernel
#[derive(Debug, Clone)]
pub struct LevelMeter {
    scale: MeterScale,
    sample_rate: f32,
    held: [f32; PORT_MAX],
}

impl LevelMeter {
    pub fn new(scale: MeterScale, sample_rate: u32) -> Self {
        let mut meter = Self {
            scale,
            sample_rate: SAMPLE_RATE as f32,
            held: [scale.floor(); PORT_MAX],
        };
        meter.set_sample_rate(sample_rate);
        meter
    }

    pub fn scale(&self) -> MeterScale {
        self.scale
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate > 0 {
            self.sample_rate = sample_rate as f32;
        }
    }

    /// Drop every channel back to the floor
    pub fn reset(&mut self) {
        self.held = [self.scale.floor(); PORT_MAX];
    }

    /// Currently held level of a channel
    pub fn held(&self, channel: usize) -> f32 {
        self.held.get(channel).copied().unwrap_or(self.scale.floor())
    }

    /// Amount the held level falls over `nframes`
    #[inline]
    fn decay(&self, nframes: usize) -> f32 {
        nframes as f32 * self.scale.span() / (LEVEL_DECAY_SECONDS * self.sample_rate)
    }

    #[inline]
    fn update(&mut self, channel: usize, instant: f32, nframes: usize, out: &AtomicI32) {
        let decayed = (self.held[channel] - self.decay(nframes)).max(self.scale.floor());
        let level = decayed.max(instant);
        self.held[channel] = level;
        out.store(self.scale.publish_value(level), Ordering::Relaxed);
    }

    /// Meter one buffer per audio channel
    pub fn process_audio(&mut self, sources: &[&[f32]], published: &[AtomicI32]) {
        for (channel, (buffer, out)) in sources.iter().zip(published).enumerate().take(PORT_MAX) {
            let peak = buffer.iter().fold(0.0f32, |peak, &s| peak.max(s.abs()));
            self.update(channel, peak_to_db(peak), buffer.len(), out);
        }
    }

    /// Meter one buffer per MIDI channel (largest 3-byte note-on velocity)
    pub fn process_midi<'a, S: MidiSource<'a>>(
        &mut self,
        sources: &mut [S],
        nframes: usize,
        published: &[AtomicI32],
    ) {
        for (channel, (source, out)) in sources
            .iter_mut()
            .zip(published)
            .enumerate()
            .take(PORT_MAX)
        {
            let mut velocity = 0u8;
            while let Some(event) = source.peek() {
                if event.is_note_on() {
                    velocity = velocity.max(event.bytes[2]);
                }
                source.advance();
            }
            self.update(channel, velocity as f32, nframes, out);
        }
    }
}
