//! Real-time kernels for mixer and monitor nodes
//!
//! # Architecture
//!
//! - **Control thread**: writes gains into a shared [`GainMatrix`], reads
//!   [`PublishedLevels`]
//! - **Audio thread**: runs [`mix_audio`] / [`mix_midi`] / [`LevelMeter`]
//!   over the port buffers of one cycle
//! - **Atomics**: the only shared state; relaxed single-word loads and stores
//!
//! Kernels are written against plain slices and the [`MidiSource`] /
//! [`MidiSink`] traits, so they run without an audio server in tests.

mod gain;
mod meter;
mod midi;
mod mixer;

pub use gain::GainMatrix;
pub use meter::{peak_to_db, LevelMeter, MeterScale, PublishedLevels};
pub use midi::{scale_velocity, MidiEvent, MidiSink, MidiSource};
pub use mixer::{mix_audio, mix_midi};
