//! Mixer kernels: N sources into M sinks under a live gain matrix
//!
//! Both kernels run on the real-time thread: no allocation, no locks, no
//! syscalls. Gains are read with one relaxed load per (sink, source) pair
//! per buffer.

use super::gain::GainMatrix;
use super::midi::{scale_velocity, MidiEvent, MidiSink, MidiSource};
use crate::types::{gain_to_linear, GAIN_UNITY};

/// Mix audio buffers
///
/// Every sink is cleared, then each source is added with `gain[sink][source]`
/// (unscaled at unity, skipped when not mixed). All buffers must have the
/// same length.
pub fn mix_audio(gains: &GainMatrix, sources: &[&[f32]], sinks: &mut [&mut [f32]]) {
    for sink in sinks.iter_mut() {
        sink.fill(0.0);
    }

    for (j, sink) in sinks.iter_mut().enumerate() {
        for (i, source) in sources.iter().enumerate() {
            let cell = gains.get(j, i);
            let Some(gain) = gain_to_linear(cell) else {
                continue;
            };

            if cell == GAIN_UNITY {
                for (out, &sample) in sink.iter_mut().zip(source.iter()) {
                    *out += sample;
                }
            } else {
                for (out, &sample) in sink.iter_mut().zip(source.iter()) {
                    *out += gain * sample;
                }
            }
        }
    }
}

/// Merge MIDI sources into sinks
///
/// K-way merge by linear scan: the pending event with the smallest time
/// wins, ties go to the lowest source index, so every sink receives events
/// in non-decreasing time order. Note-on/note-off velocities are scaled by
/// the pair's gain unless it is unity.
pub fn mix_midi<'a, S, K>(gains: &GainMatrix, sources: &mut [S], sinks: &mut [K])
where
    S: MidiSource<'a>,
    K: MidiSink,
{
    let mut scaled = [0u8; 3];

    loop {
        let mut next: Option<(usize, MidiEvent<'a>)> = None;
        for (i, source) in sources.iter_mut().enumerate() {
            if let Some(event) = source.peek() {
                if next.map_or(true, |(_, best)| event.time < best.time) {
                    next = Some((i, event));
                }
            }
        }
        let Some((i, event)) = next else {
            break;
        };

        for (j, sink) in sinks.iter_mut().enumerate() {
            let cell = gains.get(j, i);
            let Some(gain) = gain_to_linear(cell) else {
                continue;
            };

            if cell != GAIN_UNITY && event.is_note() {
                scaled.copy_from_slice(event.bytes);
                scaled[2] = scale_velocity(scaled[2], gain);
                sink.write(MidiEvent::new(event.time, &scaled));
            } else {
                sink.write(event);
            }
        }

        sources[i].advance();
    }
}
