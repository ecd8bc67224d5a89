//! Per-cycle bodies of the node process callbacks
//!
//! The process handlers only collect port buffers; staging them into fixed
//! arrays and handing them to a kernel happens here, over anything that
//! yields slices or [`MidiSource`]/[`MidiSink`] cursors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::{mix_audio, mix_midi, GainMatrix, LevelMeter, MidiSink, MidiSource, PublishedLevels};
use crate::shm::{process_shared_audio, process_shared_midi, SharedSegment};
use crate::types::PORT_MAX;

/// Mix audio port buffers; ports past PORT_MAX are ignored
pub(crate) fn stage_audio<'s, 'k>(
    gains: &GainMatrix,
    sources: impl Iterator<Item = &'s [f32]>,
    sinks: impl Iterator<Item = &'k mut [f32]>,
) {
    let mut staged_sources: [&[f32]; PORT_MAX] = [&[]; PORT_MAX];
    let mut source_count = 0;
    for (slot, source) in staged_sources.iter_mut().zip(sources) {
        *slot = source;
        source_count += 1;
    }
    let mut staged_sinks: [&mut [f32]; PORT_MAX] = Default::default();
    let mut sink_count = 0;
    for (slot, sink) in staged_sinks.iter_mut().zip(sinks) {
        *slot = sink;
        sink_count += 1;
    }
    mix_audio(
        gains,
        &staged_sources[..source_count],
        &mut staged_sinks[..sink_count],
    );
}

/// Merge MIDI port cursors into the output writers
pub(crate) fn stage_midi<'a, S, K>(
    gains: &GainMatrix,
    sources: impl Iterator<Item = S>,
    sinks: impl Iterator<Item = K>,
) where
    S: MidiSource<'a>,
    K: MidiSink,
{
    let mut staged_sources: [Option<S>; PORT_MAX] = Default::default();
    let mut source_count = 0;
    for (slot, source) in staged_sources.iter_mut().zip(sources) {
        *slot = Some(source);
        source_count += 1;
    }
    let mut staged_sinks: [Option<K>; PORT_MAX] = Default::default();
    let mut sink_count = 0;
    for (slot, sink) in staged_sinks.iter_mut().zip(sinks) {
        *slot = Some(sink);
        sink_count += 1;
    }
    mix_midi(
        gains,
        &mut staged_sources[..source_count],
        &mut staged_sinks[..sink_count],
    );
}

/// Where a monitor publishes its levels
#[derive(Clone)]
pub(crate) enum LevelTarget {
    /// Atomics read by the hosting process
    Local(Arc<PublishedLevels>),
    /// Shared segment read by another process
    Shared {
        segment: Arc<SharedSegment>,
        closed: Arc<AtomicBool>,
    },
}

impl LevelTarget {
    pub(crate) fn shared(segment: Arc<SharedSegment>) -> Self {
        LevelTarget::Shared {
            segment,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Meter one cycle of audio; false when nothing was published
    pub(crate) fn meter_audio<'s>(
        &self,
        meter: &mut LevelMeter,
        ports: impl Iterator<Item = &'s [f32]>,
    ) -> bool {
        let mut sources: [&[f32]; PORT_MAX] = [&[]; PORT_MAX];
        let mut count = 0;
        for (slot, port) in sources.iter_mut().zip(ports) {
            *slot = port;
            count += 1;
        }
        let sources = &sources[..count];
        match self {
            LevelTarget::Local(levels) => {
                meter.process_audio(sources, levels.cells());
                true
            }
            LevelTarget::Shared { segment, closed } => match segment.writer() {
                Some(shm) => process_shared_audio(meter, shm, closed, sources),
                None => false,
            },
        }
    }

    /// Meter one cycle of MIDI; false when nothing was published
    pub(crate) fn meter_midi<'a, S: MidiSource<'a>>(
        &self,
        meter: &mut LevelMeter,
        ports: impl Iterator<Item = S>,
        nframes: usize,
    ) -> bool {
        let mut sources: [Option<S>; PORT_MAX] = Default::default();
        let mut count = 0;
        for (slot, port) in sources.iter_mut().zip(ports) {
            *slot = Some(port);
            count += 1;
        }
        let sources = &mut sources[..count];
        match self {
            LevelTarget::Local(levels) => {
                meter.process_midi(sources, nframes, levels.cells());
                true
            }
            LevelTarget::Shared { segment, closed } => match segment.writer() {
                Some(shm) => process_shared_midi(meter, shm, closed, sources, nframes),
                None => false,
            },
        }
    }

    /// The server dropped the client: stop metering, wake the control loop
    pub(crate) fn server_shutdown(&self) {
        if let LevelTarget::Shared { segment, .. } = self {
            if let Some(shm) = segment.writer() {
                shm.request_close();
            }
        }
    }

    /// Freeze the RT path before the client and mapping go away
    pub(crate) fn close(&self) {
        if let LevelTarget::Shared { segment, closed } = self {
            if let Some(shm) = segment.writer() {
                shm.set_closing();
            }
            closed.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MeterScale, MidiEvent};
    use crate::shm::WaitResult;
    use crate::types::GAIN_UNITY;
    use std::time::Duration;

    const FRAMES: usize = 64;

    struct CollectSink(Vec<(u32, Vec<u8>)>);

    impl MidiSink for &mut CollectSink {
        fn write(&mut self, event: MidiEvent<'_>) -> bool {
            self.0.push((event.time, event.bytes.to_vec()));
            true
        }
    }

    #[test]
    fn test_stage_audio_routes_ports() {
        let gains = GainMatrix::new();
        gains.set(0, 1, GAIN_UNITY);
        gains.set(1, 0, GAIN_UNITY);
        let a = vec![0.5f32; FRAMES];
        let b = vec![-0.25f32; FRAMES];
        let mut out0 = vec![1.0f32; FRAMES];
        let mut out1 = vec![1.0f32; FRAMES];

        stage_audio(
            &gains,
            [a.as_slice(), b.as_slice()].into_iter(),
            [out0.as_mut_slice(), out1.as_mut_slice()].into_iter(),
        );

        assert_eq!(out0, b);
        assert_eq!(out1, a);
    }

    #[test]
    fn test_stage_midi_fewer_sinks_than_sources() {
        let gains = GainMatrix::new();
        gains.set(0, 0, GAIN_UNITY);
        gains.set(0, 2, GAIN_UNITY);
        let first = [MidiEvent::new(4, &[0x90, 60, 100])];
        let second = [MidiEvent::new(1, &[0x90, 62, 100])];
        let third = [MidiEvent::new(2, &[0x90, 64, 100])];
        let mut out = CollectSink(Vec::new());

        stage_midi(
            &gains,
            [&first[..], &second[..], &third[..]]
                .into_iter()
                .map(|events| events.iter().copied().peekable()),
            std::iter::once(&mut out),
        );

        let times: Vec<u32> = out.0.iter().map(|(time, _)| *time).collect();
        assert_eq!(times, vec![2, 4]);
        assert_eq!(out.0[0].1, vec![0x90, 64, 100]);
    }

    #[test]
    fn test_local_target_publishes() {
        let levels = Arc::new(PublishedLevels::new(MeterScale::Decibels));
        let target = LevelTarget::Local(Arc::clone(&levels));
        let mut meter = LevelMeter::new(MeterScale::Decibels, 48000);
        let loud = vec![1.0f32; FRAMES];
        let silent = vec![0.0f32; FRAMES];

        assert!(target.meter_audio(&mut meter, [loud.as_slice(), silent.as_slice()].into_iter()));
        assert!(levels.get(0) > levels.get(1));

        // Closing only applies to shared targets
        target.close();
        assert!(target.meter_audio(&mut meter, [loud.as_slice()].into_iter()));
    }

    #[test]
    fn test_shared_target_publishes_into_segment() {
        let segment = Arc::new(SharedSegment::private().unwrap());
        segment.writer().unwrap().set_channels(1);
        let target = LevelTarget::shared(Arc::clone(&segment));
        let mut meter = LevelMeter::new(MeterScale::Velocity, 48000);

        let events = [MidiEvent::new(0, &[0x90, 60, 100])];
        let ports = std::iter::once(events.iter().copied().peekable());
        assert!(target.meter_midi(&mut meter, ports, FRAMES));
        assert_eq!(segment.shm().level(0), 10000);
    }

    #[test]
    fn test_server_shutdown_wakes_control_loop() {
        let segment = Arc::new(SharedSegment::private().unwrap());
        let writer = segment.writer().unwrap();
        writer.set_channels(1);
        let target = LevelTarget::shared(Arc::clone(&segment));
        let mut meter = LevelMeter::new(MeterScale::Decibels, 48000);
        let loud = vec![1.0f32; FRAMES];

        target.server_shutdown();
        assert_eq!(writer.wait_done(Duration::from_secs(1)), WaitResult::Signaled);
        assert!(segment.shm().is_closing());
        assert!(!target.meter_audio(&mut meter, [loud.as_slice()].into_iter()));
        assert_eq!(segment.shm().level(0), 0);
    }

    #[test]
    fn test_close_stops_shared_metering() {
        let segment = Arc::new(SharedSegment::private().unwrap());
        segment.writer().unwrap().set_channels(1);
        let target = LevelTarget::shared(Arc::clone(&segment));
        let mut meter = LevelMeter::new(MeterScale::Decibels, 48000);
        let loud = vec![1.0f32; FRAMES];

        assert!(target.meter_audio(&mut meter, [loud.as_slice()].into_iter()));
        target.close();
        assert!(!target.meter_audio(&mut meter, [loud.as_slice()].into_iter()));
        match &target {
            LevelTarget::Shared { closed, .. } => assert!(closed.load(Ordering::Relaxed)),
            LevelTarget::Local(_) => unreachable!(),
        }
        assert!(segment.shm().is_closing());
    }
}
