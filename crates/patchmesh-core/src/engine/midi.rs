//! MIDI event views used by the real-time kernels
//!
//! The kernels read from [`MidiSource`] cursors and write to [`MidiSink`]s
//! so they run the same over server port buffers and over plain slices in
//! tests. Nothing here allocates.

use std::iter::Peekable;

use crate::types::VELOCITY_MAX;

const STATUS_MASK: u8 = 0xf0;
const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

/// A timestamped raw MIDI message borrowed from a port buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent<'a> {
    /// Frame offset within the current buffer
    pub time: u32,
    pub bytes: &'a [u8],
}

impl<'a> MidiEvent<'a> {
    pub fn new(time: u32, bytes: &'a [u8]) -> Self {
        Self { time, bytes }
    }

    /// 3-byte note-on
    #[inline]
    pub fn is_note_on(&self) -> bool {
        self.bytes.len() == 3 && self.bytes[0] & STATUS_MASK == NOTE_ON
    }

    /// 3-byte note-on or note-off
    #[inline]
    pub fn is_note(&self) -> bool {
        self.bytes.len() == 3
            && matches!(self.bytes[0] & STATUS_MASK, NOTE_ON | NOTE_OFF)
    }

    /// Velocity byte of a note message
    #[inline]
    pub fn velocity(&self) -> Option<u8> {
        if self.is_note() {
            Some(self.bytes[2])
        } else {
            None
        }
    }
}

/// Scale a velocity by a linear gain, clamped to 0..=127
#[inline]
pub fn scale_velocity(velocity: u8, gain: f32) -> u8 {
    (velocity as f32 * gain).clamp(0.0, VELOCITY_MAX) as u8
}

/// Read cursor over one source's time-sorted events
pub trait MidiSource<'a> {
    /// The next unconsumed event
    fn peek(&mut self) -> Option<MidiEvent<'a>>;

    /// Consume the event returned by `peek`
    fn advance(&mut self);
}

impl<'a, I> MidiSource<'a> for Peekable<I>
where
    I: Iterator,
    I::Item: Copy + Into<MidiEvent<'a>>,
{
    #[inline]
    fn peek(&mut self) -> Option<MidiEvent<'a>> {
        Peekable::peek(self).map(|event| (*event).into())
    }

    #[inline]
    fn advance(&mut self) {
        self.next();
    }
}

/// An absent port reads as an exhausted source
impl<'a, S: MidiSource<'a>> MidiSource<'a> for Option<S> {
    #[inline]
    fn peek(&mut self) -> Option<MidiEvent<'a>> {
        self.as_mut().and_then(|source| source.peek())
    }

    #[inline]
    fn advance(&mut self) {
        if let Some(source) = self {
            source.advance();
        }
    }
}

/// Destination for mixed events
///
/// A sink starts every cycle empty and must not allocate. Returning false
/// means the event was lost (buffer full).
pub trait MidiSink {
    fn write(&mut self, event: MidiEvent<'_>) -> bool;
}

impl<K: MidiSink> MidiSink for Option<K> {
    #[inline]
    fn write(&mut self, event: MidiEvent<'_>) -> bool {
        self.as_mut().is_some_and(|sink| sink.write(event))
    }
}
