//! Variable-length SPSC byte channel for graph notifications
//!
//! Built on an `rtrb` byte ring. Each record is a 4-byte little-endian
//! length header followed by the payload; header and payload are committed
//! together, so the consumer only ever sees whole records.
//!
//! ```text
//! ┌───────────────────────┐  write_request/commit  ┌────────────────┐
//! │ server notify thread  │───────────────────────►│  byte ring     │
//! │ (EventWriter)         │   dropped when full    │  (lock-free)   │
//! └───────────────────────┘                        └───────┬────────┘
//!                                                          │ read_request/commit
//!                                                          ▼
//!                                                  ┌────────────────┐
//!                                                  │ control thread │
//!                                                  │ (EventReader)  │
//!                                                  └────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::chunks::{ReadChunk, WriteChunk};

use super::bytes::{ByteReader, ByteWriter};
use super::codec::GraphEvent;

/// Default channel capacity in bytes
pub const EVENT_CHANNEL_CAPACITY: usize = 0x10000;

const HEADER_LEN: usize = 4;

/// Create a new event channel (writer/reader pair)
///
/// - Writer: owned by the server notification callback
/// - Reader: owned by the control thread
pub fn event_channel(capacity: usize) -> (EventWriter, EventReader) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity.max(HEADER_LEN + 1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventWriter {
            producer,
            dropped: Arc::clone(&dropped),
        },
        EventReader { consumer, dropped },
    )
}

/// Producer side of the event channel
pub struct EventWriter {
    producer: rtrb::Producer<u8>,
    dropped: Arc<AtomicU64>,
}

impl EventWriter {
    /// Reserve room for a record of `size` bytes
    ///
    /// Returns `None` when the channel is full; the caller drops the record.
    pub fn write_request(&mut self, size: usize) -> Option<WriteGrant<'_>> {
        reserve(&mut self.producer, size)
    }

    /// Encode and publish a record, dropping it silently when full
    ///
    /// Never blocks and never allocates.
    pub fn push(&mut self, event: &GraphEvent<'_>) -> bool {
        let len = event.encoded_len();
        match reserve(&mut self.producer, len) {
            Some(mut grant) => {
                if event.encode(&mut grant.region()) {
                    grant.commit(len);
                    true
                } else {
                    false
                }
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Records dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn reserve(producer: &mut rtrb::Producer<u8>, size: usize) -> Option<WriteGrant<'_>> {
    let chunk = producer.write_chunk(HEADER_LEN + size).ok()?;
    Some(WriteGrant {
        chunk,
        reserved: size,
    })
}

/// A reserved, not yet published record
///
/// Dropping the grant without [`commit`](Self::commit) publishes nothing.
pub struct WriteGrant<'a> {
    chunk: WriteChunk<'a, u8>,
    reserved: usize,
}

impl WriteGrant<'_> {
    /// Writable payload region (may wrap around the ring)
    pub fn region(&mut self) -> ByteWriter<'_> {
        let (first, second) = self.chunk.as_mut_slices();
        if HEADER_LEN <= first.len() {
            ByteWriter::new(&mut first[HEADER_LEN..], second)
        } else {
            let skip = HEADER_LEN - first.len();
            ByteWriter::new(&mut second[skip..], Default::default())
        }
    }

    /// Number of payload bytes reserved
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Publish the first `size` payload bytes
    pub fn commit(mut self, size: usize) {
        let size = size.min(self.reserved);
        {
            let (first, second) = self.chunk.as_mut_slices();
            let mut header = ByteWriter::new(first, second);
            header.put_u32(size as u32);
        }
        self.chunk.commit(HEADER_LEN + size);
    }
}

/// Consumer side of the event channel
pub struct EventReader {
    consumer: rtrb::Consumer<u8>,
    dropped: Arc<AtomicU64>,
}

impl EventReader {
    /// Peek at the oldest record, if any
    pub fn read_request(&mut self) -> Option<ReadGrant<'_>> {
        let len = {
            let header = self.consumer.read_chunk(HEADER_LEN).ok()?;
            let (first, second) = header.as_slices();
            ByteReader::new(first, second).u32()? as usize
        };
        let chunk = self.consumer.read_chunk(HEADER_LEN + len).ok()?;
        Some(ReadGrant { chunk, len })
    }

    /// Pop and decode the oldest record, skipping malformed ones
    pub fn pop(&mut self) -> Option<GraphEvent<'static>> {
        loop {
            let grant = self.read_request()?;
            let event = GraphEvent::decode(&mut grant.payload());
            grant.commit();
            match event {
                Some(event) => return Some(event),
                None => log::debug!("Skipping malformed event record"),
            }
        }
    }

    /// Records dropped by the writer because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether there is nothing left to read
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

/// A readable record; [`commit`](Self::commit) releases it
pub struct ReadGrant<'a> {
    chunk: ReadChunk<'a, u8>,
    len: usize,
}

impl ReadGrant<'_> {
    /// Payload bytes (may wrap around the ring)
    pub fn payload(&self) -> ByteReader<'_> {
        let (first, second) = self.chunk.as_slices();
        if HEADER_LEN <= first.len() {
            ByteReader::new(&first[HEADER_LEN..], second)
        } else {
            ByteReader::new(&second[HEADER_LEN - first.len()..], &[])
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Release the record
    pub fn commit(self) {
        self.chunk.commit_all();
    }
}
