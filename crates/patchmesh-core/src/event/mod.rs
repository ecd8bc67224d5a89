//! Event channel: server notifications → control thread
//!
//! The server delivers graph changes on its own notification thread. Each
//! callback encodes a [`GraphEvent`] into the lock-free [`EventWriter`] and
//! returns immediately; the control thread drains the [`EventReader`] and
//! applies the records to the graph model.
//!
//! A full channel drops the record. That trades completeness for a
//! notification thread that never blocks; the next full resync repairs any
//! divergence.

mod bytes;
mod channel;
mod codec;

pub use bytes::{ByteReader, ByteWriter};
pub use channel::{
    event_channel, EventReader, EventWriter, ReadGrant, WriteGrant, EVENT_CHANNEL_CAPACITY,
};
pub use codec::{GraphEvent, PropertyState, SessionCommand, MAX_NAME_LEN};
