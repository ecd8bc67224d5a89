//! Graph-change notification records
//!
//! One variant per server notification category. Producers build records
//! from borrowed callback arguments (no allocation on the notification
//! thread); the consumer decodes owned copies.
//!
//! Wire layout: a tag byte followed by little-endian fields. Strings are a
//! `u16` length plus UTF-8 bytes, optional strings get a presence byte.

use std::borrow::Cow;

use super::bytes::{ByteReader, ByteWriter};

/// Upper bound on any string carried by a record (bytes)
///
/// Enough for a JACK client name (64) plus a port name (256).
pub const MAX_NAME_LEN: usize = 320;

const TAG_CLIENT_REGISTRATION: u8 = 1;
const TAG_PORT_REGISTRATION: u8 = 2;
const TAG_PORT_CONNECTION: u8 = 3;
const TAG_PROPERTY_CHANGE: u8 = 4;
const TAG_PORT_RENAME: u8 = 5;
const TAG_SHUTDOWN: u8 = 6;
const TAG_FREEWHEEL: u8 = 7;
const TAG_BUFFER_SIZE: u8 = 8;
const TAG_SAMPLE_RATE: u8 = 9;
const TAG_XRUN: u8 = 10;
const TAG_GRAPH_ORDER: u8 = 11;
const TAG_SESSION: u8 = 12;

/// What happened to a metadata property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    Created,
    Changed,
    Deleted,
}

impl PropertyState {
    fn to_u8(self) -> u8 {
        match self {
            PropertyState::Created => 0,
            PropertyState::Changed => 1,
            PropertyState::Deleted => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PropertyState::Created),
            1 => Some(PropertyState::Changed),
            2 => Some(PropertyState::Deleted),
            _ => None,
        }
    }
}

/// Session request from the server's session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Save,
    SaveAndQuit,
    SaveTemplate,
}

impl SessionCommand {
    fn to_u8(self) -> u8 {
        match self {
            SessionCommand::Save => 0,
            SessionCommand::SaveAndQuit => 1,
            SessionCommand::SaveTemplate => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SessionCommand::Save),
            1 => Some(SessionCommand::SaveAndQuit),
            2 => Some(SessionCommand::SaveTemplate),
            _ => None,
        }
    }
}

/// A graph-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent<'a> {
    ClientRegistration {
        name: Cow<'a, str>,
        registered: bool,
    },
    PortRegistration {
        id: u32,
        registered: bool,
    },
    PortConnection {
        source: u32,
        sink: u32,
        connected: bool,
    },
    PropertyChange {
        subject: u64,
        key: Option<Cow<'a, str>>,
        value: Option<Cow<'a, str>>,
        state: PropertyState,
    },
    PortRename {
        id: u32,
        old_name: Cow<'a, str>,
        new_name: Cow<'a, str>,
    },
    Shutdown {
        reason: Cow<'a, str>,
    },
    Freewheel {
        starting: bool,
    },
    BufferSize {
        frames: u32,
    },
    SampleRate {
        frames: u32,
    },
    Xrun,
    GraphOrder,
    Session {
        command: SessionCommand,
    },
}

/// Clip a string to [`MAX_NAME_LEN`] bytes on a char boundary
fn bounded(value: &str) -> &str {
    if value.len() <= MAX_NAME_LEN {
        return value;
    }
    let mut end = MAX_NAME_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn str_len(value: &str) -> usize {
    2 + bounded(value).len()
}

fn opt_str_len(value: &Option<Cow<'_, str>>) -> usize {
    1 + value.as_deref().map_or(0, str_len)
}

fn put_str(out: &mut ByteWriter<'_>, value: &str) -> bool {
    out.put_str(bounded(value))
}

fn put_opt_str(out: &mut ByteWriter<'_>, value: &Option<Cow<'_, str>>) -> bool {
    match value.as_deref() {
        Some(s) => out.put_bool(true) && put_str(out, s),
        None => out.put_bool(false),
    }
}

fn read_opt_str(input: &mut ByteReader<'_>) -> Option<Option<Cow<'static, str>>> {
    if input.bool()? {
        Some(Some(Cow::Owned(input.string()?)))
    } else {
        Some(None)
    }
}

impl GraphEvent<'_> {
    /// Exact number of bytes [`encode`](Self::encode) will write
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            GraphEvent::ClientRegistration { name, .. } => str_len(name) + 1,
            GraphEvent::PortRegistration { .. } => 4 + 1,
            GraphEvent::PortConnection { .. } => 4 + 4 + 1,
            GraphEvent::PropertyChange { key, value, .. } => {
                8 + opt_str_len(key) + opt_str_len(value) + 1
            }
            GraphEvent::PortRename {
                old_name, new_name, ..
            } => 4 + str_len(old_name) + str_len(new_name),
            GraphEvent::Shutdown { reason } => str_len(reason),
            GraphEvent::Freewheel { .. } => 1,
            GraphEvent::BufferSize { .. } | GraphEvent::SampleRate { .. } => 4,
            GraphEvent::Xrun | GraphEvent::GraphOrder => 0,
            GraphEvent::Session { .. } => 1,
        }
    }

    /// Serialize into a reserved region; false if it doesn't fit
    pub fn encode(&self, out: &mut ByteWriter<'_>) -> bool {
        match self {
            GraphEvent::ClientRegistration { name, registered } => {
                out.put_u8(TAG_CLIENT_REGISTRATION) && put_str(out, name) && out.put_bool(*registered)
            }
            GraphEvent::PortRegistration { id, registered } => {
                out.put_u8(TAG_PORT_REGISTRATION) && out.put_u32(*id) && out.put_bool(*registered)
            }
            GraphEvent::PortConnection {
                source,
                sink,
                connected,
            } => {
                out.put_u8(TAG_PORT_CONNECTION)
                    && out.put_u32(*source)
                    && out.put_u32(*sink)
                    && out.put_bool(*connected)
            }
            GraphEvent::PropertyChange {
                subject,
                key,
                value,
                state,
            } => {
                out.put_u8(TAG_PROPERTY_CHANGE)
                    && out.put_u64(*subject)
                    && put_opt_str(out, key)
                    && put_opt_str(out, value)
                    && out.put_u8(state.to_u8())
            }
            GraphEvent::PortRename {
                id,
                old_name,
                new_name,
            } => {
                out.put_u8(TAG_PORT_RENAME)
                    && out.put_u32(*id)
                    && put_str(out, old_name)
                    && put_str(out, new_name)
            }
            GraphEvent::Shutdown { reason } => out.put_u8(TAG_SHUTDOWN) && put_str(out, reason),
            GraphEvent::Freewheel { starting } => {
                out.put_u8(TAG_FREEWHEEL) && out.put_bool(*starting)
            }
            GraphEvent::BufferSize { frames } => out.put_u8(TAG_BUFFER_SIZE) && out.put_u32(*frames),
            GraphEvent::SampleRate { frames } => out.put_u8(TAG_SAMPLE_RATE) && out.put_u32(*frames),
            GraphEvent::Xrun => out.put_u8(TAG_XRUN),
            GraphEvent::GraphOrder => out.put_u8(TAG_GRAPH_ORDER),
            GraphEvent::Session { command } => {
                out.put_u8(TAG_SESSION) && out.put_u8(command.to_u8())
            }
        }
    }

    /// Deserialize an owned record; `None` for unknown tags or short payloads
    pub fn decode(input: &mut ByteReader<'_>) -> Option<GraphEvent<'static>> {
        let event = match input.u8()? {
            TAG_CLIENT_REGISTRATION => GraphEvent::ClientRegistration {
                name: Cow::Owned(input.string()?),
                registered: input.bool()?,
            },
            TAG_PORT_REGISTRATION => GraphEvent::PortRegistration {
                id: input.u32()?,
                registered: input.bool()?,
            },
            TAG_PORT_CONNECTION => GraphEvent::PortConnection {
                source: input.u32()?,
                sink: input.u32()?,
                connected: input.bool()?,
            },
            TAG_PROPERTY_CHANGE => GraphEvent::PropertyChange {
                subject: input.u64()?,
                key: read_opt_str(input)?,
                value: read_opt_str(input)?,
                state: PropertyState::from_u8(input.u8()?)?,
            },
            TAG_PORT_RENAME => GraphEvent::PortRename {
                id: input.u32()?,
                old_name: Cow::Owned(input.string()?),
                new_name: Cow::Owned(input.string()?),
            },
            TAG_SHUTDOWN => GraphEvent::Shutdown {
                reason: Cow::Owned(input.string()?),
            },
            TAG_FREEWHEEL => GraphEvent::Freewheel {
                starting: input.bool()?,
            },
            TAG_BUFFER_SIZE => GraphEvent::BufferSize {
                frames: input.u32()?,
            },
            TAG_SAMPLE_RATE => GraphEvent::SampleRate {
                frames: input.u32()?,
            },
            TAG_XRUN => GraphEvent::Xrun,
            TAG_GRAPH_ORDER => GraphEvent::GraphOrder,
            TAG_SESSION => GraphEvent::Session {
                command: SessionCommand::from_u8(input.u8()?)?,
            },
            _ => return None,
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_decode(event: &GraphEvent<'_>) -> Option<GraphEvent<'static>> {
        let mut buf = vec![0u8; event.encoded_len()];
        let mut writer = ByteWriter::new(&mut buf, &mut []);
        assert!(event.encode(&mut writer));
        assert_eq!(writer.position(), event.encoded_len());
        GraphEvent::decode(&mut ByteReader::new(&buf, &[]))
    }

    #[test]
    fn test_property_change_with_missing_key() {
        let event = GraphEvent::PropertyChange {
            subject: 42,
            key: None,
            value: Some(Cow::Borrowed("Left")),
            state: PropertyState::Deleted,
        };
        assert_eq!(encode_decode(&event), Some(event));
    }

    #[test]
    fn test_long_names_are_bounded() {
        let long = "é".repeat(MAX_NAME_LEN);
        let event = GraphEvent::Shutdown {
            reason: Cow::Borrowed(&long),
        };
        assert!(event.encoded_len() <= 1 + 2 + MAX_NAME_LEN);

        match encode_decode(&event) {
            Some(GraphEvent::Shutdown { reason }) => {
                assert!(reason.len() <= MAX_NAME_LEN);
                assert!(long.starts_with(reason.as_ref()));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_and_truncation() {
        assert_eq!(GraphEvent::decode(&mut ByteReader::new(&[0xff], &[])), None);
        // Port registration missing its flag byte
        assert_eq!(
            GraphEvent::decode(&mut ByteReader::new(&[TAG_PORT_REGISTRATION, 1, 0, 0, 0], &[])),
            None
        );
    }

    #[test]
    fn test_encode_rejects_short_region() {
        let event = GraphEvent::PortConnection {
            source: 1,
            sink: 2,
            connected: true,
        };
        let mut buf = [0u8; 4];
        let mut writer = ByteWriter::new(&mut buf, &mut []);
        assert!(!event.encode(&mut writer));
    }
}
