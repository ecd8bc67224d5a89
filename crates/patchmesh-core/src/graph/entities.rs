//! Graph entities: clients, ports and connections
//!
//! Entities live in arenas owned by [`GraphModel`](super::GraphModel) and
//! refer to each other through copyable keys. A key is never reused, so a
//! key held after its entity was removed just fails to resolve.

use std::collections::{BTreeSet, HashMap};

use crate::types::{Classification, Designation, Direction, KindSet, PortKind};

/// Stable handle of a port in the graph model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey(pub(crate) u32);

/// Stable handle of a client in the graph model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(pub(crate) u32);

/// Port description as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Server port id
    pub id: u32,
    /// Metadata UUID of the port, when the server exposes one
    pub uuid: Option<u64>,
    /// Metadata UUID of the owning client
    pub client_uuid: Option<u64>,
    /// Fully-qualified name (`client:port`)
    pub name: String,
    pub direction: Direction,
    pub kind: PortKind,
}

impl PortInfo {
    /// Client part of the fully-qualified name
    pub fn client_name(&self) -> &str {
        split_port_name(&self.name).0
    }

    /// Port part of the fully-qualified name
    pub fn short_name(&self) -> &str {
        split_port_name(&self.name).1
    }
}

/// Split `client:port`; a name without separator is all client
pub fn split_port_name(name: &str) -> (&str, &str) {
    name.split_once(':').unwrap_or((name, ""))
}

/// A typed, directional endpoint owned by a client
#[derive(Debug, Clone)]
pub struct Port {
    pub key: PortKey,
    pub id: u32,
    pub uuid: Option<u64>,
    pub name: String,
    pub short_name: String,
    pub pretty_name: Option<String>,
    pub direction: Direction,
    /// Current kind (may be refined by metadata)
    pub kind: PortKind,
    /// Kind derived from the server port type
    pub base_kind: PortKind,
    pub order: i32,
    pub designation: Designation,
    pub client: ClientKey,
}

impl Port {
    /// Pretty name if set, short name otherwise
    pub fn display_name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.short_name)
    }
}

/// A named participant in the graph
#[derive(Debug, Clone)]
pub struct Client {
    pub key: ClientKey,
    pub name: String,
    pub uuid: Option<u64>,
    pub pretty_name: Option<String>,
    /// Source ports, ordered by (order hint, short name)
    pub sources: Vec<PortKey>,
    /// Sink ports, ordered by (order hint, short name)
    pub sinks: Vec<PortKey>,
    pub kinds: KindSet,
}

impl Client {
    pub(crate) fn new(key: ClientKey, name: String, uuid: Option<u64>) -> Self {
        Self {
            key,
            name,
            uuid,
            pretty_name: None,
            sources: Vec::new(),
            sinks: Vec::new(),
            kinds: KindSet::EMPTY,
        }
    }

    pub fn display_name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.name)
    }

    pub fn ports(&self, direction: Direction) -> &[PortKey] {
        match direction {
            Direction::Source => &self.sources,
            Direction::Sink => &self.sinks,
        }
    }

    pub(crate) fn ports_mut(&mut self, direction: Direction) -> &mut Vec<PortKey> {
        match direction {
            Direction::Source => &mut self.sources,
            Direction::Sink => &mut self.sinks,
        }
    }

    pub fn port_count(&self) -> usize {
        self.sources.len() + self.sinks.len()
    }

    pub fn classification(&self) -> Classification {
        self.kinds.classify()
    }

    /// Recompute the kind set from the current ports
    pub(crate) fn refresh_kinds(&mut self, ports: &HashMap<PortKey, Port>) {
        self.kinds = self
            .sources
            .iter()
            .chain(self.sinks.iter())
            .filter_map(|key| ports.get(key))
            .map(|port| port.kind)
            .collect();
    }

    /// Re-sort both port lists by order hint, then short name
    pub(crate) fn sort(&mut self, ports: &HashMap<PortKey, Port>) {
        let sort_key = |key: &PortKey| {
            ports
                .get(key)
                .map(|port| (port.order, port.short_name.clone()))
        };
        self.sources.sort_by_cached_key(sort_key);
        self.sinks.sort_by_cached_key(sort_key);
    }
}

/// Aggregate of all port links between one source client and one sink client
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub source: ClientKey,
    pub sink: ClientKey,
    /// Linked (source port, sink port) pairs
    pub ports: BTreeSet<(PortKey, PortKey)>,
    /// Kinds of the linked source ports (styling only)
    pub kinds: KindSet,
}

impl ClientConnection {
    pub(crate) fn new(source: ClientKey, sink: ClientKey) -> Self {
        Self {
            source,
            sink,
            ports: BTreeSet::new(),
            kinds: KindSet::EMPTY,
        }
    }

    pub fn contains(&self, source: PortKey, sink: PortKey) -> bool {
        self.ports.contains(&(source, sink))
    }

    pub(crate) fn refresh_kinds(&mut self, ports: &HashMap<PortKey, Port>) {
        self.kinds = self
            .ports
            .iter()
            .filter_map(|(source, _)| ports.get(source))
            .map(|port| port.kind)
            .collect();
    }
}

/// Status of the server as last reported by notifications
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStatus {
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub xruns: u64,
    pub freewheel: bool,
    pub shut_down: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_port_name() {
        assert_eq!(split_port_name("system:playback_1"), ("system", "playback_1"));
        assert_eq!(split_port_name("a2j:Midi Through [14]:capture"), ("a2j", "Midi Through [14]:capture"));
        assert_eq!(split_port_name("lonely"), ("lonely", ""));
    }

    #[test]
    fn test_port_info_names() {
        let info = PortInfo {
            id: 1,
            uuid: None,
            client_uuid: None,
            name: "mixer:in_01".to_string(),
            direction: Direction::Sink,
            kind: PortKind::Audio,
        };
        assert_eq!(info.client_name(), "mixer");
        assert_eq!(info.short_name(), "in_01");
    }
}
