//! The graph model: clients, ports and connections mirrored from the server
//!
//! Owned and mutated by the control thread only. Every mutation is
//! idempotent so that duplicated or reordered notifications converge on the
//! server's state instead of failing.

use std::collections::HashMap;

use super::entities::{
    split_port_name, Client, ClientConnection, ClientKey, Port, PortInfo, PortKey, ServerStatus,
};
use super::properties::{parse_order, PropertyKey};
use super::server::GraphServer;
use crate::audio::{AudioError, AudioResult};
use crate::event::{GraphEvent, PropertyState, SessionCommand};
use crate::types::{Designation, Direction, PortKind};

/// Outcome of applying one notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// The model (or the server status) changed and needs a redraw
    pub changed: bool,
    /// The control loop should stop
    pub quit: bool,
    /// Session request to hand to the persistence layer
    pub session: Option<SessionCommand>,
}

/// In-memory mirror of the server graph
#[derive(Debug, Default)]
pub struct GraphModel {
    ports: HashMap<PortKey, Port>,
    clients: HashMap<ClientKey, Client>,
    connections: HashMap<(ClientKey, ClientKey), ClientConnection>,
    port_names: HashMap<String, PortKey>,
    port_ids: HashMap<u32, PortKey>,
    client_names: HashMap<String, ClientKey>,
    next_key: u32,
    status: ServerStatus,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn port(&self, key: PortKey) -> Option<&Port> {
        self.ports.get(&key)
    }

    pub fn client(&self, key: ClientKey) -> Option<&Client> {
        self.clients.get(&key)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &ClientConnection> {
        self.connections.values()
    }

    pub fn connection(&self, source: ClientKey, sink: ClientKey) -> Option<&ClientConnection> {
        self.connections.get(&(source, sink))
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    pub fn find_port_by_name(&self, name: &str) -> Option<PortKey> {
        self.port_names.get(name).copied()
    }

    pub fn find_port_by_id(&self, id: u32) -> Option<PortKey> {
        self.port_ids.get(&id).copied()
    }

    pub fn find_port_by_uuid(&self, uuid: u64) -> Option<PortKey> {
        self.ports
            .values()
            .find(|port| port.uuid == Some(uuid))
            .map(|port| port.key)
    }

    pub fn find_client_by_name(&self, name: &str) -> Option<ClientKey> {
        self.client_names.get(name).copied()
    }

    pub fn find_client_by_uuid(&self, uuid: u64) -> Option<ClientKey> {
        self.clients
            .values()
            .find(|client| client.uuid == Some(uuid))
            .map(|client| client.key)
    }

    /// Whether `source` is linked to `sink`
    pub fn is_connected(&self, source: PortKey, sink: PortKey) -> bool {
        self.oriented(source, sink)
            .and_then(|(source, sink, clients)| {
                self.connections
                    .get(&clients)
                    .map(|conn| conn.contains(source, sink))
            })
            .unwrap_or(false)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ports and clients
    // ─────────────────────────────────────────────────────────────────────

    fn allocate_key(&mut self) -> u32 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// Add a port announced by the server
    ///
    /// Re-adding the same (id, name) returns the existing key. A stale entry
    /// that shares only the id or only the name is replaced.
    pub fn add_port(&mut self, info: PortInfo) -> PortKey {
        if let Some(key) = self.find_port_by_id(info.id) {
            if self.ports.get(&key).is_some_and(|port| port.name == info.name) {
                return key;
            }
            self.remove_port(key);
        }
        if let Some(key) = self.find_port_by_name(&info.name) {
            self.remove_port(key);
        }

        let client = self.client_for(info.client_name(), info.client_uuid);
        let key = PortKey(self.allocate_key());
        let port = Port {
            key,
            id: info.id,
            uuid: info.uuid,
            short_name: info.short_name().to_string(),
            name: info.name,
            pretty_name: None,
            direction: info.direction,
            kind: info.kind,
            base_kind: info.kind,
            order: 0,
            designation: Designation::None,
            client,
        };
        log::debug!("Port added: {} ({}, {:?})", port.name, port.kind, port.direction);

        self.port_names.insert(port.name.clone(), key);
        self.port_ids.insert(port.id, key);
        let direction = port.direction;
        self.ports.insert(key, port);

        if let Some(client) = self.clients.get_mut(&client) {
            client.ports_mut(direction).push(key);
            client.sort(&self.ports);
            client.refresh_kinds(&self.ports);
        }
        key
    }

    /// Existing client by name, or a fresh one
    fn client_for(&mut self, name: &str, uuid: Option<u64>) -> ClientKey {
        if let Some(key) = self.find_client_by_name(name) {
            if let Some(client) = self.clients.get_mut(&key) {
                if client.uuid.is_none() {
                    client.uuid = uuid;
                }
            }
            return key;
        }

        let key = ClientKey(self.allocate_key());
        log::debug!("Client added: {}", name);
        self.clients
            .insert(key, Client::new(key, name.to_string(), uuid));
        self.client_names.insert(name.to_string(), key);
        key
    }

    /// Remove a port with its links; prunes the client when it was the last
    ///
    /// Returns false (and does nothing) when the port is unknown.
    pub fn remove_port(&mut self, key: PortKey) -> bool {
        let Some(port) = self.ports.remove(&key) else {
            return false;
        };
        log::debug!("Port removed: {}", port.name);

        if self.port_names.get(&port.name) == Some(&key) {
            self.port_names.remove(&port.name);
        }
        if self.port_ids.get(&port.id) == Some(&key) {
            self.port_ids.remove(&port.id);
        }

        self.connections.retain(|_, conn| {
            conn.ports
                .retain(|(source, sink)| *source != key && *sink != key);
            !conn.ports.is_empty()
        });
        for conn in self.connections.values_mut() {
            conn.refresh_kinds(&self.ports);
        }

        let empty = match self.clients.get_mut(&port.client) {
            Some(client) => {
                client.ports_mut(port.direction).retain(|k| *k != key);
                client.refresh_kinds(&self.ports);
                client.port_count() == 0
            }
            None => false,
        };
        if empty {
            self.remove_client_entry(port.client);
        }
        true
    }

    pub fn remove_port_by_id(&mut self, id: u32) -> bool {
        match self.find_port_by_id(id) {
            Some(key) => self.remove_port(key),
            None => false,
        }
    }

    /// Remove a client and every port it owns
    pub fn remove_client_by_name(&mut self, name: &str) -> bool {
        let Some(key) = self.find_client_by_name(name) else {
            return false;
        };
        let ports: Vec<PortKey> = self
            .clients
            .get(&key)
            .map(|client| client.sources.iter().chain(&client.sinks).copied().collect())
            .unwrap_or_default();
        for port in ports {
            self.remove_port(port);
        }
        if self.clients.contains_key(&key) {
            self.remove_client_entry(key);
        }
        true
    }

    fn remove_client_entry(&mut self, key: ClientKey) {
        if let Some(client) = self.clients.remove(&key) {
            log::debug!("Client removed: {}", client.name);
            if self.client_names.get(&client.name) == Some(&key) {
                self.client_names.remove(&client.name);
            }
        }
        self.connections
            .retain(|&(source, sink), _| source != key && sink != key);
    }

    /// Update a port's name after a server rename
    pub fn rename_port(&mut self, old_name: &str, new_name: &str) -> bool {
        match self.find_port_by_name(old_name) {
            Some(key) => self.rename_key(key, new_name),
            None => false,
        }
    }

    fn rename_key(&mut self, key: PortKey, new_name: &str) -> bool {
        let Some(port) = self.ports.get_mut(&key) else {
            return false;
        };
        if port.name == new_name {
            return false;
        }
        log::debug!("Port renamed: {} -> {}", port.name, new_name);

        if self.port_names.get(&port.name) == Some(&key) {
            self.port_names.remove(&port.name);
        }
        port.name = new_name.to_string();
        port.short_name = split_port_name(new_name).1.to_string();
        let client = port.client;
        self.port_names.insert(new_name.to_string(), key);

        if let Some(client) = self.clients.get_mut(&client) {
            client.sort(&self.ports);
        }
        true
    }

    /// Drop everything (server status and key counter survive)
    pub fn clear(&mut self) {
        self.ports.clear();
        self.clients.clear();
        self.connections.clear();
        self.port_names.clear();
        self.port_ids.clear();
        self.client_names.clear();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────

    /// Put a port pair in (source, sink) order with its client pair
    #[allow(clippy::type_complexity)]
    fn oriented(
        &self,
        a: PortKey,
        b: PortKey,
    ) -> Option<(PortKey, PortKey, (ClientKey, ClientKey))> {
        let pa = self.ports.get(&a)?;
        let pb = self.ports.get(&b)?;
        match (pa.direction, pb.direction) {
            (Direction::Source, Direction::Sink) => Some((a, b, (pa.client, pb.client))),
            (Direction::Sink, Direction::Source) => Some((b, a, (pb.client, pa.client))),
            _ => None,
        }
    }

    /// Record a port link; no-op for unknown ports or an existing link
    pub fn connect(&mut self, source: PortKey, sink: PortKey) -> bool {
        let Some((source, sink, clients)) = self.oriented(source, sink) else {
            return false;
        };
        let conn = self
            .connections
            .entry(clients)
            .or_insert_with(|| ClientConnection::new(clients.0, clients.1));
        let added = conn.ports.insert((source, sink));
        conn.refresh_kinds(&self.ports);
        added
    }

    /// Forget a port link; prunes the client connection when it was the last
    pub fn disconnect(&mut self, source: PortKey, sink: PortKey) -> bool {
        let Some((source, sink, clients)) = self.oriented(source, sink) else {
            return false;
        };
        let Some(conn) = self.connections.get_mut(&clients) else {
            return false;
        };
        let removed = conn.ports.remove(&(source, sink));
        if conn.ports.is_empty() {
            self.connections.remove(&clients);
        } else {
            conn.refresh_kinds(&self.ports);
        }
        removed
    }

    /// Ask the server to link two ports; the model changes on notification
    pub fn request_connect(
        &self,
        server: &dyn GraphServer,
        source: PortKey,
        sink: PortKey,
    ) -> AudioResult<()> {
        let (source, sink) = self.port_names_of(source, sink)?;
        server.connect(source, sink)
    }

    /// Ask the server to unlink two ports; the model changes on notification
    pub fn request_disconnect(
        &self,
        server: &dyn GraphServer,
        source: PortKey,
        sink: PortKey,
    ) -> AudioResult<()> {
        let (source, sink) = self.port_names_of(source, sink)?;
        server.disconnect(source, sink)
    }

    fn port_names_of(&self, source: PortKey, sink: PortKey) -> AudioResult<(&str, &str)> {
        let name = |key: PortKey| {
            self.ports
                .get(&key)
                .map(|port| port.name.as_str())
                .ok_or_else(|| AudioError::PortNotFound(format!("{:?}", key)))
        };
        Ok((name(source)?, name(sink)?))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Metadata
    // ─────────────────────────────────────────────────────────────────────

    /// Apply a metadata property to the port or client with this UUID
    pub fn set_property(&mut self, subject: u64, key: &str, value: &str) -> bool {
        let Some(property) = PropertyKey::from_uri(key) else {
            return false;
        };
        if let Some(port) = self.find_port_by_uuid(subject) {
            return self.update_port_property(port, property, Some(value));
        }
        match (property, self.find_client_by_uuid(subject)) {
            (PropertyKey::PrettyName, Some(client)) => {
                if let Some(client) = self.clients.get_mut(&client) {
                    client.pretty_name = Some(value.to_string());
                }
                true
            }
            _ => false,
        }
    }

    /// Reset a property to its default
    ///
    /// `key == None` resets every property of the subject; subject 0 (the
    /// nil UUID) means every subject. Resetting a property that was never
    /// set is not an error.
    pub fn delete_property(&mut self, subject: u64, key: Option<&str>) -> bool {
        let properties: Vec<PropertyKey> = match key {
            Some(key) => PropertyKey::from_uri(key).into_iter().collect(),
            None => PropertyKey::ALL.to_vec(),
        };

        let ports: Vec<PortKey> = if subject == 0 {
            self.ports.keys().copied().collect()
        } else {
            self.find_port_by_uuid(subject).into_iter().collect()
        };
        let clients: Vec<ClientKey> = if subject == 0 {
            self.clients.keys().copied().collect()
        } else {
            self.find_client_by_uuid(subject).into_iter().collect()
        };

        let mut changed = false;
        for port in ports {
            for &property in &properties {
                changed |= self.update_port_property(port, property, None);
            }
        }
        if properties.contains(&PropertyKey::PrettyName) {
            for client in clients {
                if let Some(client) = self.clients.get_mut(&client) {
                    changed |= client.pretty_name.take().is_some();
                }
            }
        }
        changed
    }

    /// Set (`Some`) or reset (`None`) one property of a port
    fn update_port_property(
        &mut self,
        key: PortKey,
        property: PropertyKey,
        value: Option<&str>,
    ) -> bool {
        let Some(port) = self.ports.get_mut(&key) else {
            return false;
        };
        match property {
            PropertyKey::PrettyName => port.pretty_name = value.map(str::to_string),
            PropertyKey::SignalType if port.base_kind == PortKind::Audio => {
                let cv = value.is_some_and(|v| v.trim().eq_ignore_ascii_case("cv"));
                port.kind = if cv { PortKind::Cv } else { PortKind::Audio };
            }
            PropertyKey::EventTypes if port.base_kind == PortKind::Midi => {
                let osc = value.is_some_and(|v| v.to_ascii_uppercase().contains("OSC"));
                port.kind = if osc { PortKind::Osc } else { PortKind::Midi };
            }
            PropertyKey::SignalType | PropertyKey::EventTypes => return false,
            PropertyKey::Order => port.order = value.map_or(0, parse_order),
            PropertyKey::Designation => {
                port.designation = value.map_or(Designation::None, Designation::from_uri)
            }
        }
        let client = port.client;
        self.refresh_client(client);
        true
    }

    /// Re-sort a client's ports and recompute derived kinds
    fn refresh_client(&mut self, key: ClientKey) {
        if let Some(client) = self.clients.get_mut(&key) {
            client.sort(&self.ports);
            client.refresh_kinds(&self.ports);
        }
        for conn in self.connections.values_mut() {
            if conn.source == key {
                conn.refresh_kinds(&self.ports);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Synchronization
    // ─────────────────────────────────────────────────────────────────────

    /// Re-populate the model from the server
    ///
    /// The only bulk, blocking read of server state. Used at startup and
    /// after a reconnect.
    pub fn full_resync(&mut self, server: &dyn GraphServer) -> usize {
        self.clear();

        for name in server.port_names() {
            if let Some(info) = server.port_by_name(&name) {
                self.add_port(info);
            }
        }

        let sources: Vec<(PortKey, String)> = self
            .ports
            .values()
            .filter(|port| port.direction == Direction::Source)
            .map(|port| (port.key, port.name.clone()))
            .collect();
        for (source, name) in sources {
            for other in server.connections(&name) {
                if let Some(sink) = self.find_port_by_name(&other) {
                    self.connect(source, sink);
                }
            }
        }

        let subjects: Vec<(PortKey, u64)> = self
            .ports
            .values()
            .filter_map(|port| port.uuid.map(|uuid| (port.key, uuid)))
            .collect();
        for (port, uuid) in subjects {
            for property in PropertyKey::ALL {
                if let Some(value) = server.property(uuid, property.uri()) {
                    self.update_port_property(port, property, Some(&value));
                }
            }
        }
        for client in self.clients.values_mut() {
            if let Some(uuid) = client.uuid {
                client.pretty_name = server.property(uuid, PropertyKey::PrettyName.uri());
            }
        }

        log::info!(
            "Graph resynced: {} clients, {} ports, {} connections",
            self.client_count(),
            self.port_count(),
            self.connection_count()
        );
        self.port_count()
    }

    /// Resolve a server port id, pulling it from the server if the model
    /// missed its registration
    fn resolve_port(&mut self, id: u32, server: &dyn GraphServer) -> Option<PortKey> {
        self.find_port_by_id(id)
            .or_else(|| server.port_by_id(id).map(|info| self.add_port(info)))
    }

    /// Apply one notification drained from the event channel
    pub fn apply(&mut self, event: &GraphEvent<'_>, server: &dyn GraphServer) -> Applied {
        let mut applied = Applied::default();
        match event {
            GraphEvent::ClientRegistration { name, registered } => {
                // Clients appear lazily with their first port
                if !*registered {
                    applied.changed = self.remove_client_by_name(name);
                }
            }
            GraphEvent::PortRegistration {
                id,
                registered: true,
            } => match server.port_by_id(*id) {
                Some(info) => {
                    self.add_port(info);
                    applied.changed = true;
                }
                None => log::debug!("Port {} gone before its registration was applied", id),
            },
            GraphEvent::PortRegistration {
                id,
                registered: false,
            } => {
                applied.changed = self.remove_port_by_id(*id);
            }
            GraphEvent::PortConnection {
                source,
                sink,
                connected,
            } => {
                let source = self.resolve_port(*source, server);
                let sink = self.resolve_port(*sink, server);
                if let (Some(source), Some(sink)) = (source, sink) {
                    applied.changed = if *connected {
                        self.connect(source, sink)
                    } else {
                        self.disconnect(source, sink)
                    };
                }
            }
            GraphEvent::PropertyChange {
                subject,
                key,
                value,
                state,
            } => {
                applied.changed = match (state, key.as_deref()) {
                    (PropertyState::Deleted, key) => self.delete_property(*subject, key),
                    (_, Some(key)) => {
                        let fetched;
                        let value = match value.as_deref() {
                            Some(value) => Some(value),
                            None => {
                                fetched = server.property(*subject, key);
                                fetched.as_deref()
                            }
                        };
                        match value {
                            Some(value) => self.set_property(*subject, key, value),
                            None => self.delete_property(*subject, Some(key)),
                        }
                    }
                    (_, None) => false,
                };
            }
            GraphEvent::PortRename {
                id,
                old_name,
                new_name,
            } => {
                applied.changed = self.rename_port(old_name, new_name)
                    || self
                        .find_port_by_id(*id)
                        .is_some_and(|key| self.rename_key(key, new_name));
            }
            GraphEvent::Shutdown { reason } => {
                log::warn!("Audio server shut down: {}", reason);
                self.status.shut_down = true;
                applied.changed = true;
                applied.quit = true;
            }
            GraphEvent::Freewheel { starting } => {
                self.status.freewheel = *starting;
                applied.changed = true;
            }
            GraphEvent::BufferSize { frames } => {
                self.status.buffer_size = *frames;
                applied.changed = true;
            }
            GraphEvent::SampleRate { frames } => {
                self.status.sample_rate = *frames;
                applied.changed = true;
            }
            GraphEvent::Xrun => {
                self.status.xruns += 1;
                applied.changed = true;
            }
            GraphEvent::GraphOrder => {}
            GraphEvent::Session { command } => {
                applied.session = Some(*command);
                applied.quit = *command == SessionCommand::SaveAndQuit;
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::properties::{DESIGNATION, EVENT_TYPES, ORDER, PRETTY_NAME, SIGNAL_TYPE};
    use crate::graph::server::memory::MemoryServer;
    use crate::types::Classification;
    use proptest::prelude::*;
    use std::borrow::Cow;
    use std::collections::BTreeSet;

    fn info(id: u32, name: &str, direction: Direction, kind: PortKind) -> PortInfo {
        PortInfo {
            id,
            uuid: Some(0x1000 + id as u64),
            client_uuid: None,
            name: name.to_string(),
            direction,
            kind,
        }
    }

    fn registered(id: u32) -> GraphEvent<'static> {
        GraphEvent::PortRegistration {
            id,
            registered: true,
        }
    }

    fn connection(source: u32, sink: u32, connected: bool) -> GraphEvent<'static> {
        GraphEvent::PortConnection {
            source,
            sink,
            connected,
        }
    }

    fn short_names(model: &GraphModel, keys: &[PortKey]) -> Vec<String> {
        keys.iter()
            .map(|key| model.port(*key).unwrap().short_name.clone())
            .collect()
    }

    #[test]
    fn test_add_port_is_idempotent() {
        let mut model = GraphModel::new();
        let a = model.add_port(info(1, "synth:out_l", Direction::Source, PortKind::Audio));
        let b = model.add_port(info(1, "synth:out_l", Direction::Source, PortKind::Audio));

        assert_eq!(a, b);
        assert_eq!(model.port_count(), 1);
        assert_eq!(model.client_count(), 1);

        let client = model.find_client_by_name("synth").unwrap();
        assert_eq!(model.client(client).unwrap().sources, vec![a]);
        assert_eq!(model.port(a).unwrap().client, client);
    }

    #[test]
    fn test_stale_id_is_replaced() {
        let mut model = GraphModel::new();
        let old = model.add_port(info(4, "a:x", Direction::Source, PortKind::Audio));
        let new = model.add_port(info(4, "b:y", Direction::Source, PortKind::Audio));

        assert_ne!(old, new);
        assert!(model.port(old).is_none());
        assert!(model.find_client_by_name("a").is_none());
        assert_eq!(model.find_port_by_id(4), Some(new));
    }

    #[test]
    fn test_client_pruned_with_last_port() {
        let mut model = GraphModel::new();
        let l = model.add_port(info(1, "synth:out_l", Direction::Source, PortKind::Audio));
        let r = model.add_port(info(2, "synth:out_r", Direction::Source, PortKind::Audio));

        assert!(model.remove_port(l));
        assert_eq!(model.client_count(), 1);
        assert!(model.remove_port(r));
        assert_eq!(model.client_count(), 0);

        // Removing again is a no-op
        assert!(!model.remove_port(r));
        assert!(!model.remove_port_by_id(2));
    }

    #[test]
    fn test_ports_sorted_by_order_then_name() {
        let mut model = GraphModel::new();
        let b = model.add_port(info(1, "fx:in_b", Direction::Sink, PortKind::Audio));
        model.add_port(info(2, "fx:in_a", Direction::Sink, PortKind::Audio));
        model.add_port(info(3, "fx:in_c", Direction::Sink, PortKind::Audio));

        let client = model.find_client_by_name("fx").unwrap();
        let sinks = model.client(client).unwrap().sinks.clone();
        assert_eq!(short_names(&model, &sinks), ["in_a", "in_b", "in_c"]);

        // A negative order hint moves in_b to the front
        assert!(model.set_property(0x1001, ORDER, "-1"));
        let sinks = model.client(client).unwrap().sinks.clone();
        assert_eq!(sinks[0], b);
        assert_eq!(short_names(&model, &sinks), ["in_b", "in_a", "in_c"]);

        // Deleting it restores name order
        assert!(model.delete_property(0x1001, Some(ORDER)));
        let sinks = model.client(client).unwrap().sinks.clone();
        assert_eq!(short_names(&model, &sinks), ["in_a", "in_b", "in_c"]);
    }

    #[test]
    fn test_rename_resorts_client() {
        let mut model = GraphModel::new();
        model.add_port(info(1, "fx:alpha", Direction::Sink, PortKind::Audio));
        let beta = model.add_port(info(2, "fx:beta", Direction::Sink, PortKind::Audio));

        assert!(model.rename_port("fx:beta", "fx:aardvark"));
        assert!(!model.rename_port("fx:beta", "fx:zebra"));

        let port = model.port(beta).unwrap();
        assert_eq!(port.name, "fx:aardvark");
        assert_eq!(port.short_name, "aardvark");
        assert_eq!(model.find_port_by_name("fx:aardvark"), Some(beta));
        assert_eq!(model.find_port_by_name("fx:beta"), None);

        let client = model.find_client_by_name("fx").unwrap();
        assert_eq!(model.client(client).unwrap().sinks[0], beta);
    }

    #[test]
    fn test_connect_disconnect_idempotent() {
        let mut model = GraphModel::new();
        let a = model.add_port(info(1, "synth:out", Direction::Source, PortKind::Audio));
        let b = model.add_port(info(2, "system:playback_1", Direction::Sink, PortKind::Audio));

        assert!(model.connect(a, b));
        assert!(!model.connect(a, b));
        // Reversed arguments name the same link
        assert!(!model.connect(b, a));
        assert_eq!(model.connection_count(), 1);
        assert!(model.is_connected(a, b));

        assert!(model.disconnect(a, b));
        assert!(!model.disconnect(a, b));
        assert_eq!(model.connection_count(), 0);

        // Two sources can't be linked; unknown ports are ignored
        let c = model.add_port(info(3, "synth:aux", Direction::Source, PortKind::Audio));
        assert!(!model.connect(a, c));
        assert!(!model.connect(a, PortKey(999)));
    }

    #[test]
    fn test_removing_port_drops_its_links() {
        let mut model = GraphModel::new();
        let a = model.add_port(info(1, "synth:out", Direction::Source, PortKind::Audio));
        let b = model.add_port(info(2, "system:playback_1", Direction::Sink, PortKind::Audio));
        model.connect(a, b);

        model.remove_port(b);
        assert_eq!(model.connection_count(), 0);
    }

    #[test]
    fn test_end_to_end_connect_disconnect() {
        let mut server = MemoryServer::new();
        let mut model = GraphModel::new();

        let a = server.register("synth:out", Direction::Source, PortKind::Audio);
        let b = server.register("system:playback_1", Direction::Sink, PortKind::Audio);
        model.apply(&registered(a), &server);
        model.apply(&registered(b), &server);

        server.link(a, b);
        assert!(model.apply(&connection(a, b, true), &server).changed);

        let synth = model.find_client_by_name("synth").unwrap();
        let system = model.find_client_by_name("system").unwrap();
        let conn = model.connection(synth, system).expect("client connection");
        assert_eq!(conn.ports.len(), 1);
        assert!(conn.contains(
            model.find_port_by_id(a).unwrap(),
            model.find_port_by_id(b).unwrap()
        ));
        assert_eq!(conn.kinds.classify(), Classification::Audio);

        server.unlink(a, b);
        model.apply(&connection(a, b, false), &server);
        assert!(model.connection(synth, system).is_none());
        assert_eq!(model.connection_count(), 0);
    }

    #[test]
    fn test_connection_before_registration() {
        let mut server = MemoryServer::new();
        let mut model = GraphModel::new();
        let a = server.register("synth:out", Direction::Source, PortKind::Midi);
        let b = server.register("sampler:in", Direction::Sink, PortKind::Midi);

        // Registration records were dropped; the link pulls the ports in
        model.apply(&connection(a, b, true), &server);
        assert_eq!(model.port_count(), 2);
        assert_eq!(model.connection_count(), 1);
    }

    #[test]
    fn test_client_unregistration() {
        let mut server = MemoryServer::new();
        let mut model = GraphModel::new();
        let a = server.register("synth:out", Direction::Source, PortKind::Audio);
        let b = server.register("system:playback_1", Direction::Sink, PortKind::Audio);
        model.full_resync(&server);
        model.apply(&connection(a, b, true), &server);

        let event = GraphEvent::ClientRegistration {
            name: Cow::Borrowed("synth"),
            registered: false,
        };
        assert!(model.apply(&event, &server).changed);
        assert!(model.find_client_by_name("synth").is_none());
        assert_eq!(model.port_count(), 1);
        assert_eq!(model.connection_count(), 0);

        // Replayed de-registration is a no-op
        assert!(!model.apply(&event, &server).changed);
    }

    #[test]
    fn test_signal_type_property() {
        let mut model = GraphModel::new();
        let cv = model.add_port(info(1, "seq:gate", Direction::Source, PortKind::Audio));
        let client = model.find_client_by_name("seq").unwrap();

        assert!(model.set_property(0x1001, SIGNAL_TYPE, "CV"));
        assert_eq!(model.port(cv).unwrap().kind, PortKind::Cv);
        assert!(model.client(client).unwrap().kinds.contains(PortKind::Cv));
        assert_eq!(model.client(client).unwrap().classification(), Classification::Audio);

        assert!(model.delete_property(0x1001, Some(SIGNAL_TYPE)));
        assert_eq!(model.port(cv).unwrap().kind, PortKind::Audio);
        assert!(!model.client(client).unwrap().kinds.contains(PortKind::Cv));

        // Event types don't apply to audio ports
        assert!(!model.set_property(0x1001, EVENT_TYPES, "OSC"));
    }

    #[test]
    fn test_event_types_property_updates_connection_kinds() {
        let mut model = GraphModel::new();
        let osc = model.add_port(info(1, "ctl:osc_out", Direction::Source, PortKind::Midi));
        let sink = model.add_port(info(2, "synth:events", Direction::Sink, PortKind::Midi));
        model.connect(osc, sink);

        assert!(model.set_property(0x1001, EVENT_TYPES, "MIDI, OSC"));
        assert_eq!(model.port(osc).unwrap().kind, PortKind::Osc);
        let conn = model.connections().next().unwrap();
        assert!(conn.kinds.contains(PortKind::Osc));
        assert!(!conn.kinds.contains(PortKind::Midi));
    }

    #[test]
    fn test_pretty_names_and_designation() {
        let mut model = GraphModel::new();
        let mut port = info(1, "system:playback_1", Direction::Sink, PortKind::Audio);
        port.client_uuid = Some(77);
        let key = model.add_port(port);
        let client = model.find_client_by_name("system").unwrap();

        assert!(model.set_property(77, PRETTY_NAME, "Sound card"));
        assert!(model.set_property(0x1001, PRETTY_NAME, "Left speaker"));
        assert!(model.set_property(
            0x1001,
            DESIGNATION,
            "http://lv2plug.in/ns/ext/port-groups#left"
        ));

        assert_eq!(model.client(client).unwrap().display_name(), "Sound card");
        assert_eq!(model.port(key).unwrap().display_name(), "Left speaker");
        assert_eq!(model.port(key).unwrap().designation, Designation::Left);

        // Deleting every property of the port resets it to defaults
        assert!(model.delete_property(0x1001, None));
        assert_eq!(model.port(key).unwrap().display_name(), "playback_1");
        assert_eq!(model.port(key).unwrap().designation, Designation::None);

        // Nil subject clears everything
        assert!(model.delete_property(0, None));
        assert_eq!(model.client(client).unwrap().display_name(), "system");

        // Unknown subjects and keys are not errors
        assert!(!model.set_property(12345, PRETTY_NAME, "nobody"));
        assert!(!model.delete_property(12345, Some("urn:unknown")));
    }

    #[test]
    fn test_property_change_fetches_missing_value() {
        let mut server = MemoryServer::new();
        let id = server.register("synth:out", Direction::Source, PortKind::Audio);
        server.set_property(0x1000 + id as u64, PRETTY_NAME, "Main out");

        let mut model = GraphModel::new();
        model.full_resync(&server);
        let key = model.find_port_by_id(id).unwrap();
        assert_eq!(model.port(key).unwrap().display_name(), "Main out");

        server.set_property(0x1000 + id as u64, PRETTY_NAME, "Synth out");
        let event = GraphEvent::PropertyChange {
            subject: 0x1000 + id as u64,
            key: Some(Cow::Borrowed(PRETTY_NAME)),
            value: None,
            state: PropertyState::Changed,
        };
        assert!(model.apply(&event, &server).changed);
        assert_eq!(model.port(key).unwrap().display_name(), "Synth out");
    }

    #[test]
    fn test_full_resync_seeds_connections() {
        let mut server = MemoryServer::new();
        let a = server.register("synth:out_l", Direction::Source, PortKind::Audio);
        let b = server.register("synth:out_r", Direction::Source, PortKind::Audio);
        let l = server.register("system:playback_1", Direction::Sink, PortKind::Audio);
        let r = server.register("system:playback_2", Direction::Sink, PortKind::Audio);
        server.link(a, l);
        server.link(b, r);

        let mut model = GraphModel::new();
        model.add_port(info(99, "ghost:out", Direction::Source, PortKind::Audio));
        assert_eq!(model.full_resync(&server), 4);

        assert!(model.find_client_by_name("ghost").is_none());
        assert_eq!(model.client_count(), 2);
        assert_eq!(model.connection_count(), 1);
        assert_eq!(model.connections().next().unwrap().ports.len(), 2);
    }

    #[test]
    fn test_server_status_events() {
        let server = MemoryServer::new();
        let mut model = GraphModel::new();

        model.apply(&GraphEvent::SampleRate { frames: 44100 }, &server);
        model.apply(&GraphEvent::BufferSize { frames: 256 }, &server);
        model.apply(&GraphEvent::Xrun, &server);
        model.apply(&GraphEvent::Xrun, &server);
        model.apply(&GraphEvent::Freewheel { starting: true }, &server);
        assert!(!model.apply(&GraphEvent::GraphOrder, &server).changed);

        let status = model.status();
        assert_eq!(status.sample_rate, 44100);
        assert_eq!(status.buffer_size, 256);
        assert_eq!(status.xruns, 2);
        assert!(status.freewheel);

        let applied = model.apply(
            &GraphEvent::Shutdown {
                reason: Cow::Borrowed("server exited"),
            },
            &server,
        );
        assert!(applied.quit);
        assert!(model.status().shut_down);
    }

    #[test]
    fn test_session_events() {
        let server = MemoryServer::new();
        let mut model = GraphModel::new();

        let save = model.apply(
            &GraphEvent::Session {
                command: SessionCommand::Save,
            },
            &server,
        );
        assert_eq!(save.session, Some(SessionCommand::Save));
        assert!(!save.quit);

        let quit = model.apply(
            &GraphEvent::Session {
                command: SessionCommand::SaveAndQuit,
            },
            &server,
        );
        assert!(quit.quit);
    }

    #[test]
    fn test_requests_go_through_server() {
        let mut server = MemoryServer::new();
        let a = server.register("synth:out", Direction::Source, PortKind::Audio);
        server.register("system:playback_1", Direction::Sink, PortKind::Audio);

        let mut model = GraphModel::new();
        model.full_resync(&server);
        let source = model.find_port_by_id(a).unwrap();
        let sink = model.find_port_by_name("system:playback_1").unwrap();

        model.request_connect(&server, source, sink).unwrap();
        model.request_disconnect(&server, source, sink).unwrap();
        assert!(model.request_connect(&server, source, PortKey(999)).is_err());

        assert_eq!(
            *server.requests.borrow(),
            vec![
                ("synth:out".to_string(), "system:playback_1".to_string(), true),
                ("synth:out".to_string(), "system:playback_1".to_string(), false),
            ]
        );
        // Requests alone don't touch the model
        assert_eq!(model.connection_count(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Replay convergence
    // ─────────────────────────────────────────────────────────────────────

    /// Six port slots over three clients: even slots are sources
    const SLOTS: u8 = 6;

    #[derive(Debug, Clone)]
    enum Op {
        Register(u8),
        Unregister(u8),
        Link(u8, u8),
        Unlink(u8, u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let source = (0..SLOTS / 2).prop_map(|s| s * 2);
        let sink = (0..SLOTS / 2).prop_map(|s| s * 2 + 1);
        prop_oneof![
            (0..SLOTS).prop_map(Op::Register),
            (0..SLOTS).prop_map(Op::Unregister),
            (source.clone(), sink.clone()).prop_map(|(a, b)| Op::Link(a, b)),
            (source, sink).prop_map(|(a, b)| Op::Unlink(a, b)),
        ]
    }

    type Snapshot = (BTreeSet<String>, BTreeSet<String>, BTreeSet<(String, String)>);

    fn snapshot(model: &GraphModel) -> Snapshot {
        let ports = model.ports().map(|port| port.name.clone()).collect();
        let clients = model.clients().map(|client| client.name.clone()).collect();
        let links = model
            .connections()
            .flat_map(|conn| conn.ports.iter())
            .map(|(source, sink)| {
                (
                    model.port(*source).unwrap().name.clone(),
                    model.port(*sink).unwrap().name.clone(),
                )
            })
            .collect();
        (ports, clients, links)
    }

    proptest! {
        /// Replaying each notification (possibly twice) converges on the
        /// same model a fresh resync of the final server state produces.
        #[test]
        fn replay_converges_on_server_state(
            ops in prop::collection::vec(op_strategy(), 1..40),
            duplicate in any::<bool>(),
        ) {
            let mut server = MemoryServer::new();
            let mut model = GraphModel::new();
            let mut ids: [Option<u32>; SLOTS as usize] = [None; SLOTS as usize];

            for op in ops {
                let events = match op {
                    Op::Register(slot) if ids[slot as usize].is_none() => {
                        let direction = if slot % 2 == 0 { Direction::Source } else { Direction::Sink };
                        let name = format!("client{}:port{}", slot / 2, slot);
                        let id = server.register(&name, direction, PortKind::Audio);
                        ids[slot as usize] = Some(id);
                        vec![registered(id)]
                    }
                    Op::Unregister(slot) => match ids[slot as usize].take() {
                        Some(id) => {
                            server.unregister(id);
                            vec![GraphEvent::PortRegistration { id, registered: false }]
                        }
                        None => vec![],
                    },
                    Op::Link(a, b) => match (ids[a as usize], ids[b as usize]) {
                        (Some(a), Some(b)) => {
                            server.link(a, b);
                            vec![connection(a, b, true)]
                        }
                        _ => vec![],
                    },
                    Op::Unlink(a, b) => match (ids[a as usize], ids[b as usize]) {
                        (Some(a), Some(b)) => {
                            server.unlink(a, b);
                            vec![connection(a, b, false)]
                        }
                        _ => vec![],
                    },
                    Op::Register(_) => vec![],
                };
                for event in &events {
                    model.apply(event, &server);
                    if duplicate {
                        model.apply(event, &server);
                    }
                }
            }

            let mut fresh = GraphModel::new();
            fresh.full_resync(&server);
            prop_assert_eq!(snapshot(&model), snapshot(&fresh));
        }
    }
}
