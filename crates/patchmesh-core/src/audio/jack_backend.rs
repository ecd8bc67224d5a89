//! JACK patch-bay client
//!
//! Opens the patch-bay client, forwards every graph notification into the
//! event channel, and exposes the server to the graph model through
//! [`JackServer`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                     ┌─────────────────────┐
//! │ JACK notify thr. │───push()───────────►│   Event Channel     │
//! │ (never blocks)   │                     │  (lock-free SPSC)   │
//! └──────────────────┘                     └──────────┬──────────┘
//! ┌──────────────────┐                                │ pop()
//! │ JACK RT thread   │──buffer size──┐                ▼
//! └──────────────────┘    (atomic)   │     ┌─────────────────────┐
//!                                    └────►│   Control Loop      │
//!                                          │ (owns GraphModel)   │
//!                                          └─────────────────────┘
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use jack::{Client, ClientOptions, Control, PortFlags, ProcessScope, Unowned};

use super::error::{AudioError, AudioResult};
use crate::config::PatchConfig;
use crate::control::{ControlLoop, DrainStats, GraphObserver, PendingBufferSize};
use crate::engine::{MidiEvent, MidiSink};
use crate::event::{event_channel, EventWriter, GraphEvent};
use crate::graph::{GraphModel, GraphServer, PortInfo, PortKey};
use crate::types::{Direction, PortKind};

/// Highest port id probed when mapping port names to ids
const PORT_ID_SCAN_LIMIT: u32 = 4096;

impl<'a> From<jack::RawMidi<'a>> for MidiEvent<'a> {
    #[inline]
    fn from(raw: jack::RawMidi<'a>) -> Self {
        MidiEvent::new(raw.time, raw.bytes)
    }
}

impl MidiSink for jack::MidiWriter<'_> {
    #[inline]
    fn write(&mut self, event: MidiEvent<'_>) -> bool {
        jack::MidiWriter::write(
            self,
            &jack::RawMidi {
                time: event.time,
                bytes: event.bytes,
            },
        )
        .is_ok()
    }
}

/// Open a client without starting a server
///
/// JACK picks the server from `JACK_DEFAULT_SERVER`, so a configured server
/// name is exported there first.
pub(super) fn open_client(name: &str, server_name: Option<&str>) -> AudioResult<Client> {
    if let Some(server) = server_name {
        std::env::set_var("JACK_DEFAULT_SERVER", server);
    }

    let (client, _status) = Client::new(name, ClientOptions::NO_START_SERVER)
        .map_err(|e| AudioError::ServerUnavailable(format!("{}: {}", name, e)))?;

    log::info!(
        "JACK client '{}' opened (sample rate: {}Hz, buffer: {} frames)",
        client.name(),
        client.sample_rate(),
        client.buffer_size()
    );
    Ok(client)
}

/// Describe an unowned port, or `None` if the slot is unused
fn port_info(port: &jack::Port<Unowned>, id: u32) -> Option<PortInfo> {
    let name = port.name().ok().filter(|name| !name.is_empty())?;
    let direction = if port.flags().contains(PortFlags::IS_OUTPUT) {
        Direction::Source
    } else {
        Direction::Sink
    };
    let kind = PortKind::from_port_type(&port.port_type().ok()?);

    Some(PortInfo {
        id,
        uuid: None,
        client_uuid: None,
        name,
        direction,
        kind,
    })
}

/// Port name → server id table
///
/// The JACK API resolves ports by name without telling the id that
/// notifications use, so the table is filled from id lookups and rebuilt by
/// probing ids whenever a name is missing.
#[derive(Debug, Default)]
struct PortIds(RefCell<HashMap<String, u32>>);

/// Graph query/control API backed by a JACK client
pub struct JackServer<'a> {
    client: &'a Client,
    ids: &'a PortIds,
}

impl JackServer<'_> {
    /// Rebuild the id table until every name in `names` is mapped
    fn rescan(&self, names: &[String]) {
        let mut wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut ids = self.ids.0.borrow_mut();
        ids.clear();

        for id in 0..PORT_ID_SCAN_LIMIT {
            if wanted.is_empty() {
                break;
            }
            match self.client.port_by_id(id) {
                Some(port) => {
                    if let Ok(name) = port.name() {
                        wanted.remove(name.as_str());
                        ids.insert(name, id);
                    }
                }
                // Id 0 is reserved on some servers; past that, None ends the table
                None if id > 0 => break,
                None => {}
            }
        }

        if !wanted.is_empty() {
            log::debug!("{} ports vanished while mapping ids", wanted.len());
        }
    }

    fn id_of(&self, name: &str) -> Option<u32> {
        let cached = self.ids.0.borrow().get(name).copied();
        cached.or_else(|| {
            self.rescan(&[name.to_string()]);
            self.ids.0.borrow().get(name).copied()
        })
    }
}

impl GraphServer for JackServer<'_> {
    fn port_by_id(&self, id: u32) -> Option<PortInfo> {
        let info = port_info(&self.client.port_by_id(id)?, id)?;
        self.ids.0.borrow_mut().insert(info.name.clone(), id);
        Some(info)
    }

    fn port_by_name(&self, name: &str) -> Option<PortInfo> {
        let port = self.client.port_by_name(name)?;
        port_info(&port, self.id_of(name)?)
    }

    fn port_names(&self) -> Vec<String> {
        let names = self.client.ports(None, None, PortFlags::empty());
        self.rescan(&names);
        names
    }

    fn connections(&self, port_name: &str) -> Vec<String> {
        self.client
            .port_by_name(port_name)
            .map(|port| port.get_connections())
            .unwrap_or_default()
    }

    fn connect(&self, source: &str, sink: &str) -> AudioResult<()> {
        self.client
            .connect_ports_by_name(source, sink)
            .map_err(|e| AudioError::Connection {
                action: "connect",
                source_port: source.to_string(),
                sink_port: sink.to_string(),
                reason: e.to_string(),
            })
    }

    fn disconnect(&self, source: &str, sink: &str) -> AudioResult<()> {
        self.client
            .disconnect_ports_by_name(source, sink)
            .map_err(|e| AudioError::Connection {
                action: "disconnect",
                source_port: source.to_string(),
                sink_port: sink.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Notification handler: encodes every callback into the event channel
///
/// Runs on JACK's notification thread. A full channel drops the record;
/// the control loop notices the drop count and resyncs.
struct GraphNotifications {
    // Only reached through `get_mut`, never locked
    writer: Mutex<EventWriter>,
}

impl GraphNotifications {
    fn new(writer: EventWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[inline]
    fn push(&mut self, event: GraphEvent<'_>) {
        if let Ok(writer) = self.writer.get_mut() {
            writer.push(&event);
        }
    }
}

impl jack::NotificationHandler for GraphNotifications {
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, reason: &str) {
        self.push(GraphEvent::Shutdown {
            reason: reason.into(),
        });
    }

    fn freewheel(&mut self, _client: &Client, is_freewheel_enabled: bool) {
        self.push(GraphEvent::Freewheel {
            starting: is_freewheel_enabled,
        });
    }

    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        self.push(GraphEvent::SampleRate { frames: srate });
        Control::Continue
    }

    fn client_registration(&mut self, _client: &Client, name: &str, is_registered: bool) {
        self.push(GraphEvent::ClientRegistration {
            name: name.into(),
            registered: is_registered,
        });
    }

    fn port_registration(&mut self, _client: &Client, port_id: jack::PortId, is_registered: bool) {
        self.push(GraphEvent::PortRegistration {
            id: port_id,
            registered: is_registered,
        });
    }

    fn port_rename(
        &mut self,
        _client: &Client,
        port_id: jack::PortId,
        old_name: &str,
        new_name: &str,
    ) -> Control {
        self.push(GraphEvent::PortRename {
            id: port_id,
            old_name: old_name.into(),
            new_name: new_name.into(),
        });
        Control::Continue
    }

    fn ports_connected(
        &mut self,
        _client: &Client,
        port_id_a: jack::PortId,
        port_id_b: jack::PortId,
        are_connected: bool,
    ) {
        self.push(GraphEvent::PortConnection {
            source: port_id_a,
            sink: port_id_b,
            connected: are_connected,
        });
    }

    fn graph_reorder(&mut self, _client: &Client) -> Control {
        self.push(GraphEvent::GraphOrder);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        self.push(GraphEvent::Xrun);
        Control::Continue
    }
}

/// Process handler of the patch bay: no ports, only buffer-size changes
struct BufferSizeWatch {
    pending: Arc<PendingBufferSize>,
}

impl jack::ProcessHandler for BufferSizeWatch {
    fn process(&mut self, _client: &Client, _ps: &ProcessScope) -> Control {
        Control::Continue
    }

    fn buffer_size(&mut self, _client: &Client, size: jack::Frames) -> Control {
        self.pending.post(size);
        Control::Continue
    }
}

/// Running patch-bay client
///
/// Drop (or [`close`](Self::close)) to leave the server.
pub struct PatchbayHandle {
    client: jack::AsyncClient<GraphNotifications, BufferSizeWatch>,
    control: ControlLoop,
    ids: PortIds,
    poll: std::time::Duration,
}

impl PatchbayHandle {
    /// Name the server gave the client
    pub fn client_name(&self) -> &str {
        self.client.as_client().name()
    }

    /// Query/control view of the server for the graph model
    pub fn server(&self) -> JackServer<'_> {
        JackServer {
            client: self.client.as_client(),
            ids: &self.ids,
        }
    }

    pub fn model(&self) -> &GraphModel {
        self.control.model()
    }

    /// Flag that stops [`run`](Self::run)
    pub fn done_flag(&self) -> Arc<AtomicBool> {
        self.control.done_flag()
    }

    /// Seed the model from the server
    pub fn resync(&mut self, observer: &mut dyn GraphObserver) {
        let server = JackServer {
            client: self.client.as_client(),
            ids: &self.ids,
        };
        self.control.resync(&server, observer);
    }

    /// Apply every pending notification
    pub fn drain(&mut self, observer: &mut dyn GraphObserver) -> DrainStats {
        let server = JackServer {
            client: self.client.as_client(),
            ids: &self.ids,
        };
        self.control.drain(&server, observer)
    }

    /// Drain until the done flag is set or the server goes away
    pub fn run(&mut self, observer: &mut dyn GraphObserver) {
        let server = JackServer {
            client: self.client.as_client(),
            ids: &self.ids,
        };
        self.control.run(&server, observer, self.poll);
    }

    /// Ask the server to link two ports of the model
    pub fn request_connect(&self, source: PortKey, sink: PortKey) -> AudioResult<()> {
        self.model().request_connect(&self.server(), source, sink)
    }

    /// Ask the server to unlink two ports of the model
    pub fn request_disconnect(&self, source: PortKey, sink: PortKey) -> AudioResult<()> {
        self.model().request_disconnect(&self.server(), source, sink)
    }

    /// Deactivate and close the client
    pub fn close(self) -> AudioResult<()> {
        let name = self.client_name().to_string();
        self.client
            .deactivate()
            .map_err(|e| AudioError::Activation(name.clone(), e.to_string()))?;
        log::info!("JACK client '{}' closed", name);
        Ok(())
    }
}

/// Open the patch-bay client and start forwarding notifications
///
/// The returned handle owns the control loop; call
/// [`resync`](PatchbayHandle::resync) once, then
/// [`run`](PatchbayHandle::run) on the control thread.
pub fn start_patchbay(config: &PatchConfig) -> AudioResult<PatchbayHandle> {
    let client = open_client(&config.client_name, config.server_name.as_deref())?;
    let name = client.name().to_string();

    let (writer, reader) = event_channel(config.event_capacity);
    let pending = Arc::new(PendingBufferSize::new());
    let control = ControlLoop::new(
        reader,
        Arc::new(AtomicBool::new(false)),
        Arc::clone(&pending),
    );

    let client = client
        .activate_async(GraphNotifications::new(writer), BufferSizeWatch { pending })
        .map_err(|e| AudioError::Activation(name.clone(), e.to_string()))?;

    log::info!("Patch bay '{}' activated", name);

    Ok(PatchbayHandle {
        client,
        control,
        ids: PortIds::default(),
        poll: config.poll_interval(),
    })
}
