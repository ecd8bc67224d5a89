//! Graph query/control API consumed by the model

use super::entities::PortInfo;
use crate::audio::AudioResult;

/// What the graph model needs from the audio server
///
/// Query methods may block (they talk to the server), so they are only
/// called from the control thread.
pub trait GraphServer {
    /// Resolve a server port id
    fn port_by_id(&self, id: u32) -> Option<PortInfo>;

    /// Resolve a fully-qualified port name
    fn port_by_name(&self, name: &str) -> Option<PortInfo>;

    /// Names of every port currently registered
    fn port_names(&self) -> Vec<String>;

    /// Names of the ports connected to `port_name`
    fn connections(&self, port_name: &str) -> Vec<String>;

    /// Look up a metadata property of a subject UUID
    fn property(&self, _subject: u64, _key: &str) -> Option<String> {
        None
    }

    /// Ask the server to link two ports
    fn connect(&self, source: &str, sink: &str) -> AudioResult<()>;

    /// Ask the server to unlink two ports
    fn disconnect(&self, source: &str, sink: &str) -> AudioResult<()>;
}
