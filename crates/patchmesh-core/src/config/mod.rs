//! Configuration for the patch-bay and monitor processes
//!
//! Both processes read a YAML file (see [`load_config`]); every field has a
//! default so a partial file, or none at all, works.
//!
//! ```yaml
//! client_name: patchmesh
//! poll_interval_ms: 40
//! mixers:
//!   - name: Bus A
//!     type: audio
//!     nsources: 4
//!     nsinks: 2
//! monitors:
//!   - type: midi
//!     nsinks: 2
//! ```

mod io;
mod paths;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use io::{load_config, read_config, save_config};
pub use paths::{config_dir, default_config_path};

use crate::event::EVENT_CHANNEL_CAPACITY;
use crate::session::NodeDescriptor;
use crate::types::{PortKind, PORT_MAX};

/// Default config file of the patch-bay process
pub const PATCHBAY_CONFIG_FILE: &str = "patchbay.yaml";

/// Default config file of the monitor process
pub const MONITOR_CONFIG_FILE: &str = "monitor.yaml";

/// Patch-bay process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Name of the patch-bay client on the server
    pub client_name: String,
    /// Server to connect to (`None` = default server)
    pub server_name: Option<String>,
    /// Event channel size in bytes
    pub event_capacity: usize,
    /// Control loop poll interval
    pub poll_interval_ms: u64,
    /// Mixer nodes hosted by the patch bay
    pub mixers: Vec<NodeDescriptor>,
    /// In-process monitor nodes hosted by the patch bay
    pub monitors: Vec<NodeDescriptor>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            client_name: "patchmesh".to_string(),
            server_name: None,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            poll_interval_ms: 40,
            mixers: Vec::new(),
            monitors: Vec::new(),
        }
    }
}

impl PatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Out-of-process monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name of the monitor client; also names the shared segment
    pub client_name: String,
    pub server_name: Option<String>,
    /// Signal kind of the metered ports
    pub kind: PortKind,
    /// Number of metered channels (clamped to PORT_MAX)
    pub channels: usize,
    /// Timed wait on the shutdown semaphore
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            client_name: "patchmesh-monitor".to_string(),
            server_name: None,
            kind: PortKind::Audio,
            channels: 2,
            poll_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn channels(&self) -> usize {
        self.channels.min(PORT_MAX)
    }

    /// Node descriptor of the monitor this config describes
    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::monitor(self.kind, self.channels).with_name(self.client_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_patch_config() {
        let yaml = r#"
client_name: studio
mixers:
  - name: Bus A
    type: audio
    nsources: 4
    nsinks: 2
monitors:
  - type: midi
    nsinks: 3
"#;
        let config: PatchConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.client_name, "studio");
        assert_eq!(config.event_capacity, EVENT_CHANNEL_CAPACITY);
        assert_eq!(config.poll_interval(), Duration::from_millis(40));
        assert_eq!(config.mixers[0].name.as_deref(), Some("Bus A"));
        assert_eq!(config.mixers[0].sources, 4);
        assert_eq!(config.monitors[0].kind, PortKind::Midi);
        assert_eq!(config.monitors[0].sinks, 3);
    }

    #[test]
    fn test_monitor_config_clamps_channels() {
        let config = MonitorConfig {
            channels: 99,
            ..Default::default()
        };
        assert_eq!(config.channels(), PORT_MAX);

        let descriptor = config.descriptor();
        assert_eq!(descriptor.sinks, PORT_MAX);
        assert_eq!(descriptor.name.as_deref(), Some("patchmesh-monitor"));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MONITOR_CONFIG_FILE);
        let config = MonitorConfig {
            kind: PortKind::Midi,
            channels: 4,
            ..Default::default()
        };

        save_config(&config, &path).unwrap();
        assert_eq!(load_config::<MonitorConfig>(&path), config);
    }
}
