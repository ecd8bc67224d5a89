//! Session descriptors for mixer and monitor nodes
//!
//! The only node state that survives a session: port type, channel counts
//! and (for mixers) the gain matrix. The surrounding session format belongs
//! to the session manager; this is just the per-node JSON object:
//!
//! ```json
//! { "type": "audio", "nsources": 2, "nsinks": 2, "gains": [[0, -2147483648], [-2147483648, 0]] }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::AudioResult;
use crate::types::{PortKind, PORT_MAX};

/// Persisted parameters of one mixer or monitor node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDescriptor {
    /// Client name on the server (generated when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Signal kind of every port of the node
    #[serde(rename = "type")]
    pub kind: PortKind,

    /// Mixer inputs (unused by monitors)
    #[serde(rename = "nsources")]
    pub sources: usize,

    /// Mixer outputs, or metered channels of a monitor
    #[serde(rename = "nsinks")]
    pub sinks: usize,

    /// Mixer gains, one row per output, hundredths of a dB
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gains: Vec<Vec<i32>>,
}

impl Default for NodeDescriptor {
    fn default() -> Self {
        Self {
            name: None,
            kind: PortKind::Audio,
            sources: 1,
            sinks: 1,
            gains: Vec::new(),
        }
    }
}

impl NodeDescriptor {
    pub fn mixer(kind: PortKind, sources: usize, sinks: usize) -> Self {
        Self {
            kind,
            sources,
            sinks,
            ..Default::default()
        }
        .clamped()
    }

    pub fn monitor(kind: PortKind, channels: usize) -> Self {
        Self {
            kind,
            sources: 0,
            sinks: channels,
            ..Default::default()
        }
        .clamped()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Clamp channel counts (and the gain block) to PORT_MAX
    pub fn clamped(mut self) -> Self {
        if self.sources > PORT_MAX || self.sinks > PORT_MAX {
            log::warn!(
                "Node asks for {}x{} channels, clamping to {}",
                self.sources,
                self.sinks,
                PORT_MAX
            );
        }
        self.sources = self.sources.min(PORT_MAX);
        self.sinks = self.sinks.min(PORT_MAX);
        self.gains.truncate(self.sinks);
        for row in &mut self.gains {
            row.truncate(self.sources);
        }
        self
    }

    pub fn to_json(&self) -> AudioResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a descriptor; missing fields take defaults, counts are clamped
    pub fn from_json(text: &str) -> AudioResult<Self> {
        let descriptor: NodeDescriptor = serde_json::from_str(text)?;
        Ok(descriptor.clamped())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("Failed to parse session file: {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create session directory: {:?}", parent))?;
        }
        let text = self.to_json().context("Failed to serialize session")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write session file: {:?}", path))?;
        log::info!("Saved node session to {:?}", path);
        Ok(())
    }
}
