//! Common types for patchmesh
//!
//! Port/signal classification shared by the graph model, the real-time
//! kernels and the session descriptors, plus the fixed-point gain and level
//! conventions used by every atomic that crosses a thread boundary.

use serde::{Deserialize, Serialize};

/// Maximum number of ports on a mixer or monitor node (per direction)
pub const PORT_MAX: usize = 32;

/// Default sample rate, used until the server reports its own
pub const SAMPLE_RATE: u32 = 48000;

/// Gain cell value meaning "source is not mixed into this sink"
pub const GAIN_NOT_MIXED: i32 = i32::MIN;

/// Gains at or below this value (hundredths of a dB, i.e. -36 dB) are not mixed
pub const GAIN_MIX_FLOOR: i32 = -3600;

/// Unity gain (0 dB)
pub const GAIN_UNITY: i32 = 0;

/// Lowest displayed audio level in dB (silence)
pub const LEVEL_FLOOR_DB: f32 = -64.0;

/// Headroom added to dBFS so a full-scale sine reads about 0 dB
pub const LEVEL_HEADROOM_DB: f32 = 6.0;

/// Time for a held level to fall from the top of the scale to the floor
pub const LEVEL_DECAY_SECONDS: f32 = 0.5;

/// Highest MIDI velocity
pub const VELOCITY_MAX: f32 = 127.0;

/// Convert a fixed-point gain (hundredths of a dB) to a linear factor
///
/// Returns `None` when the cell means "not mixed".
#[inline]
pub fn gain_to_linear(centi_db: i32) -> Option<f32> {
    if centi_db <= GAIN_MIX_FLOOR {
        None
    } else if centi_db == GAIN_UNITY {
        Some(1.0)
    } else {
        Some(10.0_f32.powf(centi_db as f32 / 2000.0))
    }
}

/// Convert a gain in dB to the fixed-point representation
#[inline]
pub fn gain_from_db(db: f32) -> i32 {
    if db.is_finite() {
        (db * 100.0).round() as i32
    } else {
        GAIN_NOT_MIXED
    }
}

/// Signal kind carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    #[default]
    Audio,
    Midi,
    /// OSC tunneled through MIDI event ports
    Osc,
    /// Control voltage carried on audio ports
    Cv,
}

impl PortKind {
    /// Stable lowercase name, as used in session descriptors
    pub fn as_str(&self) -> &'static str {
        match self {
            PortKind::Audio => "audio",
            PortKind::Midi => "midi",
            PortKind::Osc => "osc",
            PortKind::Cv => "cv",
        }
    }

    /// Parse a lowercase name; unknown names fall back to audio
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "midi" => PortKind::Midi,
            "osc" => PortKind::Osc,
            "cv" => PortKind::Cv,
            _ => PortKind::Audio,
        }
    }

    /// Classify a server port type string
    ///
    /// JACK reports "32 bit float mono audio" and "8 bit raw midi".
    pub fn from_port_type(port_type: &str) -> Self {
        if port_type.contains("midi") {
            PortKind::Midi
        } else {
            PortKind::Audio
        }
    }

    /// Whether ports of this kind carry sample buffers (audio and CV)
    pub fn is_sampled(&self) -> bool {
        matches!(self, PortKind::Audio | PortKind::Cv)
    }

    fn bit(&self) -> u8 {
        match self {
            PortKind::Audio => 0b0001,
            PortKind::Midi => 0b0010,
            PortKind::Osc => 0b0100,
            PortKind::Cv => 0b1000,
        }
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of port kinds, used for the derived client/connection classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u8);

impl KindSet {
    pub const EMPTY: KindSet = KindSet(0);

    pub fn insert(&mut self, kind: PortKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(&self, kind: PortKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: KindSet) -> KindSet {
        KindSet(self.0 | other.0)
    }

    /// Collapse the set into the audio/MIDI/mixed classification
    pub fn classify(&self) -> Classification {
        let sampled = self.contains(PortKind::Audio) || self.contains(PortKind::Cv);
        let events = self.contains(PortKind::Midi) || self.contains(PortKind::Osc);
        match (sampled, events) {
            (false, false) => Classification::None,
            (true, false) => Classification::Audio,
            (false, true) => Classification::Midi,
            (true, true) => Classification::Mixed,
        }
    }
}

impl FromIterator<PortKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = PortKind>>(iter: I) -> Self {
        let mut set = KindSet::EMPTY;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// Derived classification of a client or client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    None,
    Audio,
    Midi,
    Mixed,
}

/// Port direction as seen from the graph
///
/// A source produces signal (a server output port), a sink consumes it
/// (a server input port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Source,
    Sink,
}

/// Channel designation tag (LV2 port groups)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Designation {
    #[default]
    None,
    Left,
    Right,
    Center,
    Side,
    CenterLeft,
    CenterRight,
    SideLeft,
    SideRight,
    RearLeft,
    RearRight,
    RearCenter,
    LowFrequencyEffects,
}

const PORT_GROUPS: &str = "http://lv2plug.in/ns/ext/port-groups#";

impl Designation {
    const TAGGED: [(Designation, &'static str); 12] = [
        (Designation::Left, "left"),
        (Designation::Right, "right"),
        (Designation::Center, "center"),
        (Designation::Side, "side"),
        (Designation::CenterLeft, "centerLeft"),
        (Designation::CenterRight, "centerRight"),
        (Designation::SideLeft, "sideLeft"),
        (Designation::SideRight, "sideRight"),
        (Designation::RearLeft, "rearLeft"),
        (Designation::RearRight, "rearRight"),
        (Designation::RearCenter, "rearCenter"),
        (Designation::LowFrequencyEffects, "lowFrequencyEffects"),
    ];

    /// Parse a port-group URI; anything unrecognized is `None`
    pub fn from_uri(uri: &str) -> Self {
        uri.strip_prefix(PORT_GROUPS)
            .and_then(|local| {
                Self::TAGGED
                    .iter()
                    .find(|(_, name)| *name == local)
                    .map(|(designation, _)| *designation)
            })
            .unwrap_or(Designation::None)
    }

    /// Full port-group URI, if any
    pub fn uri(&self) -> Option<String> {
        Self::TAGGED
            .iter()
            .find(|(designation, _)| designation == self)
            .map(|(_, name)| format!("{}{}", PORT_GROUPS, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_conversion() {
        assert_eq!(gain_to_linear(GAIN_NOT_MIXED), None);
        assert_eq!(gain_to_linear(GAIN_MIX_FLOOR), None);
        assert_eq!(gain_to_linear(0), Some(1.0));

        let half = gain_to_linear(-602).unwrap();
        assert!((half - 0.5).abs() < 0.001);

        let double = gain_to_linear(602).unwrap();
        assert!((double - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_gain_from_db() {
        assert_eq!(gain_from_db(-6.02), -602);
        assert_eq!(gain_from_db(0.0), 0);
        assert_eq!(gain_from_db(f32::NEG_INFINITY), GAIN_NOT_MIXED);
    }

    #[test]
    fn test_port_kind_names() {
        for kind in [PortKind::Audio, PortKind::Midi, PortKind::Osc, PortKind::Cv] {
            assert_eq!(PortKind::from_name(kind.as_str()), kind);
        }
        assert_eq!(PortKind::from_name("bogus"), PortKind::Audio);
        assert_eq!(PortKind::from_port_type("8 bit raw midi"), PortKind::Midi);
        assert_eq!(PortKind::from_port_type("32 bit float mono audio"), PortKind::Audio);
    }

    #[test]
    fn test_kind_set_classification() {
        assert_eq!(KindSet::EMPTY.classify(), Classification::None);

        let audio: KindSet = [PortKind::Audio, PortKind::Cv].into_iter().collect();
        assert_eq!(audio.classify(), Classification::Audio);

        let midi: KindSet = [PortKind::Osc].into_iter().collect();
        assert_eq!(midi.classify(), Classification::Midi);

        assert_eq!(audio.union(midi).classify(), Classification::Mixed);
    }

    #[test]
    fn test_designation_uri() {
        let uri = Designation::RearLeft.uri().unwrap();
        assert_eq!(Designation::from_uri(&uri), Designation::RearLeft);
        assert_eq!(Designation::from_uri("urn:nothing"), Designation::None);
        assert_eq!(Designation::None.uri(), None);
    }
}
