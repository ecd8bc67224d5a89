//! Metadata property keys understood by the graph model

/// Human-readable name of a client or port
pub const PRETTY_NAME: &str = "http://jackaudio.org/metadata/pretty-name";
/// "CV" on audio ports carrying control voltage
pub const SIGNAL_TYPE: &str = "http://jackaudio.org/metadata/signal-type";
/// Event encoding of a MIDI port ("OSC" for OSC-over-MIDI)
pub const EVENT_TYPES: &str = "http://jackaudio.org/metadata/event-types";
/// Integer sort hint
pub const ORDER: &str = "http://jackaudio.org/metadata/order";
/// LV2 port-group channel designation
pub const DESIGNATION: &str = "http://lv2plug.in/ns/lv2core#designation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKey {
    PrettyName,
    SignalType,
    EventTypes,
    Order,
    Designation,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 5] = [
        PropertyKey::PrettyName,
        PropertyKey::SignalType,
        PropertyKey::EventTypes,
        PropertyKey::Order,
        PropertyKey::Designation,
    ];

    pub fn from_uri(key: &str) -> Option<Self> {
        match key {
            PRETTY_NAME => Some(PropertyKey::PrettyName),
            SIGNAL_TYPE => Some(PropertyKey::SignalType),
            EVENT_TYPES => Some(PropertyKey::EventTypes),
            ORDER => Some(PropertyKey::Order),
            DESIGNATION => Some(PropertyKey::Designation),
            _ => None,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            PropertyKey::PrettyName => PRETTY_NAME,
            PropertyKey::SignalType => SIGNAL_TYPE,
            PropertyKey::EventTypes => EVENT_TYPES,
            PropertyKey::Order => ORDER,
            PropertyKey::Designation => DESIGNATION,
        }
    }
}

/// Parse an order hint; anything unparsable sorts as 0
pub fn parse_order(value: &str) -> i32 {
    value.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_keys() {
        for key in PropertyKey::ALL {
            assert_eq!(PropertyKey::from_uri(key.uri()), Some(key));
        }
        assert_eq!(PropertyKey::from_uri("urn:example:color"), None);
    }

    #[test]
    fn test_parse_order() {
        assert_eq!(parse_order(" 3 "), 3);
        assert_eq!(parse_order("-1"), -1);
        assert_eq!(parse_order("first"), 0);
    }
}
