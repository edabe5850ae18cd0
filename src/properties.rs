//! Transport property maps (C2).

use std::collections::HashMap;

/// Preference level for a Selection Property (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Require,
    Prefer,
    Ignore,
    Avoid,
    Prohibit,
}

/// Well-known property keys understood by the candidate selector. Unknown
/// string keys passed to [`TransportProperties::add`] are stored but have no
/// effect on selection (§4.1: "Ignore / unknown key: no effect").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Reliability,
    PreserveMsgBoundaries,
    PerMsgReliability,
    PreserveOrder,
    ZeroRttMsg,
    Multistreaming,
    PerMsgChecksumLenSend,
    PerMsgChecksumLenRecv,
    CongestionControl,
    Multipath,
    RetransmitNotify,
    SoftErrorNotify,
}

impl PropertyKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKey::Reliability => "reliability",
            PropertyKey::PreserveMsgBoundaries => "preserve-msg-boundaries",
            PropertyKey::PerMsgReliability => "per-msg-reliability",
            PropertyKey::PreserveOrder => "preserve-order",
            PropertyKey::ZeroRttMsg => "zero-rtt-msg",
            PropertyKey::Multistreaming => "multistreaming",
            PropertyKey::PerMsgChecksumLenSend => "per-msg-checksum-len-send",
            PropertyKey::PerMsgChecksumLenRecv => "per-msg-checksum-len-recv",
            PropertyKey::CongestionControl => "congestion-control",
            PropertyKey::Multipath => "multipath",
            PropertyKey::RetransmitNotify => "retransmit-notify",
            PropertyKey::SoftErrorNotify => "soft-error-notify",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "reliability" => PropertyKey::Reliability,
            "preserve-msg-boundaries" => PropertyKey::PreserveMsgBoundaries,
            "per-msg-reliability" => PropertyKey::PerMsgReliability,
            "preserve-order" => PropertyKey::PreserveOrder,
            "zero-rtt-msg" => PropertyKey::ZeroRttMsg,
            "multistreaming" => PropertyKey::Multistreaming,
            "per-msg-checksum-len-send" => PropertyKey::PerMsgChecksumLenSend,
            "per-msg-checksum-len-recv" => PropertyKey::PerMsgChecksumLenRecv,
            "congestion-control" => PropertyKey::CongestionControl,
            "multipath" => PropertyKey::Multipath,
            "retransmit-notify" => PropertyKey::RetransmitNotify,
            "soft-error-notify" => PropertyKey::SoftErrorNotify,
            _ => return None,
        })
    }

    fn default_preference(&self) -> Preference {
        match self {
            PropertyKey::Reliability | PropertyKey::PreserveOrder | PropertyKey::CongestionControl => {
                Preference::Require
            }
            PropertyKey::PreserveMsgBoundaries
            | PropertyKey::ZeroRttMsg
            | PropertyKey::Multistreaming
            | PropertyKey::Multipath => Preference::Prefer,
            _ => Preference::Ignore,
        }
    }

    const ALL: [PropertyKey; 12] = [
        PropertyKey::Reliability,
        PropertyKey::PreserveMsgBoundaries,
        PropertyKey::PerMsgReliability,
        PropertyKey::PreserveOrder,
        PropertyKey::ZeroRttMsg,
        PropertyKey::Multistreaming,
        PropertyKey::PerMsgChecksumLenSend,
        PropertyKey::PerMsgChecksumLenRecv,
        PropertyKey::CongestionControl,
        PropertyKey::Multipath,
        PropertyKey::RetransmitNotify,
        PropertyKey::SoftErrorNotify,
    ];
}

/// Symbolic value of the `direction` property (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Bidirectional,
    UnidirectionalSend,
    UnidirectionalReceive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bidirectional => "Bidirectional",
            Direction::UnidirectionalSend => "Unidirectional-Send",
            Direction::UnidirectionalReceive => "Unidirectional-Receive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Bidirectional" | "bidirectional" => Direction::Bidirectional,
            "Unidirectional-Send" | "unidirectional-send" => Direction::UnidirectionalSend,
            "Unidirectional-Receive" | "unidirectional-receive" => Direction::UnidirectionalReceive,
            _ => return None,
        })
    }
}

/// A named mapping of transport property keys to preference levels, plus the
/// `direction` property (§3).
#[derive(Debug, Clone)]
pub struct TransportProperties {
    values: HashMap<PropertyKey, Preference>,
    /// Keys outside the well-known set are retained (round-trippable through
    /// YANG) but never influence selection.
    unknown: HashMap<String, Preference>,
    direction: Direction,
}

impl Default for TransportProperties {
    fn default() -> Self {
        let mut values = HashMap::new();
        for key in PropertyKey::ALL {
            values.insert(key, key.default_preference());
        }
        Self {
            values,
            unknown: HashMap::new(),
            direction: Direction::default(),
        }
    }
}

impl TransportProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `level`. Unknown keys are stored but ignored by the
    /// selector.
    pub fn add(&mut self, key: &str, level: Preference) -> &mut Self {
        match PropertyKey::from_str(key) {
            Some(k) => {
                self.values.insert(k, level);
            }
            None => {
                self.unknown.insert(key.to_string(), level);
            }
        }
        self
    }

    pub fn require(&mut self, key: &str) -> &mut Self {
        self.add(key, Preference::Require)
    }

    pub fn prefer(&mut self, key: &str) -> &mut Self {
        self.add(key, Preference::Prefer)
    }

    pub fn ignore(&mut self, key: &str) -> &mut Self {
        self.add(key, Preference::Ignore)
    }

    pub fn avoid(&mut self, key: &str) -> &mut Self {
        self.add(key, Preference::Avoid)
    }

    pub fn prohibit(&mut self, key: &str) -> &mut Self {
        self.add(key, Preference::Prohibit)
    }

    /// Reset `key` to its default preference level.
    pub fn default_for(&mut self, key: &str) -> &mut Self {
        if let Some(k) = PropertyKey::from_str(key) {
            self.values.insert(k, k.default_preference());
        } else {
            self.unknown.remove(key);
        }
        self
    }

    pub fn set_direction(&mut self, direction: Direction) -> &mut Self {
        self.direction = direction;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn get(&self, key: PropertyKey) -> Preference {
        self.values
            .get(&key)
            .copied()
            .unwrap_or(Preference::Ignore)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (PropertyKey, Preference)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// All keys (well-known and unknown) with their preference, for YANG
    /// serialization.
    pub(crate) fn all_for_serialization(&self) -> Vec<(String, Preference)> {
        let mut out: Vec<(String, Preference)> = self
            .values
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect();
        out.extend(self.unknown.iter().map(|(k, v)| (k.clone(), *v)));
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let props = TransportProperties::default();
        assert_eq!(props.get(PropertyKey::Reliability), Preference::Require);
        assert_eq!(props.get(PropertyKey::PreserveOrder), Preference::Require);
        assert_eq!(props.get(PropertyKey::CongestionControl), Preference::Require);
        assert_eq!(
            props.get(PropertyKey::PreserveMsgBoundaries),
            Preference::Prefer
        );
        assert_eq!(props.get(PropertyKey::ZeroRttMsg), Preference::Prefer);
        assert_eq!(props.get(PropertyKey::Multistreaming), Preference::Prefer);
        assert_eq!(props.get(PropertyKey::Multipath), Preference::Prefer);
        assert_eq!(props.get(PropertyKey::RetransmitNotify), Preference::Ignore);
        assert_eq!(props.direction(), Direction::Bidirectional);
    }

    #[test]
    fn unknown_keys_round_trip_without_affecting_known() {
        let mut props = TransportProperties::new();
        props.require("x-custom-extension");
        assert_eq!(props.get(PropertyKey::Reliability), Preference::Require);
        let all = props.all_for_serialization();
        assert!(all.iter().any(|(k, _)| k == "x-custom-extension"));
    }
}
