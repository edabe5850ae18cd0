//! Candidate selector (C5): transport properties → ranked protocol list.

use crate::error::{Result, TapsError};
use crate::properties::{Preference, TransportProperties};
use crate::protocol::{Protocol, ProtocolDescriptor};

/// One entry of the selector's ranked output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedProtocol {
    pub protocol: Protocol,
    pub prefer_count: i32,
    pub avoid_count: i32,
}

/// Rank every protocol in `registry` against `properties`, most-preferred
/// first (§4.1). Returns [`TapsError::Selection`] if filtering removes every
/// candidate.
pub fn select(
    properties: &TransportProperties,
    registry: &[ProtocolDescriptor],
) -> Result<Vec<RankedProtocol>> {
    let mut ranked: Vec<RankedProtocol> = registry
        .iter()
        .map(|desc| RankedProtocol {
            protocol: desc.protocol,
            prefer_count: 0,
            avoid_count: 0,
        })
        .collect();

    let mut alive = vec![true; registry.len()];

    for (key, level) in properties.iter() {
        for (i, desc) in registry.iter().enumerate() {
            if !alive[i] {
                continue;
            }
            match level {
                Preference::Require => {
                    if !desc.satisfies_require(key) {
                        alive[i] = false;
                    }
                }
                Preference::Prohibit => {
                    if desc.violates_prohibit(key) {
                        alive[i] = false;
                    }
                }
                Preference::Prefer => {
                    if desc.counts_for_preference(key) {
                        ranked[i].prefer_count += 1;
                    }
                }
                Preference::Avoid => {
                    if desc.counts_for_preference(key) {
                        ranked[i].avoid_count -= 1;
                    }
                }
                Preference::Ignore => {}
            }
        }
    }

    let mut surviving: Vec<RankedProtocol> = ranked
        .into_iter()
        .enumerate()
        .filter(|(i, _)| alive[*i])
        .map(|(_, r)| r)
        .collect();

    if surviving.is_empty() {
        return Err(TapsError::Selection);
    }

    surviving.sort_by(|a, b| {
        b.prefer_count
            .cmp(&a.prefer_count)
            .then(b.avoid_count.cmp(&a.avoid_count))
    });

    Ok(surviving)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::registry;

    #[test]
    fn default_properties_rank_reliable_protocols_first() {
        let props = TransportProperties::default();
        let ranked = select(&props, &registry()).unwrap();
        assert_eq!(ranked[0].protocol, Protocol::Tcp);
        assert!(ranked.iter().all(|r| r.protocol != Protocol::Udp));
    }

    #[test]
    fn prohibit_reliability_selects_only_datagram_protocols() {
        let mut props = TransportProperties::new();
        props.prohibit("reliability");
        props.ignore("preserve-order");
        props.ignore("congestion-control");
        let ranked = select(&props, &registry()).unwrap();
        assert_eq!(ranked[0].protocol, Protocol::Udp);
        assert!(ranked.iter().all(|r| r.protocol != Protocol::Tcp));
    }

    #[test]
    fn empty_surviving_set_is_selection_error() {
        let mut props = TransportProperties::new();
        props.require("reliability");
        props.prohibit("preserve-order");
        let err = select(&props, &registry()).unwrap_err();
        assert!(matches!(err, TapsError::Selection));
    }

    #[test]
    fn ties_retain_registry_order() {
        let props = TransportProperties::new();
        let ranked = select(&props, &registry()).unwrap();
        let protocols: Vec<_> = ranked.iter().map(|r| r.protocol).collect();
        assert_eq!(
            protocols,
            vec![
                Protocol::Tcp,
                Protocol::Udp,
                Protocol::TlsOverTcp,
                Protocol::DtlsOverUdp
            ]
        );
    }
}
