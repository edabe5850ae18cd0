//! YANG-shaped XML/JSON `preconnection` document ingestion (§6).
//!
//! This is not a general YANG schema compiler (explicitly out of scope,
//! §1): it parses the one documented tree shape directly into a
//! [`Preconnection`], and serializes the inverse.

use crate::endpoint::{LocalEndpoint, RemoteEndpoint};
use crate::preconnection::Preconnection;
use crate::properties::{Direction, Preference, TransportProperties};
use crate::security::SecurityParameters;
use crate::{Result, TapsError};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Document encoding accepted by [`Preconnection::from_yang`]/`to_yang`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

/// Flattened view of the documented tree shape, independent of encoding.
#[derive(Default)]
struct YangIntent {
    local_ifref: Option<String>,
    local_address: Option<String>,
    local_port: Option<u16>,
    remote_host: Option<String>,
    remote_port: Option<u16>,
    trust_ca: Vec<String>,
    identity_cert: Option<String>,
    identity_key: Option<String>,
    /// Property name (including `direction`) -> its string value.
    properties: BTreeMap<String, String>,
}

impl YangIntent {
    fn from_preconnection(pre: &Preconnection) -> Self {
        let mut intent = Self::default();

        if let Some(local) = pre.local_endpoint() {
            intent.local_ifref = local.interface().map(str::to_string);
            intent.local_address = local.addresses().first().map(IpAddr::to_string);
            intent.local_port = local.port();
        }

        if let Some(remote) = pre.remote_endpoint() {
            intent.remote_host = remote
                .host_name()
                .map(str::to_string)
                .or_else(|| remote.addresses().first().map(IpAddr::to_string));
            intent.remote_port = remote.port();
        }

        if let Some(security) = pre.security_parameters() {
            intent.trust_ca = security
                .trusted_ca()
                .iter()
                .map(|ca| String::from_utf8_lossy(ca).into_owned())
                .collect();
            if let Some(identity) = security.identity() {
                intent.identity_cert = Some(String::from_utf8_lossy(&identity.certificate_chain).into_owned());
                intent.identity_key = Some(String::from_utf8_lossy(&identity.private_key).into_owned());
            }
        }

        for (key, preference) in pre.transport_properties().all_for_serialization() {
            intent.properties.insert(key, preference_to_str(preference).to_string());
        }
        intent.properties.insert(
            "direction".to_string(),
            pre.transport_properties().direction().as_str().to_string(),
        );

        intent
    }

    fn into_preconnection(self) -> Result<Preconnection> {
        let mut pre = Preconnection::new();

        if self.local_ifref.is_some() || self.local_address.is_some() || self.local_port.is_some() {
            let mut local = LocalEndpoint::new();
            if let Some(ifref) = self.local_ifref {
                local = local.with_interface(ifref);
            }
            if let Some(addr) = self.local_address {
                let parsed: IpAddr = addr
                    .parse()
                    .map_err(|_| TapsError::InvalidParameters(format!("invalid local-address: {addr}")))?;
                local = local.with_address(parsed);
            }
            if let Some(port) = self.local_port {
                local = local.with_port(port);
            }
            pre = pre.with_local_endpoint(local);
        }

        if self.remote_host.is_some() || self.remote_port.is_some() {
            let mut remote = RemoteEndpoint::new();
            if let Some(host) = self.remote_host {
                remote = remote.with_hostname(host);
            }
            if let Some(port) = self.remote_port {
                remote = remote.with_port(port);
            }
            pre = pre.with_remote_endpoint(remote);
        }

        if !self.trust_ca.is_empty() || self.identity_cert.is_some() {
            let mut security = SecurityParameters::new();
            for ca in self.trust_ca {
                security = security.add_trust_ca(ca.into_bytes());
            }
            if let (Some(cert), Some(key)) = (self.identity_cert, self.identity_key) {
                security = security.add_identity(cert.into_bytes(), key.into_bytes());
            }
            pre = pre.with_security_parameters(security);
        }

        if !self.properties.is_empty() {
            let mut properties = TransportProperties::new();
            for (key, value) in &self.properties {
                if key == "direction" {
                    if let Some(direction) = Direction::from_str(value) {
                        properties.set_direction(direction);
                    }
                } else if let Some(preference) = str_to_preference(value) {
                    properties.add(key, preference);
                } else {
                    return Err(TapsError::InvalidParameters(format!(
                        "unrecognised transport property value: {value}"
                    )));
                }
            }
            pre = pre.with_transport_properties(properties);
        }

        Ok(pre)
    }
}

fn preference_to_str(preference: Preference) -> &'static str {
    match preference {
        Preference::Require => "require",
        Preference::Prefer => "prefer",
        Preference::Ignore => "ignore",
        Preference::Avoid => "avoid",
        Preference::Prohibit => "prohibit",
    }
}

fn str_to_preference(s: &str) -> Option<Preference> {
    Some(match s {
        "require" => Preference::Require,
        "prefer" => Preference::Prefer,
        "ignore" => Preference::Ignore,
        "avoid" => Preference::Avoid,
        "prohibit" => Preference::Prohibit,
        _ => return None,
    })
}

pub(crate) fn from_yang(format: Format, document: &str) -> Result<Preconnection> {
    let intent = match format {
        Format::Xml => parse_xml(document)?,
        Format::Json => parse_json(document)?,
    };
    intent.into_preconnection()
}

pub(crate) fn to_yang(pre: &Preconnection, format: Format) -> Result<String> {
    let intent = YangIntent::from_preconnection(pre);
    match format {
        Format::Xml => Ok(render_xml(&intent)),
        Format::Json => render_json(&intent),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Container {
    Root,
    LocalEndpoints,
    RemoteEndpoints,
    Credentials,
    Identity,
    TransportProperties,
}

fn parse_xml(document: &str) -> Result<YangIntent> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut intent = YangIntent::default();
    let mut stack = vec![Container::Root];
    let mut consumed_local = false;
    let mut consumed_remote = false;
    let mut text = String::new();

    loop {
        match reader
            .read_event()
            .map_err(|err| TapsError::InvalidParameters(format!("xml parse error: {err}")))?
        {
            Event::Start(tag) => {
                let name = String::from_utf8_lossy(tag.local_name().as_ref()).into_owned();
                text.clear();
                match name.as_str() {
                    "local-endpoints" => stack.push(Container::LocalEndpoints),
                    "remote-endpoints" => stack.push(Container::RemoteEndpoints),
                    "credentials" => stack.push(Container::Credentials),
                    "identity" => stack.push(Container::Identity),
                    "transport-properties" => stack.push(Container::TransportProperties),
                    _ => {}
                }
            }
            Event::Text(t) => {
                text.push_str(
                    &t.unescape()
                        .map_err(|err| TapsError::InvalidParameters(err.to_string()))?,
                );
            }
            Event::End(tag) => {
                let name = String::from_utf8_lossy(tag.local_name().as_ref()).into_owned();
                let container = *stack.last().unwrap_or(&Container::Root);
                let value = text.trim().to_string();
                if !value.is_empty() {
                    apply_leaf(&mut intent, container, &name, &value, consumed_local, consumed_remote);
                }
                text.clear();
                match name.as_str() {
                    "local-endpoints" => {
                        consumed_local = true;
                        stack.pop();
                    }
                    "remote-endpoints" => {
                        consumed_remote = true;
                        stack.pop();
                    }
                    "credentials" | "identity" | "transport-properties" => {
                        stack.pop();
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(intent)
}

fn apply_leaf(
    intent: &mut YangIntent,
    container: Container,
    name: &str,
    value: &str,
    consumed_local: bool,
    consumed_remote: bool,
) {
    match container {
        Container::LocalEndpoints if !consumed_local => match name {
            "ifref" => intent.local_ifref = Some(value.to_string()),
            "local-address" => intent.local_address = Some(value.to_string()),
            "local-port" => intent.local_port = value.parse().ok(),
            _ => {}
        },
        Container::RemoteEndpoints if !consumed_remote => match name {
            "remote-host" => intent.remote_host = Some(value.to_string()),
            "remote-port" => intent.remote_port = value.parse().ok(),
            _ => {}
        },
        Container::Credentials => {
            if name == "trust-ca" {
                intent.trust_ca.push(value.to_string());
            }
        }
        Container::Identity => match name {
            "certificate-chain" => intent.identity_cert = Some(value.to_string()),
            "private-key" => intent.identity_key = Some(value.to_string()),
            _ => {}
        },
        Container::TransportProperties => {
            intent.properties.insert(name.to_string(), value.to_string());
        }
        _ => {}
    }
}

fn render_xml(intent: &YangIntent) -> String {
    let mut out = String::new();
    out.push_str("<preconnection xmlns=\"urn:ietf:params:xml:ns:yang:ietf-taps-api\">\n");

    if intent.local_ifref.is_some() || intent.local_address.is_some() || intent.local_port.is_some() {
        out.push_str("  <local-endpoints>\n");
        if let Some(v) = &intent.local_ifref {
            out.push_str(&format!("    <ifref>{}</ifref>\n", escape_xml(v)));
        }
        if let Some(v) = &intent.local_address {
            out.push_str(&format!("    <local-address>{}</local-address>\n", escape_xml(v)));
        }
        if let Some(v) = intent.local_port {
            out.push_str(&format!("    <local-port>{v}</local-port>\n"));
        }
        out.push_str("  </local-endpoints>\n");
    }

    if intent.remote_host.is_some() || intent.remote_port.is_some() {
        out.push_str("  <remote-endpoints>\n");
        if let Some(v) = &intent.remote_host {
            out.push_str(&format!("    <remote-host>{}</remote-host>\n", escape_xml(v)));
        }
        if let Some(v) = intent.remote_port {
            out.push_str(&format!("    <remote-port>{v}</remote-port>\n"));
        }
        out.push_str("  </remote-endpoints>\n");
    }

    if !intent.trust_ca.is_empty() || intent.identity_cert.is_some() {
        out.push_str("  <security>\n    <credentials>\n");
        for ca in &intent.trust_ca {
            out.push_str(&format!("      <trust-ca>{}</trust-ca>\n", escape_xml(ca)));
        }
        if let (Some(cert), Some(key)) = (&intent.identity_cert, &intent.identity_key) {
            out.push_str("      <identity>\n");
            out.push_str(&format!(
                "        <certificate-chain>{}</certificate-chain>\n",
                escape_xml(cert)
            ));
            out.push_str(&format!("        <private-key>{}</private-key>\n", escape_xml(key)));
            out.push_str("      </identity>\n");
        }
        out.push_str("    </credentials>\n  </security>\n");
    }

    if !intent.properties.is_empty() {
        out.push_str("  <transport-properties>\n");
        for (key, value) in &intent.properties {
            out.push_str(&format!("    <{key}>{value}</{key}>\n"));
        }
        out.push_str("  </transport-properties>\n");
    }

    out.push_str("</preconnection>\n");
    out
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn parse_json(document: &str) -> Result<YangIntent> {
    let value: serde_json::Value =
        serde_json::from_str(document).map_err(|err| TapsError::InvalidParameters(format!("json parse error: {err}")))?;
    let root = value.get("preconnection").unwrap_or(&value);

    let mut intent = YangIntent::default();

    if let Some(local) = first_array_entry(root, "local-endpoints") {
        intent.local_ifref = str_field(local, "ifref");
        intent.local_address = str_field(local, "local-address");
        intent.local_port = u16_field(local, "local-port");
    }

    if let Some(remote) = first_array_entry(root, "remote-endpoints") {
        intent.remote_host = str_field(remote, "remote-host");
        intent.remote_port = u16_field(remote, "remote-port");
    }

    if let Some(credentials) = root.get("security").and_then(|s| s.get("credentials")) {
        if let Some(trust) = credentials.get("trust-ca") {
            intent.trust_ca = match trust {
                serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
                serde_json::Value::String(s) => vec![s.clone()],
                _ => Vec::new(),
            };
        }
        if let Some(identity) = credentials.get("identity") {
            intent.identity_cert = str_field(identity, "certificate-chain");
            intent.identity_key = str_field(identity, "private-key");
        }
    }

    if let Some(props) = root.get("transport-properties").and_then(|v| v.as_object()) {
        for (key, value) in props {
            if let Some(s) = value.as_str() {
                intent.properties.insert(key.clone(), s.to_string());
            }
        }
    }

    Ok(intent)
}

fn first_array_entry<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    match root.get(key)? {
        serde_json::Value::Array(items) => items.first(),
        other => Some(other),
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(str::to_string)
}

fn u16_field(value: &serde_json::Value, key: &str) -> Option<u16> {
    value.get(key)?.as_u64().and_then(|n| u16::try_from(n).ok())
}

fn render_json(intent: &YangIntent) -> Result<String> {
    let mut root = serde_json::Map::new();

    if intent.local_ifref.is_some() || intent.local_address.is_some() || intent.local_port.is_some() {
        let mut entry = serde_json::Map::new();
        if let Some(v) = &intent.local_ifref {
            entry.insert("ifref".into(), serde_json::Value::String(v.clone()));
        }
        if let Some(v) = &intent.local_address {
            entry.insert("local-address".into(), serde_json::Value::String(v.clone()));
        }
        if let Some(v) = intent.local_port {
            entry.insert("local-port".into(), serde_json::Value::from(v));
        }
        root.insert(
            "local-endpoints".into(),
            serde_json::Value::Array(vec![serde_json::Value::Object(entry)]),
        );
    }

    if intent.remote_host.is_some() || intent.remote_port.is_some() {
        let mut entry = serde_json::Map::new();
        if let Some(v) = &intent.remote_host {
            entry.insert("remote-host".into(), serde_json::Value::String(v.clone()));
        }
        if let Some(v) = intent.remote_port {
            entry.insert("remote-port".into(), serde_json::Value::from(v));
        }
        root.insert(
            "remote-endpoints".into(),
            serde_json::Value::Array(vec![serde_json::Value::Object(entry)]),
        );
    }

    if !intent.trust_ca.is_empty() || intent.identity_cert.is_some() {
        let mut credentials = serde_json::Map::new();
        if !intent.trust_ca.is_empty() {
            credentials.insert(
                "trust-ca".into(),
                serde_json::Value::Array(intent.trust_ca.iter().cloned().map(serde_json::Value::String).collect()),
            );
        }
        if let (Some(cert), Some(key)) = (&intent.identity_cert, &intent.identity_key) {
            let mut identity = serde_json::Map::new();
            identity.insert("certificate-chain".into(), serde_json::Value::String(cert.clone()));
            identity.insert("private-key".into(), serde_json::Value::String(key.clone()));
            credentials.insert("identity".into(), serde_json::Value::Object(identity));
        }
        let mut security = serde_json::Map::new();
        security.insert("credentials".into(), serde_json::Value::Object(credentials));
        root.insert("security".into(), serde_json::Value::Object(security));
    }

    if !intent.properties.is_empty() {
        let mut props = serde_json::Map::new();
        for (key, value) in &intent.properties {
            props.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        root.insert("transport-properties".into(), serde_json::Value::Object(props));
    }

    serde_json::to_string_pretty(&serde_json::Value::Object(root)).map_err(|err| TapsError::InvalidParameters(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn xml_round_trips_endpoints_and_properties() {
        let pre = Preconnection::new()
            .with_local_endpoint(LocalEndpoint::new().with_address(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))))
            .with_remote_endpoint(RemoteEndpoint::new().with_hostname("example.com").with_port(443));
        let xml = pre.to_yang(Format::Xml).unwrap();
        let round_tripped = Preconnection::from_yang(Format::Xml, &xml).unwrap();

        assert_eq!(
            round_tripped.remote_endpoint().unwrap().host_name(),
            Some("example.com")
        );
        assert_eq!(round_tripped.remote_endpoint().unwrap().port(), Some(443));
        assert_eq!(
            round_tripped.local_endpoint().unwrap().addresses(),
            &[IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))]
        );
    }

    #[tokio::test]
    async fn json_round_trips_endpoints_and_properties() {
        let pre = Preconnection::new()
            .with_remote_endpoint(RemoteEndpoint::new().with_hostname("example.com").with_port(9000));
        let json = pre.to_yang(Format::Json).unwrap();
        let round_tripped = Preconnection::from_yang(Format::Json, &json).unwrap();

        assert_eq!(
            round_tripped.remote_endpoint().unwrap().host_name(),
            Some("example.com")
        );
        assert_eq!(round_tripped.remote_endpoint().unwrap().port(), Some(9000));
    }

    #[test]
    fn only_first_local_endpoints_block_is_used() {
        let xml = r#"<preconnection xmlns="urn:ietf:params:xml:ns:yang:ietf-taps-api">
            <local-endpoints><local-address>10.0.0.1</local-address></local-endpoints>
            <local-endpoints><local-address>10.0.0.2</local-address></local-endpoints>
        </preconnection>"#;
        let intent = parse_xml(xml).unwrap();
        assert_eq!(intent.local_address, Some("10.0.0.1".to_string()));
    }
}
