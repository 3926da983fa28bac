//! Topic scheme and payload codecs of the decoder protocol.
//!
//! All topics hang off a configurable root (default `/trains/`):
//!
//! ```text
//! track/decoder/configReq/<uri>              decoder → server, empty
//! track/decoder/configResp/<uri>             server → decoder, XML subtree
//! opState/upstream/<uri>/<name>              decoder → server, flag list
//! opState/downstream/<uri>/<name>            server → decoder, flag list
//! admState/downstream/<uri>/<name>           <ADMSTATE>ONLINE|OFFLINE</ADMSTATE>
//! track/decodersupervision/upstream/<uri>    <PING/>
//! track/decodersupervision/downstream/<uri>  <PING/>
//! reboot/<uri>                               <REBOOT/>
//! statistics/<uri>/<name>                    <statReport>...</statReport>
//! lightgroup|sensor|actuator/opState/<name>  <OPSTATE>AVAILABLE|UNAVAILABLE</OPSTATE>
//! ```
//!
//! `<name>` is an object's display name (`decoder/link/satellite`), so it
//! may span several topic levels.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::state::{AdminState, Summary};

/// Downstream and upstream keep-alive payload.
pub const PING: &str = "<PING/>";

/// Reboot command payload.
pub const REBOOT: &str = "<REBOOT/>";

/// Default topic root.
pub const DEFAULT_ROOT: &str = "/trains/";

// ============================================================================
// Topics
// ============================================================================

/// Builds and parses topics under one root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    root: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl Topics {
    /// Creates a scheme; a trailing `/` is added to the root when missing.
    pub fn new(root: &str) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self { root }
    }

    /// Topic root including the trailing separator.
    pub fn root(&self) -> &str {
        &self.root
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}{}", self.root, suffix)
    }

    /// `track/decoder/configReq/<uri>`
    pub fn config_req(&self, uri: &str) -> String {
        self.topic(&format!("track/decoder/configReq/{}", uri))
    }

    /// `track/decoder/configResp/<uri>`
    pub fn config_resp(&self, uri: &str) -> String {
        self.topic(&format!("track/decoder/configResp/{}", uri))
    }

    /// `opState/upstream/<uri>/<name>`
    pub fn op_state_upstream(&self, uri: &str, name: &str) -> String {
        self.topic(&format!("opState/upstream/{}/{}", uri, name))
    }

    /// `opState/downstream/<uri>/<name>`
    pub fn op_state_downstream(&self, uri: &str, name: &str) -> String {
        self.topic(&format!("opState/downstream/{}/{}", uri, name))
    }

    /// `admState/downstream/<uri>/<name>`
    pub fn adm_state_downstream(&self, uri: &str, name: &str) -> String {
        self.topic(&format!("admState/downstream/{}/{}", uri, name))
    }

    /// `track/decodersupervision/upstream/<uri>`
    pub fn supervision_upstream(&self, uri: &str) -> String {
        self.topic(&format!("track/decodersupervision/upstream/{}", uri))
    }

    /// `track/decodersupervision/downstream/<uri>`
    pub fn supervision_downstream(&self, uri: &str) -> String {
        self.topic(&format!("track/decodersupervision/downstream/{}", uri))
    }

    /// `reboot/<uri>`
    pub fn reboot(&self, uri: &str) -> String {
        self.topic(&format!("reboot/{}", uri))
    }

    /// `statistics/<uri>/<name>`
    pub fn statistics(&self, uri: &str, name: &str) -> String {
        self.topic(&format!("statistics/{}/{}", uri, name))
    }

    /// `<family>/opState/<name>`
    pub fn resource_op_state(&self, family: &str, name: &str) -> String {
        self.topic(&format!("{}/opState/{}", family, name))
    }

    /// Topic filters a committed decoder listens on.
    pub fn decoder_subscriptions(&self, uri: &str) -> Vec<String> {
        vec![
            self.config_req(uri),
            self.supervision_upstream(uri),
            self.topic(&format!("opState/upstream/{}/#", uri)),
            self.topic(&format!("statistics/{}/#", uri)),
        ]
    }

    /// Classifies an inbound topic.
    pub fn parse(&self, topic: &str) -> Option<Inbound> {
        let rest = topic.strip_prefix(self.root.as_str())?;
        if let Some(uri) = rest.strip_prefix("track/decoder/configReq/") {
            return single_level(uri).map(|uri| Inbound::ConfigRequest { uri });
        }
        if let Some(uri) = rest.strip_prefix("track/decodersupervision/upstream/") {
            return single_level(uri).map(|uri| Inbound::Ping { uri });
        }
        if let Some(path) = rest.strip_prefix("opState/upstream/") {
            let (uri, name) = split_uri(path)?;
            return Some(Inbound::OpState { uri, name });
        }
        if let Some(path) = rest.strip_prefix("statistics/") {
            let (uri, name) = split_uri(path)?;
            return Some(Inbound::Statistics { uri, name });
        }
        None
    }
}

fn single_level(level: &str) -> Option<String> {
    if level.is_empty() || level.contains('/') {
        None
    } else {
        Some(level.to_string())
    }
}

fn split_uri(path: &str) -> Option<(String, String)> {
    let (uri, name) = path.split_once('/')?;
    if uri.is_empty() || name.is_empty() {
        return None;
    }
    Some((uri.to_string(), name.to_string()))
}

/// Inbound message classes the server handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A decoder asks for its configuration.
    ConfigRequest {
        /// Decoder URI.
        uri: String,
    },
    /// Upstream keep-alive.
    Ping {
        /// Decoder URI.
        uri: String,
    },
    /// Decoder-reported condition flags of one object.
    OpState {
        /// Decoder URI.
        uri: String,
        /// Display name of the object.
        name: String,
    },
    /// Error counters of one object.
    Statistics {
        /// Decoder URI.
        uri: String,
        /// Display name of the object.
        name: String,
    },
}

// ============================================================================
// Payloads
// ============================================================================

/// `<ADMSTATE>ONLINE|OFFLINE</ADMSTATE>`
pub fn adm_state_payload(admin: AdminState) -> String {
    format!("<ADMSTATE>{}</ADMSTATE>", admin.as_wire())
}

/// `<OPSTATE>AVAILABLE|UNAVAILABLE</OPSTATE>`
pub fn op_state_payload(summary: Summary) -> String {
    format!("<OPSTATE>{}</OPSTATE>", summary.as_wire())
}

/// Whether a payload is a keep-alive.
pub fn is_ping(payload: &str) -> bool {
    payload.trim() == PING
}

/// Error counters from a `<statReport>` document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatReport {
    /// Counter values by element name.
    pub counters: BTreeMap<String, u64>,
}

impl StatReport {
    /// Parses a report. Elements with non-numeric text are rejected.
    pub fn parse(xml: &str) -> Result<StatReport, String> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut report = StatReport::default();
        let mut seen_root = false;
        let mut current: Option<String> = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if !seen_root {
                        if name != "statReport" {
                            return Err(format!("unexpected root <{}>", name));
                        }
                        seen_root = true;
                    } else {
                        current = Some(name);
                    }
                }
                Ok(Event::Text(t)) => {
                    let Some(name) = current.as_ref() else {
                        continue;
                    };
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    let value = text
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| format!("counter {} is not a number: {:?}", name, text))?;
                    report.counters.insert(name.clone(), value);
                }
                Ok(Event::End(_)) => current = None,
                Ok(Event::Empty(e)) if !seen_root && e.name().as_ref() == b"statReport" => {
                    seen_root = true;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(e.to_string()),
                Ok(_) => {}
            }
        }
        if !seen_root {
            return Err("missing <statReport>".into());
        }
        Ok(report)
    }

    /// Renders the report.
    pub fn to_xml(&self) -> String {
        let body: String = self
            .counters
            .iter()
            .map(|(k, v)| format!("<{k}>{v}</{k}>"))
            .collect();
        format!("<statReport>{}</statReport>", body)
    }

    /// Counter value, zero if absent.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Whether any of `names` grew compared to `previous`.
    pub fn increased(&self, previous: &BTreeMap<String, u64>, names: &[&str]) -> bool {
        names.iter().any(|name| {
            let before = previous.get(*name).copied().unwrap_or(0);
            self.get(name) > before
        })
    }
}
