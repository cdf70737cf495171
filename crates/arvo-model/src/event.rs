//! The wire event: an immutable value exchanged between handlers.
//!
//! Mirrors the CloudEvents-flavored shape from spec §3. Construction goes
//! through `EventBuilder` so that `id`/`source` defaults and `to := type`
//! fallback are applied in one place; once built, an `Event` is never
//! mutated — every transform in this workspace produces a new `Event`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One event flowing between a producer and a handler.
///
/// Field names follow the wire shape in spec §3 verbatim (via `serde(rename)`)
/// while keeping idiomatic snake_case identifiers on the Rust side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub source: String,

    pub to: String,

    pub subject: String,

    pub data: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataschema: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parentid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executionunits: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accesscontrol: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirectto: Option<String>,
}

impl Event {
    /// Starts building an event of the given `type`/`subject`/`data`. `to`
    /// defaults to `event_type` unless overridden (spec §3: "defaults to
    /// `type`").
    pub fn builder(event_type: impl Into<String>, subject: impl Into<String>, data: serde_json::Value) -> EventBuilder {
        EventBuilder::new(event_type, subject, data)
    }

    /// Parses `dataschema` into its `(uri, version)` parts, or `None` if
    /// absent/malformed. Format: `<contract-uri>/<version>` (spec §4.1).
    pub fn parsed_dataschema(&self) -> Option<ParsedDataschema> {
        self.dataschema.as_deref().and_then(parse_dataschema)
    }
}

/// A parsed `dataschema` URI: the contract identity plus the version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDataschema {
    pub uri: String,
    pub version: String,
}

/// The distinguished wildcard version token (spec §4.1: "match any version").
pub const ANY_VERSION: &str = "ANY";

impl ParsedDataschema {
    /// Whether this parsed version matches `other`, honoring the wildcard.
    pub fn version_matches(&self, other: &str) -> bool {
        self.version == ANY_VERSION || other == ANY_VERSION || self.version == other
    }
}

/// Splits `<uri>/<version>` on the last `/`. A dataschema with no `/` at all
/// is unparsable.
fn parse_dataschema(raw: &str) -> Option<ParsedDataschema> {
    let idx = raw.rfind('/')?;
    let (uri, rest) = raw.split_at(idx);
    let version = &rest[1..];
    if uri.is_empty() || version.is_empty() {
        return None;
    }
    Some(ParsedDataschema { uri: uri.to_string(), version: version.to_string() })
}

/// Builds the canonical `<uri>/<version>` form of a dataschema.
pub fn format_dataschema(uri: &str, version: &str) -> String {
    format!("{uri}/{version}")
}

/// Incremental constructor for `Event`. Fields not set here default per
/// spec §3 (`to` falls back to `event_type`; `id` is minted if absent).
pub struct EventBuilder {
    id: Option<String>,
    event_type: String,
    source: Option<String>,
    to: Option<String>,
    subject: String,
    data: serde_json::Value,
    dataschema: Option<String>,
    parentid: Option<String>,
    traceparent: Option<String>,
    tracestate: Option<String>,
    domain: Option<String>,
    executionunits: Option<f64>,
    accesscontrol: Option<String>,
    redirectto: Option<String>,
}

impl EventBuilder {
    pub fn new(event_type: impl Into<String>, subject: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            source: None,
            to: None,
            subject: subject.into(),
            data,
            dataschema: None,
            parentid: None,
            traceparent: None,
            tracestate: None,
            domain: None,
            executionunits: None,
            accesscontrol: None,
            redirectto: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }
    pub fn dataschema(mut self, dataschema: impl Into<String>) -> Self {
        self.dataschema = Some(dataschema.into());
        self
    }
    pub fn parentid(mut self, parentid: impl Into<String>) -> Self {
        self.parentid = Some(parentid.into());
        self
    }
    pub fn traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }
    pub fn tracestate(mut self, tracestate: impl Into<String>) -> Self {
        self.tracestate = Some(tracestate.into());
        self
    }
    pub fn domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }
    pub fn executionunits(mut self, units: f64) -> Self {
        self.executionunits = Some(units);
        self
    }
    pub fn accesscontrol(mut self, accesscontrol: impl Into<String>) -> Self {
        self.accesscontrol = Some(accesscontrol.into());
        self
    }
    pub fn redirectto(mut self, redirectto: impl Into<String>) -> Self {
        self.redirectto = Some(redirectto.into());
        self
    }

    pub fn build(self) -> Event {
        let event_type = self.event_type;
        Event {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            to: self.to.unwrap_or_else(|| event_type.clone()),
            event_type,
            source: self.source.unwrap_or_default(),
            subject: self.subject,
            data: self.data,
            dataschema: self.dataschema,
            parentid: self.parentid,
            traceparent: self.traceparent,
            tracestate: self.tracestate,
            domain: self.domain,
            executionunits: self.executionunits,
            accesscontrol: self.accesscontrol,
            redirectto: self.redirectto,
        }
    }
}
