//! Agent sync protocol messages.
//!
//! Agents are lenient in what they send, so request types are lenient in
//! what they accept: unknown fields are ignored, scalars may arrive as
//! strings or numbers, and every field is optional.

use crate::error::{FrameError, FrameResult};
use crate::tags::{ClientMode, Policy, RuleType};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// The four phases of an agent sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Device reports its state and receives sync policy.
    Preflight,
    /// Device uploads execution events.
    EventUpload,
    /// Device pages through rules.
    RuleDownload,
    /// Device reports the end of the cycle.
    Postflight,
}

impl SyncPhase {
    /// All phases in protocol order.
    pub const ALL: [SyncPhase; 4] = [
        SyncPhase::Preflight,
        SyncPhase::EventUpload,
        SyncPhase::RuleDownload,
        SyncPhase::Postflight,
    ];

    /// Returns the URL path segment for the phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Preflight => "preflight",
            SyncPhase::EventUpload => "eventupload",
            SyncPhase::RuleDownload => "ruledownload",
            SyncPhase::Postflight => "postflight",
        }
    }
}

/// Preflight request: whatever telemetry the device chose to send.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreflightRequest {
    /// Hardware serial number.
    #[serde(deserialize_with = "lenient_string")]
    pub serial_num: Option<String>,
    /// Host name.
    #[serde(deserialize_with = "lenient_string")]
    pub hostname: Option<String>,
    /// Console user.
    #[serde(deserialize_with = "lenient_string")]
    pub primary_user: Option<String>,
    /// OS version.
    #[serde(deserialize_with = "lenient_string")]
    pub os_version: Option<String>,
    /// OS build.
    #[serde(deserialize_with = "lenient_string")]
    pub os_build: Option<String>,
    /// Agent version.
    #[serde(alias = "agent_version", deserialize_with = "lenient_string")]
    pub santa_version: Option<String>,
    /// Hardware model.
    #[serde(deserialize_with = "lenient_string")]
    pub model_identifier: Option<String>,
    /// Mode as sent: symbolic string or legacy integer.
    pub client_mode: Option<serde_json::Value>,
}

impl PreflightRequest {
    /// Parses a preflight body as JSON or as a URL-encoded form.
    ///
    /// An empty body is a valid, empty request. Without a recognizable
    /// content type, JSON is tried first and then a form.
    pub fn parse(body: &[u8], content_type: &str) -> FrameResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("json") {
            Ok(serde_json::from_slice(body)?)
        } else if content_type.contains("x-www-form-urlencoded") {
            Ok(Self::from_form(body))
        } else {
            Ok(serde_json::from_slice(body).unwrap_or_else(|_| Self::from_form(body)))
        }
    }

    fn from_form(body: &[u8]) -> Self {
        let mut request = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            let value = value.into_owned();
            match key.as_ref() {
                "serial_num" => request.serial_num = Some(value),
                "hostname" => request.hostname = Some(value),
                "primary_user" => request.primary_user = Some(value),
                "os_version" => request.os_version = Some(value),
                "os_build" => request.os_build = Some(value),
                "santa_version" | "agent_version" => request.santa_version = Some(value),
                "model_identifier" => request.model_identifier = Some(value),
                "client_mode" => request.client_mode = Some(serde_json::Value::String(value)),
                _ => {}
            }
        }
        request
    }

    /// The normalized mode, if the device sent a recognizable one.
    pub fn mode(&self) -> Option<ClientMode> {
        self.client_mode.as_ref().and_then(ClientMode::normalize)
    }
}

/// Sync policy returned by preflight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Mode the device should run in.
    pub client_mode: ClientMode,
    /// Events per upload batch.
    pub batch_size: u32,
    /// Where to upload logs (empty disables).
    pub upload_logs_url: String,
    /// Ask the device to drop its rules and resync from scratch.
    pub clean_sync: bool,
    /// Enable bundle hashing.
    pub enable_bundles: bool,
    /// Enable transitive allowlisting.
    pub enable_transitive_rules: bool,
    /// Paths to always block.
    pub blocked_path_regex: String,
    /// Paths to always allow.
    pub allowed_path_regex: String,
    /// Upload every execution rather than only blocks.
    pub enable_all_event_upload: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            client_mode: ClientMode::Lockdown,
            batch_size: 100,
            upload_logs_url: String::new(),
            clean_sync: false,
            enable_bundles: true,
            enable_transitive_rules: false,
            blocked_path_regex: String::new(),
            allowed_path_regex: String::new(),
            enable_all_event_upload: false,
        }
    }
}

/// Event upload request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventUploadRequest {
    /// Uploaded execution events.
    pub events: Vec<AgentEvent>,
}

impl EventUploadRequest {
    /// Parses an event upload body.
    ///
    /// Bodies that are not the JSON schema (protobuf uploads included)
    /// fail here; callers acknowledge them anyway.
    pub fn parse(body: &[u8]) -> FrameResult<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// One execution event as reported by an agent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentEvent {
    /// SHA-256 of the executed file.
    #[serde(deserialize_with = "lenient_string")]
    pub file_sha256: Option<String>,
    /// Path of the executed file.
    #[serde(deserialize_with = "lenient_string")]
    pub file_path: Option<String>,
    /// File name.
    #[serde(deserialize_with = "lenient_string")]
    pub file_name: Option<String>,
    /// User that ran the file.
    #[serde(deserialize_with = "lenient_string")]
    pub executing_user: Option<String>,
    /// Execution time in epoch seconds.
    #[serde(deserialize_with = "lenient_f64")]
    pub execution_time: Option<f64>,
    /// Agent decision, e.g. `ALLOW_BINARY` or `BLOCK_UNKNOWN`.
    #[serde(deserialize_with = "lenient_string")]
    pub decision: Option<String>,
    /// Leaf signing certificate SHA-256.
    #[serde(deserialize_with = "lenient_string")]
    pub certificate_sha256: Option<String>,
    /// Leaf signing certificate common name.
    #[serde(deserialize_with = "lenient_string")]
    pub certificate_cn: Option<String>,
    /// Team id.
    #[serde(deserialize_with = "lenient_string")]
    pub team_id: Option<String>,
    /// Signing id.
    #[serde(deserialize_with = "lenient_string")]
    pub signing_id: Option<String>,
    /// Code directory hash.
    #[serde(deserialize_with = "lenient_string")]
    pub cdhash: Option<String>,
    /// Bundle identifier.
    #[serde(deserialize_with = "lenient_string")]
    pub bundle_id: Option<String>,
    /// Bundle name.
    #[serde(deserialize_with = "lenient_string")]
    pub bundle_name: Option<String>,
    /// Bundle path.
    #[serde(deserialize_with = "lenient_string")]
    pub bundle_path: Option<String>,
    /// Quarantine source URL.
    #[serde(deserialize_with = "lenient_string")]
    pub quarantine_data_url: Option<String>,
}

/// Event upload acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventUploadResponse {
    /// Bundles the server wants hashed and uploaded. Always empty.
    pub event_upload_bundle_binaries: Vec<String>,
}

/// Rule download request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuleDownloadRequest {
    /// Last rule id the device received.
    #[serde(deserialize_with = "lenient_cursor")]
    pub cursor: Option<i64>,
}

impl RuleDownloadRequest {
    /// Parses a rule download body. Empty bodies carry no cursor.
    pub fn parse(body: &[u8]) -> FrameResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// The watermark to page from. Missing or negative cursors start at 0.
    pub fn watermark(&self) -> i64 {
        self.cursor.unwrap_or(0).max(0)
    }
}

/// A rule as distributed to agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRule {
    /// Hash, signing id, team id, ...
    pub identifier: String,
    /// Allow or block.
    pub policy: Policy,
    /// What `identifier` refers to.
    pub rule_type: RuleType,
    /// Message shown to the user on block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_msg: Option<String>,
}

/// Rule download page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDownloadResponse {
    /// Rules in ascending id order.
    pub rules: Vec<WireRule>,
    /// Present only when the page was full and more rules may follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<i64>,
}

/// Postflight acknowledgement. Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostflightResponse {}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Malformed(err.to_string())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_cursor<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| de::Error::custom("cursor is not an integer")),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom("cursor is not an integer")),
        _ => Err(de::Error::custom("cursor is not an integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preflight_json() {
        let body = json!({
            "serial_num": "C02XYZ",
            "hostname": "build-07",
            "os_version": "14.4",
            "santa_version": "2024.3",
            "client_mode": "MONITOR",
            "unexpected": [1, 2, 3],
        });
        let req = PreflightRequest::parse(body.to_string().as_bytes(), "application/json").unwrap();
        assert_eq!(req.serial_num.as_deref(), Some("C02XYZ"));
        assert_eq!(req.hostname.as_deref(), Some("build-07"));
        assert_eq!(req.mode(), Some(ClientMode::Monitor));
    }

    #[test]
    fn preflight_numeric_fields() {
        let body = br#"{"os_version": 14, "client_mode": 2}"#;
        let req = PreflightRequest::parse(body, "application/json").unwrap();
        assert_eq!(req.os_version.as_deref(), Some("14"));
        assert_eq!(req.mode(), Some(ClientMode::Lockdown));
    }

    #[test]
    fn preflight_form() {
        let body = b"serial_num=C02XYZ&primary_user=alice%40corp&client_mode=1";
        let req = PreflightRequest::parse(body, "application/x-www-form-urlencoded").unwrap();
        assert_eq!(req.serial_num.as_deref(), Some("C02XYZ"));
        assert_eq!(req.primary_user.as_deref(), Some("alice@corp"));
        assert_eq!(req.mode(), Some(ClientMode::Monitor));
    }

    #[test]
    fn preflight_empty_body() {
        let req = PreflightRequest::parse(b"", "application/json").unwrap();
        assert_eq!(req, PreflightRequest::default());
        assert_eq!(req.mode(), None);
    }

    #[test]
    fn preflight_garbage_is_an_error() {
        assert!(PreflightRequest::parse(b"\x08\x01\x12", "application/json").is_err());
    }

    #[test]
    fn preflight_without_content_type() {
        let json = PreflightRequest::parse(br#"{"hostname":"a"}"#, "").unwrap();
        assert_eq!(json.hostname.as_deref(), Some("a"));
        let form = PreflightRequest::parse(b"hostname=b&client_mode=2", "").unwrap();
        assert_eq!(form.hostname.as_deref(), Some("b"));
        assert_eq!(form.mode(), Some(ClientMode::Lockdown));
    }

    #[test]
    fn sync_policy_wire_shape() {
        let value = serde_json::to_value(SyncPolicy::default()).unwrap();
        assert_eq!(value["client_mode"], "LOCKDOWN");
        assert_eq!(value["batch_size"], 100);
        assert_eq!(value["enable_bundles"], true);
        assert_eq!(value["enable_all_event_upload"], false);
    }

    #[test]
    fn event_upload_parsing() {
        let body = json!({
            "events": [
                {"file_sha256": "ab12", "execution_time": 1_700_000_000.5, "decision": "BLOCK_BINARY"},
                {"file_sha256": "cd34", "execution_time": "1700000001"},
            ]
        });
        let req = EventUploadRequest::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(req.events.len(), 2);
        assert_eq!(req.events[0].execution_time, Some(1_700_000_000.5));
        assert_eq!(req.events[1].execution_time, Some(1_700_000_001.0));
        assert!(EventUploadRequest::parse(b"\x0a\x02hi").is_err());
    }

    #[test]
    fn cursor_forms() {
        assert_eq!(RuleDownloadRequest::parse(b"").unwrap().watermark(), 0);
        assert_eq!(RuleDownloadRequest::parse(b"{}").unwrap().watermark(), 0);
        assert_eq!(RuleDownloadRequest::parse(br#"{"cursor": 42}"#).unwrap().watermark(), 42);
        assert_eq!(RuleDownloadRequest::parse(br#"{"cursor": "17"}"#).unwrap().watermark(), 17);
        assert_eq!(RuleDownloadRequest::parse(br#"{"cursor": -5}"#).unwrap().watermark(), 0);
        assert!(RuleDownloadRequest::parse(br#"{"cursor": "abc"}"#).is_err());
    }

    #[test]
    fn rule_download_omits_cursor_when_done() {
        let page = RuleDownloadResponse {
            rules: vec![WireRule {
                identifier: "ab12".into(),
                policy: Policy::Allow,
                rule_type: RuleType::Binary,
                custom_msg: None,
            }],
            cursor: None,
        };
        let value = serde_json::to_value(&page).unwrap();
        assert!(value.get("cursor").is_none());
        assert_eq!(value["rules"][0]["policy"], "ALLOWLIST");
        assert!(value["rules"][0].get("custom_msg").is_none());
    }

    #[test]
    fn postflight_is_empty_object() {
        assert_eq!(serde_json::to_string(&PostflightResponse {}).unwrap(), "{}");
    }

    #[test]
    fn phase_paths() {
        let paths: Vec<_> = SyncPhase::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(paths, ["preflight", "eventupload", "ruledownload", "postflight"]);
    }
}
