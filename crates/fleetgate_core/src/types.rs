//! Record types held by the store.

use chrono::{DateTime, Utc};
use fleetgate_protocol::{ClientMode, Policy, PreflightRequest, RuleType, VoteType, WireRule};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalStatus {
    /// Open for votes.
    Pending,
    /// Decided; a rule exists for it.
    Approved,
    /// Terminal state with no transition driving it yet.
    Rejected,
}

impl ProposalStatus {
    /// Returns the stored spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "PENDING",
            ProposalStatus::Approved => "APPROVED",
            ProposalStatus::Rejected => "REJECTED",
        }
    }

    /// Returns true once the proposal no longer accepts votes.
    pub const fn is_final(self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

impl FromStr for ProposalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ProposalStatus::Pending),
            "APPROVED" => Ok(ProposalStatus::Approved),
            "REJECTED" => Ok(ProposalStatus::Rejected),
            _ => Err(CoreError::invalid_input(format!("unknown proposal status {s:?}"))),
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed endpoint as last reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// Stable agent-chosen identifier.
    pub id: String,
    /// Hardware serial number.
    pub serial_num: Option<String>,
    /// Host name.
    pub hostname: Option<String>,
    /// OS version.
    pub os_version: Option<String>,
    /// OS build.
    pub os_build: Option<String>,
    /// Agent version.
    pub santa_version: Option<String>,
    /// Console user.
    pub primary_user: Option<String>,
    /// Hardware model.
    pub model_identifier: Option<String>,
    /// Last reported enforcement mode.
    pub client_mode: Option<ClientMode>,
    /// First contact.
    pub enrolled_at: DateTime<Utc>,
    /// Last rule download or postflight.
    pub last_sync: Option<DateTime<Utc>>,
    /// Last preflight.
    pub last_preflight_sync: Option<DateTime<Utc>>,
}

impl Device {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            serial_num: row.get("serial_num")?,
            hostname: row.get("hostname")?,
            os_version: row.get("os_version")?,
            os_build: row.get("os_build")?,
            santa_version: row.get("santa_version")?,
            primary_user: row.get("primary_user")?,
            model_identifier: row.get("model_identifier")?,
            client_mode: parse_optional_column(row, "client_mode")?,
            enrolled_at: row.get("enrolled_at")?,
            last_sync: row.get("last_sync")?,
            last_preflight_sync: row.get("last_preflight_sync")?,
        })
    }
}

/// Partial device telemetry from one sync cycle.
///
/// `None` means "not reported"; it never clears a stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    /// Hardware serial number.
    pub serial_num: Option<String>,
    /// Host name.
    pub hostname: Option<String>,
    /// OS version.
    pub os_version: Option<String>,
    /// OS build.
    pub os_build: Option<String>,
    /// Agent version.
    pub santa_version: Option<String>,
    /// Console user.
    pub primary_user: Option<String>,
    /// Hardware model.
    pub model_identifier: Option<String>,
    /// Enforcement mode.
    pub client_mode: Option<ClientMode>,
}

impl DeviceUpdate {
    /// Drops blank values so they read as "not reported".
    #[must_use]
    pub fn normalized(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            serial_num: keep(self.serial_num),
            hostname: keep(self.hostname),
            os_version: keep(self.os_version),
            os_build: keep(self.os_build),
            santa_version: keep(self.santa_version),
            primary_user: keep(self.primary_user),
            model_identifier: keep(self.model_identifier),
            client_mode: self.client_mode,
        }
    }

    /// Returns true if nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.serial_num.is_none()
            && self.hostname.is_none()
            && self.os_version.is_none()
            && self.os_build.is_none()
            && self.santa_version.is_none()
            && self.primary_user.is_none()
            && self.model_identifier.is_none()
            && self.client_mode.is_none()
    }
}

impl From<&PreflightRequest> for DeviceUpdate {
    fn from(req: &PreflightRequest) -> Self {
        Self {
            serial_num: req.serial_num.clone(),
            hostname: req.hostname.clone(),
            os_version: req.os_version.clone(),
            os_build: req.os_build.clone(),
            santa_version: req.santa_version.clone(),
            primary_user: req.primary_user.clone(),
            model_identifier: req.model_identifier.clone(),
            client_mode: req.mode(),
        }
        .normalized()
    }
}

/// A proposal to add a rule, decided by votes or by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proposal {
    /// Proposal id.
    pub id: i64,
    /// What the resulting rule will match.
    pub identifier: String,
    /// What `identifier` refers to.
    pub rule_type: RuleType,
    /// Policy the proposer asked for.
    pub proposed_policy: Policy,
    /// Free-text rationale, also used as the rule's block message.
    pub custom_message: Option<String>,
    /// User who created the proposal.
    pub created_by: i64,
    /// Lifecycle state.
    pub status: ProposalStatus,
    /// Live allow votes.
    pub allow_votes: i64,
    /// Live block votes.
    pub block_votes: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the proposal left `PENDING`.
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            identifier: row.get("identifier")?,
            rule_type: parse_column(row, "rule_type")?,
            proposed_policy: parse_column(row, "proposed_policy")?,
            custom_message: row.get("custom_message")?,
            created_by: row.get("created_by")?,
            status: parse_column(row, "status")?,
            allow_votes: row.get("allow_votes")?,
            block_votes: row.get("block_votes")?,
            created_at: row.get("created_at")?,
            finalized_at: row.get("finalized_at")?,
        })
    }
}

/// Input for creating a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProposal {
    /// What the resulting rule will match.
    pub identifier: String,
    /// What `identifier` refers to.
    pub rule_type: RuleType,
    /// Requested policy.
    pub proposed_policy: Policy,
    /// Free-text rationale.
    pub custom_message: Option<String>,
    /// Creating user.
    pub created_by: i64,
}

/// One voter's live ballot on a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vote {
    /// Voting user.
    pub voter_id: i64,
    /// Proposal voted on.
    pub proposal_id: i64,
    /// Ballot.
    pub vote_type: VoteType,
    /// Time of the latest write.
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            voter_id: row.get("voter_id")?,
            proposal_id: row.get("proposal_id")?,
            vote_type: parse_column(row, "vote_type")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A committed policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    /// Rule id; also the download cursor.
    pub id: i64,
    /// What the rule matches.
    pub identifier: String,
    /// Allow or block.
    pub policy: Policy,
    /// What `identifier` refers to.
    pub rule_type: RuleType,
    /// Message shown to the user on block.
    pub custom_msg: Option<String>,
    /// Operator note, never sent to agents.
    pub comment: Option<String>,
    /// Author, when known.
    pub created_by: Option<i64>,
    /// Proposal that produced the rule. `None` for admin-authored rules.
    pub proposal_id: Option<i64>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            identifier: row.get("identifier")?,
            policy: parse_column(row, "policy")?,
            rule_type: parse_column(row, "rule_type")?,
            custom_msg: row.get("custom_msg")?,
            comment: row.get("comment")?,
            created_by: row.get("created_by")?,
            proposal_id: row.get("proposal_id")?,
            created_at: row.get("created_at")?,
        })
    }

    /// The rule as sent to agents.
    pub fn to_wire(&self) -> WireRule {
        WireRule {
            identifier: self.identifier.clone(),
            policy: self.policy,
            rule_type: self.rule_type,
            custom_msg: self.custom_msg.clone(),
        }
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    /// What the rule matches.
    pub identifier: String,
    /// Allow or block.
    pub policy: Policy,
    /// What `identifier` refers to.
    pub rule_type: RuleType,
    /// Message shown to the user on block.
    pub custom_msg: Option<String>,
    /// Operator note.
    pub comment: Option<String>,
    /// Author.
    pub created_by: Option<i64>,
    /// Producing proposal.
    pub proposal_id: Option<i64>,
}

impl NewRule {
    /// An admin-authored rule with no provenance.
    pub fn manual(identifier: impl Into<String>, policy: Policy, rule_type: RuleType) -> Self {
        Self {
            identifier: identifier.into(),
            policy,
            rule_type,
            custom_msg: None,
            comment: None,
            created_by: None,
            proposal_id: None,
        }
    }

    /// The rule a finalized proposal produces.
    pub fn from_proposal(proposal: &Proposal, policy: Policy) -> Self {
        Self {
            identifier: proposal.identifier.clone(),
            policy,
            rule_type: proposal.rule_type,
            custom_msg: proposal.custom_message.clone(),
            comment: None,
            created_by: Some(proposal.created_by),
            proposal_id: Some(proposal.id),
        }
    }

    /// Sets the block message.
    #[must_use]
    pub fn with_custom_msg(mut self, msg: impl Into<String>) -> Self {
        self.custom_msg = Some(msg.into());
        self
    }

    /// Sets the operator note.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_created_by(mut self, user_id: i64) -> Self {
        self.created_by = Some(user_id);
        self
    }
}

/// Optional filters for listing rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleFilter {
    /// Only rules with this policy.
    pub policy: Option<Policy>,
    /// Only rules of this type.
    pub rule_type: Option<RuleType>,
}

/// Optional filters for listing events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events reported by this device.
    pub device_id: Option<String>,
    /// Only events with this agent decision.
    pub decision: Option<String>,
}

/// One page of events, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPage {
    /// Events on this page.
    pub events: Vec<ExecutionEvent>,
    /// Events matching the filter across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

/// A stored execution event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEvent {
    /// Row id.
    pub id: i64,
    /// Reporting device.
    pub device_id: String,
    /// SHA-256 of the executed file.
    pub file_hash: String,
    /// Path of the executed file.
    pub file_path: Option<String>,
    /// File name.
    pub file_name: Option<String>,
    /// When it ran.
    pub execution_time: DateTime<Utc>,
    /// Agent decision.
    pub decision: Option<String>,
    /// User that ran it.
    pub executing_user: Option<String>,
    /// Signing certificate SHA-256.
    pub cert_sha256: Option<String>,
    /// Signing certificate common name.
    pub cert_cn: Option<String>,
    /// Team id.
    pub team_id: Option<String>,
    /// Signing id.
    pub signing_id: Option<String>,
    /// Code directory hash.
    pub cdhash: Option<String>,
    /// Bundle identifier.
    pub bundle_id: Option<String>,
    /// Bundle name.
    pub bundle_name: Option<String>,
    /// Bundle path.
    pub bundle_path: Option<String>,
    /// Quarantine source URL.
    pub quarantine_data_url: Option<String>,
}

impl ExecutionEvent {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            device_id: row.get("device_id")?,
            file_hash: row.get("file_hash")?,
            file_path: row.get("file_path")?,
            file_name: row.get("file_name")?,
            execution_time: row.get("execution_time")?,
            decision: row.get("decision")?,
            executing_user: row.get("executing_user")?,
            cert_sha256: row.get("cert_sha256")?,
            cert_cn: row.get("cert_cn")?,
            team_id: row.get("team_id")?,
            signing_id: row.get("signing_id")?,
            cdhash: row.get("cdhash")?,
            bundle_id: row.get("bundle_id")?,
            bundle_name: row.get("bundle_name")?,
            bundle_path: row.get("bundle_path")?,
            quarantine_data_url: row.get("quarantine_data_url")?,
        })
    }
}

/// Reads a text column holding a tag.
pub(crate) fn parse_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(column)?;
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Reads a nullable text column holding a tag.
pub(crate) fn parse_optional_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(column)?;
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ProposalStatus::Pending,
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ProposalStatus>().unwrap(), status);
        }
        assert!("DRAFT".parse::<ProposalStatus>().is_err());
        assert!(!ProposalStatus::Pending.is_final());
        assert!(ProposalStatus::Approved.is_final());
    }

    #[test]
    fn blank_update_is_empty() {
        let update = DeviceUpdate {
            hostname: Some("   ".into()),
            serial_num: Some(String::new()),
            ..Default::default()
        }
        .normalized();
        assert!(update.is_empty());
    }

    #[test]
    fn update_from_preflight() {
        let req = PreflightRequest::parse(
            br#"{"hostname": " build-07 ", "client_mode": 1, "os_build": ""}"#,
            "application/json",
        )
        .unwrap();
        let update = DeviceUpdate::from(&req);
        assert_eq!(update.hostname.as_deref(), Some("build-07"));
        assert_eq!(update.os_build, None);
        assert_eq!(update.client_mode, Some(ClientMode::Monitor));
    }
}
