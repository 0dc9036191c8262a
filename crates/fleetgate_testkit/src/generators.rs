//! Property-based test generators using proptest.
//!
//! Provides strategies for generating agent-shaped test data.

use fleetgate_protocol::{ClientMode, Policy, RuleType, VoteType};
use proptest::prelude::*;

/// Strategy for lower-case SHA-256 hex digests.
pub fn sha256_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{64}").expect("Invalid regex")
}

/// Strategy for device identifiers as agents generate them.
pub fn device_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-F0-9]{8}-[A-F0-9]{4}-[A-F0-9]{4}-[A-F0-9]{4}-[A-F0-9]{12}")
        .expect("Invalid regex")
}

/// Strategy for rule policies.
pub fn policy_strategy() -> impl Strategy<Value = Policy> {
    prop::sample::select(Policy::ALL.to_vec())
}

/// Strategy for rule types.
pub fn rule_type_strategy() -> impl Strategy<Value = RuleType> {
    prop::sample::select(RuleType::ALL.to_vec())
}

/// Strategy for ballots.
pub fn vote_type_strategy() -> impl Strategy<Value = VoteType> {
    prop::sample::select(VoteType::ALL.to_vec())
}

/// Strategy for a `client_mode` value in any encoding agents use,
/// paired with the mode it should normalize to.
pub fn client_mode_value_strategy() -> impl Strategy<Value = (serde_json::Value, Option<ClientMode>)>
{
    prop_oneof![
        Just((serde_json::json!("MONITOR"), Some(ClientMode::Monitor))),
        Just((serde_json::json!("lockdown"), Some(ClientMode::Lockdown))),
        Just((serde_json::json!(1), Some(ClientMode::Monitor))),
        Just((serde_json::json!(2), Some(ClientMode::Lockdown))),
        Just((serde_json::json!("2"), Some(ClientMode::Lockdown))),
        Just((serde_json::json!(7), None)),
        Just((serde_json::json!(""), None)),
        Just((serde_json::Value::Null, None)),
    ]
}

/// Strategy for an optional telemetry string, including blanks.
pub fn telemetry_field_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some(String::new())),
        prop::string::string_regex("[A-Za-z0-9 .,_-]{1,24}")
            .expect("Invalid regex")
            .prop_map(Some),
    ]
}

/// Strategy for a sequence of voter ballots on one proposal.
pub fn ballots_strategy(max_voters: i64) -> impl Strategy<Value = Vec<(i64, VoteType)>> {
    prop::collection::vec((1..=max_voters, vote_type_strategy()), 0..24)
}
