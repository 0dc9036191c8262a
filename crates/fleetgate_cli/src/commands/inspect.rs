//! Inspect command implementation.

use super::{open_store, CommandResult};
use fleetgate_core::{Device, Proposal, Rule, Vote};
use serde::Serialize;
use std::path::Path;

/// A proposal with its live ballots.
#[derive(Debug, Serialize)]
pub struct ProposalReport {
    /// The proposal.
    #[serde(flatten)]
    pub proposal: Proposal,
    /// Every live vote.
    pub votes: Vec<Vote>,
}

/// A page of rules as an agent would receive it.
#[derive(Debug, Serialize)]
pub struct RulePage {
    /// Rules in ascending id order.
    pub rules: Vec<Rule>,
    /// Cursor for the next page, when the page was full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<i64>,
}

fn print_json<T: Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

/// Shows one device, or every device when `id` is `None`.
pub fn device(path: &Path, id: Option<&str>, json: bool) -> CommandResult {
    let db = open_store(path)?;
    let devices = match id {
        Some(id) => vec![db.get_device(id)?],
        None => db.list_devices()?,
    };
    if json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("No devices");
    }
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

fn print_device(device: &Device) {
    println!("Device {}", device.id);
    println!("  Hostname:       {}", or_dash(&device.hostname));
    println!("  Serial:         {}", or_dash(&device.serial_num));
    println!("  Primary user:   {}", or_dash(&device.primary_user));
    println!(
        "  OS:             {} ({})",
        or_dash(&device.os_version),
        or_dash(&device.os_build)
    );
    println!("  Agent version:  {}", or_dash(&device.santa_version));
    println!("  Model:          {}", or_dash(&device.model_identifier));
    println!(
        "  Mode:           {}",
        device.client_mode.map(|m| m.as_str()).unwrap_or("-")
    );
    println!("  Enrolled:       {}", device.enrolled_at.to_rfc3339());
    println!(
        "  Last preflight: {}",
        device
            .last_preflight_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into())
    );
    println!(
        "  Last sync:      {}",
        device
            .last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".into())
    );
}

/// Shows a proposal and its votes.
pub fn proposal(path: &Path, id: i64, json: bool) -> CommandResult {
    let db = open_store(path)?;
    let report = ProposalReport {
        proposal: db.get_proposal(id)?,
        votes: db.votes_for(id)?,
    };
    if json {
        return print_json(&report);
    }

    let p = &report.proposal;
    println!("Proposal {}", p.id);
    println!("  Identifier: {} ({})", p.identifier, p.rule_type);
    println!("  Proposed:   {}", p.proposed_policy);
    println!("  Status:     {}", p.status);
    println!("  Votes:      {} allow / {} block", p.allow_votes, p.block_votes);
    println!("  Created by: {} at {}", p.created_by, p.created_at.to_rfc3339());
    if let Some(message) = &p.custom_message {
        println!("  Message:    {message}");
    }
    if let Some(at) = p.finalized_at {
        println!("  Finalized:  {}", at.to_rfc3339());
    }
    for vote in &report.votes {
        println!("    voter {:>6}  {}", vote.voter_id, vote.vote_type);
    }
    Ok(())
}

/// Shows the page of rules after `cursor`.
pub fn rules(path: &Path, cursor: i64, limit: usize, json: bool) -> CommandResult {
    let db = open_store(path)?;
    let limit = limit.max(1);
    let rules = db.rules_after(cursor, limit)?;
    let page = RulePage {
        cursor: if rules.len() == limit {
            rules.last().map(|r| r.id)
        } else {
            None
        },
        rules,
    };
    if json {
        return print_json(&page);
    }

    println!("{:>6}  {:<10}  {:<12}  IDENTIFIER", "ID", "POLICY", "TYPE");
    for rule in &page.rules {
        println!(
            "{:>6}  {:<10}  {:<12}  {}",
            rule.id,
            rule.policy.as_str(),
            rule.rule_type.as_str(),
            rule.identifier
        );
    }
    match page.cursor {
        Some(next) => println!("More rules follow; continue with --cursor {next}"),
        None => println!("{} rule(s), end of list", page.rules.len()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::{DeviceUpdate, NewRule};
    use fleetgate_protocol::{Policy, RuleType};

    #[test]
    fn inspect_reads_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let db = open_store(&path).unwrap();
        db.merge_device(
            "dev-1",
            &DeviceUpdate {
                hostname: Some("host".into()),
                ..DeviceUpdate::default()
            },
        )
        .unwrap();
        db.create_rule(&NewRule::manual("abc", Policy::Allow, RuleType::Binary))
            .unwrap();

        device(&path, Some("dev-1"), false).unwrap();
        device(&path, None, true).unwrap();
        rules(&path, 0, 1, false).unwrap();
        rules(&path, 0, 10, true).unwrap();
        assert!(device(&path, Some("missing"), false).is_err());
        assert!(proposal(&path, 1, false).is_err());
    }
}
