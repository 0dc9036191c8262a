//! Concurrency tests for voting and finalization over a shared store.

use fleetgate_core::{ProposalStatus, RuleFilter};
use fleetgate_governance::{
    FinalizeOutcome, Governance, GovernanceConfig, SqliteGovernanceStore, VoteError,
};
use fleetgate_protocol::Policy;
use fleetgate_testkit::{scenarios, TestDatabase};
use std::sync::{Arc, Barrier};
use std::thread;

fn governance_on(db: fleetgate_core::Database, threshold: u32) -> Governance<SqliteGovernanceStore> {
    Governance::new(
        SqliteGovernanceStore::new(db),
        GovernanceConfig::new().with_vote_threshold(threshold),
    )
}

#[test]
fn concurrent_threshold_votes_finalize_once() {
    const THRESHOLD: u32 = 5;
    let test_db = TestDatabase::file();
    let proposal_id = scenarios::pending_proposal(&test_db, &scenarios::sha256_of(1), 1);

    // Seed THRESHOLD - 1 ballots so that every racing vote crosses the line.
    let seed = governance_on(test_db.connect(), THRESHOLD);
    for voter in 1..i64::from(THRESHOLD) {
        assert!(seed.submit_vote(voter, proposal_id, "ALLOW").unwrap().finalized.is_none());
    }

    let racers = 8;
    let barrier = Arc::new(Barrier::new(racers));
    let handles: Vec<_> = (0..racers)
        .map(|i| {
            let governance = governance_on(test_db.connect(), THRESHOLD);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                governance.submit_vote(100 + i as i64, proposal_id, "ALLOW")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // A racer that arrives after the transition is turned away, never
    // half-applied.
    let mut winners = 0;
    for result in &results {
        match result {
            Ok(receipt) => {
                if matches!(receipt.finalized, Some(FinalizeOutcome::Finalized { .. })) {
                    winners += 1;
                }
            }
            Err(VoteError::InvalidState { status, .. }) => {
                assert_eq!(*status, ProposalStatus::Approved);
            }
            Err(e) => panic!("unexpected vote error: {e}"),
        }
    }
    assert_eq!(winners, 1);

    let rules = test_db.list_rules(RuleFilter::default()).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].proposal_id, Some(proposal_id));
    assert_eq!(rules[0].policy, Policy::Allow);
    assert_eq!(
        test_db.get_proposal(proposal_id).unwrap().status,
        ProposalStatus::Approved
    );
}

#[test]
fn concurrent_admin_overrides_finalize_once() {
    let test_db = TestDatabase::file();
    let proposal_id = scenarios::pending_proposal(&test_db, &scenarios::sha256_of(2), 1);

    let racers = 6;
    let barrier = Arc::new(Barrier::new(racers));
    let handles: Vec<_> = (0..racers)
        .map(|i| {
            let governance = governance_on(test_db.connect(), 3);
            let barrier = Arc::clone(&barrier);
            let policy = if i % 2 == 0 { Policy::Allow } else { Policy::Block };
            thread::spawn(move || {
                barrier.wait();
                governance.finalize(proposal_id, policy).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let created: Vec<i64> = outcomes.iter().filter_map(FinalizeOutcome::rule_id).collect();
    assert_eq!(created.len(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, FinalizeOutcome::AlreadyFinalized { status: ProposalStatus::Approved }))
            .count(),
        racers - 1
    );

    let rule = test_db.get_rule(created[0]).unwrap();
    assert_eq!(rule.proposal_id, Some(proposal_id));
    assert_eq!(test_db.list_rules(RuleFilter::default()).unwrap().len(), 1);
}

#[test]
fn concurrent_revotes_keep_one_row_per_voter() {
    let test_db = TestDatabase::file();
    let proposal_id = scenarios::pending_proposal(&test_db, &scenarios::sha256_of(3), 1);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let governance = governance_on(test_db.connect(), 100);
            thread::spawn(move || {
                for round in 0..10 {
                    let side = if (round + i) % 2 == 0 { "ALLOW" } else { "BLOCK" };
                    governance.submit_vote(42, proposal_id, side).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let votes = test_db.votes_for(proposal_id).unwrap();
    assert_eq!(votes.len(), 1);
    let proposal = test_db.get_proposal(proposal_id).unwrap();
    assert_eq!(proposal.allow_votes + proposal.block_votes, 1);
}

#[test]
fn end_to_end_threshold_three() {
    let test_db = TestDatabase::memory();
    let proposal_id = scenarios::pending_proposal(&test_db, &scenarios::sha256_of(4), 9);
    let governance = governance_on(test_db.db.clone(), 3);

    for voter in [11, 12] {
        governance.submit_vote(voter, proposal_id, "ALLOW").unwrap();
    }
    assert_eq!(
        test_db.get_proposal(proposal_id).unwrap().status,
        ProposalStatus::Pending
    );

    let receipt = governance.submit_vote(13, proposal_id, "ALLOW").unwrap();
    assert_eq!(receipt.tally.allow, 3);
    assert!(receipt.finalized.and_then(|o| o.rule_id()).is_some());

    let page = test_db.rules_after(0, 100).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].identifier, scenarios::sha256_of(4));
    assert_eq!(page[0].policy, Policy::Allow);

    assert!(governance.submit_vote(14, proposal_id, "BLOCK").is_err());
}
