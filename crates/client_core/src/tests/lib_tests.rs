use std::sync::atomic::Ordering;

use shared::{domain::ElectionPhase, error::ErrorCode};

use super::*;
use crate::fakes::{addr, candidate, snapshot, tx_hash, FakeContract};

#[tokio::test]
async fn has_voted_for_absent_voter_makes_no_call() {
    let contract = FakeContract::new(snapshot(vec![], true));
    contract.voted.lock().await.insert(addr(0x01));

    assert_eq!(contract.has_voted_for(None).await.expect("none"), None);
    assert_eq!(contract.has_voted_calls.load(Ordering::SeqCst), 0);

    assert_eq!(
        contract.has_voted_for(Some(&addr(0x01))).await.expect("some"),
        Some(true)
    );
    assert_eq!(contract.has_voted_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn snapshot_collects_every_query() {
    let contract = FakeContract::new(snapshot(vec![candidate(1, "A", 2)], true));
    let snapshot = contract.snapshot().await.expect("snapshot");

    assert_eq!(snapshot.admin, addr(0xaa));
    assert_eq!(snapshot.candidates, vec![candidate(1, "A", 2)]);
    assert!(snapshot.voting_status);
    assert_eq!(snapshot.remaining_secs, 604_800);
    assert_eq!(snapshot.phase(), ElectionPhase::Active);
}

#[tokio::test]
async fn snapshot_fails_when_any_part_fails() {
    let contract = FakeContract::new(snapshot(vec![], true));
    contract
        .script_remaining([Err(RemoteError::Corrupt("bad word".into()))])
        .await;

    let err = contract.snapshot().await.expect_err("corrupt");
    assert_eq!(err, RemoteError::Corrupt("bad word".into()));
}

#[tokio::test]
async fn missing_implementations_report_unavailable() {
    let contract = MissingElectionContract;
    assert!(matches!(
        contract.voting_status().await,
        Err(RemoteError::Unavailable(_))
    ));
    assert_eq!(contract.has_voted_for(None).await.expect("none"), None);

    let sender = MissingTransactionSender;
    let err = sender
        .submit(&ElectionCall::EndVoting)
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ErrorCode::NetworkUnavailable);
    let err = sender
        .wait_for_confirmation(&tx_hash(1))
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ErrorCode::NetworkUnavailable);
}

#[test]
fn remote_errors_map_to_election_errors() {
    let err: ElectionError = RemoteError::Unavailable("timeout".into()).into();
    assert_eq!(err.code(), ErrorCode::NetworkUnavailable);
    let err: ElectionError = RemoteError::Corrupt("short".into()).into();
    assert_eq!(err.code(), ErrorCode::Corrupt);
    let err: ElectionError =
        RemoteError::Rejected(ElectionError::StateConflict("reverted".into())).into();
    assert_eq!(err.code(), ErrorCode::StateConflict);
    let err: ElectionError =
        RemoteError::Rejected(ElectionError::InvalidInput("bad id".into())).into();
    assert_eq!(err, ElectionError::InvalidInput("bad id".into()));
}

#[test]
fn calls_know_their_kind() {
    assert_eq!(
        ElectionCall::Vote {
            candidate_id: CandidateId(3)
        }
        .kind(),
        TxKind::CastVote
    );
    assert_eq!(
        ElectionCall::StartVoting { duration_secs: 86_400 }.to_string(),
        "startVoting(86400)"
    );
    assert_eq!(
        ElectionCall::AddCandidate {
            name: "Alice".into()
        }
        .to_string(),
        "addCandidate(\"Alice\")"
    );
}
