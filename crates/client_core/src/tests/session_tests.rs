use std::sync::atomic::Ordering;

use shared::domain::{TxStatus, VotingWindow, Winner};

use super::*;
use crate::{
    fakes::{addr, candidate, snapshot, FakeContract, FakeSender},
    RemoteError,
};

fn session_for(
    contract: Arc<FakeContract>,
    sender: Arc<FakeSender>,
    account: Option<Address>,
) -> Arc<ElectionSession> {
    let orchestrator =
        TransactionOrchestrator::new(sender, Duration::from_secs(5), Duration::from_secs(5));
    ElectionSession::new(contract, orchestrator, account, Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn refresh_builds_view_and_admin_flag() {
    let mut state = snapshot(vec![candidate(1, "A", 3), candidate(2, "B", 5)], true);
    state.winner = Winner {
        candidate_id: CandidateId(2),
        vote_count: 5,
    };
    let contract = FakeContract::new(state);
    let session = session_for(contract, FakeSender::ok(), Some(addr(0xaa)));

    let view = session.refresh().await.expect("refresh");
    assert_eq!(view.phase, ElectionPhase::Active);
    assert_eq!(view.leader_label(), "B");
    assert!(session.is_admin().await);
    assert!(!session.has_voted().await);
    assert_eq!(session.countdown_label().await, "7d 0h 0m 0s");
    assert!(session.is_countdown_running().await);
}

#[tokio::test(start_paused = true)]
async fn has_voted_stays_true_once_observed() {
    let contract = FakeContract::new(snapshot(vec![candidate(1, "A", 1)], true));
    contract.voted.lock().await.insert(addr(0x01));
    let session = session_for(contract.clone(), FakeSender::ok(), Some(addr(0x01)));

    session.refresh().await.expect("refresh");
    assert!(session.has_voted().await);

    contract.voted.lock().await.clear();
    session.refresh().await.expect("refresh");
    assert!(session.has_voted().await);
    assert_eq!(
        session.voter().await,
        Some(VoterRecord {
            address: addr(0x01),
            has_voted: true,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn observed_phase_never_regresses() {
    let contract = FakeContract::new(snapshot(vec![], true));
    let session = session_for(contract.clone(), FakeSender::ok(), None);
    assert_eq!(session.phase().await, None);

    session.refresh().await.expect("refresh");
    assert_eq!(session.phase().await, Some(ElectionPhase::Active));

    {
        let mut state = contract.state.lock().await;
        state.voting_status = false;
        state.window = VotingWindow { start: 0, end: 0 };
    }
    let view = session.refresh().await.expect("refresh");
    assert_eq!(view.phase, ElectionPhase::Active);

    contract.state.lock().await.window = VotingWindow {
        start: 1_700_000_000,
        end: 1_700_604_800,
    };
    let view = session.refresh().await.expect("refresh");
    assert_eq!(view.phase, ElectionPhase::Ended);
    assert_eq!(session.phase().await, Some(ElectionPhase::Ended));
}

#[tokio::test(start_paused = true)]
async fn countdown_stops_when_voting_ends() {
    let contract = FakeContract::new(snapshot(vec![], true));
    let session = session_for(contract.clone(), FakeSender::ok(), None);

    session.refresh().await.expect("refresh");
    assert!(session.is_countdown_running().await);

    {
        let mut state = contract.state.lock().await;
        state.voting_status = false;
        state.remaining_secs = 0;
    }
    session.refresh().await.expect("refresh");
    assert!(!session.is_countdown_running().await);
    assert_eq!(session.countdown_label().await, "Ended");
}

#[tokio::test]
async fn absent_account_never_queries_has_voted() {
    let contract = FakeContract::new(snapshot(vec![], false));
    let session = session_for(contract.clone(), FakeSender::ok(), None);

    session.refresh().await.expect("refresh");
    assert_eq!(contract.has_voted_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.voter().await, None);
    assert!(!session.is_admin().await);
    assert!(!session.is_countdown_running().await);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_snapshot() {
    let contract = FakeContract::new(snapshot(vec![candidate(1, "A", 0)], false));
    let session = session_for(contract.clone(), FakeSender::ok(), None);
    let mut events = session.subscribe();

    session.refresh().await.expect("refresh");
    *contract.fail_with.lock().await = Some(RemoteError::Unavailable("node down".into()));

    let err = session.refresh().await.expect_err("unavailable");
    assert!(matches!(err, ElectionError::NetworkUnavailable(_)));
    assert_eq!(
        session.snapshot().await.expect("kept").candidates,
        vec![candidate(1, "A", 0)]
    );

    assert!(matches!(events.recv().await, Ok(SessionEvent::Refreshed(_))));
    assert!(matches!(
        events.recv().await,
        Ok(SessionEvent::RefreshFailed(_))
    ));
}

#[tokio::test]
async fn actions_need_loaded_state() {
    let contract = FakeContract::new(snapshot(vec![candidate(1, "A", 0)], true));
    let sender = FakeSender::ok();
    let session = session_for(contract, sender.clone(), Some(addr(0x01)));

    let err = session.cast_vote(CandidateId(1)).await.expect_err("not loaded");
    assert!(matches!(err, ElectionError::Validation(_)));
    let err = session.add_candidate("X").await.expect_err("not loaded");
    assert!(matches!(err, ElectionError::Validation(_)));
    assert_eq!(sender.call_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn confirmed_vote_refreshes_and_blocks_second_vote() {
    let contract = FakeContract::new(snapshot(vec![candidate(1, "A", 0)], true));
    let sender = FakeSender::ok();
    let session = session_for(contract.clone(), sender.clone(), Some(addr(0x01)));
    session.spawn_refresh_listener().await;
    session.refresh().await.expect("refresh");
    let mut events = session.subscribe();

    session.cast_vote(CandidateId(1)).await.expect("vote");
    assert!(session.has_voted().await);
    assert_eq!(
        session.orchestrator().status(TxKind::CastVote).await,
        TxStatus::Confirmed
    );

    let refreshed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(SessionEvent::Refreshed(_)) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(refreshed.is_ok());
    // The fake contract never records the vote; the flag must survive the refresh.
    assert!(session.has_voted().await);

    let err = session.cast_vote(CandidateId(1)).await.expect_err("second vote");
    assert!(matches!(err, ElectionError::Validation(_)));
    assert_eq!(sender.call_count().await, 1);

    session.shutdown().await;
    assert!(!session.is_countdown_running().await);
}

#[tokio::test]
async fn own_vote_event_marks_session_voted() {
    let contract = FakeContract::new(snapshot(vec![candidate(1, "A", 0)], true));
    let session = session_for(contract, FakeSender::ok(), Some(addr(0x01)));

    session
        .apply_contract_event(ContractEvent::VoteCast {
            voter: addr(0x02),
            candidate_id: CandidateId(1),
        })
        .await;
    assert!(!session.has_voted().await);

    session
        .apply_contract_event(ContractEvent::VoteCast {
            voter: addr(0x01),
            candidate_id: CandidateId(1),
        })
        .await;
    assert!(session.has_voted().await);
    session.shutdown().await;
}

#[tokio::test]
async fn session_without_contract_address_reports_unconfigured() {
    let settings = Settings {
        account: Some("0x0101010101010101010101010101010101010101".into()),
        ..Settings::default()
    };
    let session = ElectionSession::from_settings(&settings).expect("session");
    assert_eq!(session.account(), Some(&addr(0x01)));

    let err = session.refresh().await.expect_err("no contract");
    assert!(matches!(err, ElectionError::NetworkUnavailable(_)));
    assert!(session.snapshot().await.is_none());

    let err = session.end_voting().await.expect_err("no sender");
    assert!(matches!(err, ElectionError::NetworkUnavailable(_)));
    assert_eq!(
        session.orchestrator().status(TxKind::EndVoting).await,
        TxStatus::Failed
    );
}

#[test]
fn trackers_are_monotonic() {
    let mut phase = PhaseTracker::default();
    assert_eq!(phase.observe(ElectionPhase::Active), ElectionPhase::Active);
    assert_eq!(phase.observe(ElectionPhase::NotStarted), ElectionPhase::Active);
    assert_eq!(phase.observe(ElectionPhase::Ended), ElectionPhase::Ended);

    let mut flag = StickyFlag::default();
    assert!(!flag.observe(false));
    assert!(flag.observe(true));
    assert!(flag.observe(false));
}
