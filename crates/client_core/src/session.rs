use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use shared::{
    domain::{Address, CandidateId, ElectionPhase, ElectionSnapshot, TxHash, TxKind, VoterRecord},
    error::ElectionError,
    protocol::ContractEvent,
};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    access::is_admin,
    config::Settings,
    countdown::{format_remaining, CountdownTicker},
    events::spawn_log_subscription,
    orchestrator::{LocalView, TransactionOrchestrator, TransactionRequest, TxEvent},
    rpc::JsonRpcElectionContract,
    view_model::ElectionView,
    ElectionContract, MissingElectionContract, MissingTransactionSender, TransactionSender,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Refreshed(ElectionView),
    RefreshFailed(String),
    Transaction(TransactionRequest),
    Contract(ContractEvent),
}

/// Latest phase seen this session; never moves backwards.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTracker(Option<ElectionPhase>);

impl PhaseTracker {
    pub fn observe(&mut self, phase: ElectionPhase) -> ElectionPhase {
        let next = self.0.map_or(phase, |seen| seen.max(phase));
        self.0 = Some(next);
        next
    }

    pub fn current(&self) -> Option<ElectionPhase> {
        self.0
    }
}

/// A flag that stays true once it has been observed true.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StickyFlag(bool);

impl StickyFlag {
    pub fn observe(&mut self, value: bool) -> bool {
        self.0 |= value;
        self.0
    }

    pub fn get(&self) -> bool {
        self.0
    }
}

#[derive(Default)]
struct SessionState {
    snapshot: Option<ElectionSnapshot>,
    phase: PhaseTracker,
    has_voted: StickyFlag,
}

/// One connected identity's view of the election.
///
/// Holds the last snapshot, the session-sticky flags derived from it and the
/// countdown, and routes user actions through the orchestrator.
pub struct ElectionSession {
    contract: Arc<dyn ElectionContract>,
    orchestrator: Arc<TransactionOrchestrator>,
    account: Option<Address>,
    tick_interval: Duration,
    state: RwLock<SessionState>,
    ticker: Mutex<Option<CountdownTicker>>,
    events: broadcast::Sender<SessionEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ElectionSession {
    pub fn new(
        contract: Arc<dyn ElectionContract>,
        orchestrator: Arc<TransactionOrchestrator>,
        account: Option<Address>,
        tick_interval: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            contract,
            orchestrator,
            account,
            tick_interval,
            state: RwLock::new(SessionState::default()),
            ticker: Mutex::new(None),
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Wires the JSON-RPC client when a contract address is configured.
    /// Without one the session still builds, and every read or action
    /// reports that no contract is configured.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Arc<Self>> {
        let account = settings.account()?;
        let (contract, sender): (Arc<dyn ElectionContract>, Arc<dyn TransactionSender>) =
            if settings.contract_address.is_some() {
                let rpc = Arc::new(JsonRpcElectionContract::from_settings(settings)?);
                let contract: Arc<dyn ElectionContract> = rpc.clone();
                (contract, rpc as Arc<dyn TransactionSender>)
            } else {
                warn!("session: no contract address configured");
                (Arc::new(MissingElectionContract), Arc::new(MissingTransactionSender))
            };
        let orchestrator = TransactionOrchestrator::from_settings(sender, settings);
        Ok(Self::new(contract, orchestrator, account, settings.tick_interval))
    }

    pub fn account(&self) -> Option<&Address> {
        self.account.as_ref()
    }

    pub fn orchestrator(&self) -> &Arc<TransactionOrchestrator> {
        &self.orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Re-reads the contract and recomputes the view from it.
    pub async fn refresh(&self) -> Result<ElectionView, ElectionError> {
        let fetched = tokio::try_join!(
            self.contract.snapshot(),
            self.contract.has_voted_for(self.account.as_ref()),
        );
        let (snapshot, has_voted) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!("session: refresh failed: {err}");
                let _ = self.events.send(SessionEvent::RefreshFailed(err.to_string()));
                return Err(err.into());
            }
        };

        let remaining_secs = snapshot.remaining_secs;
        let view = {
            let mut state = self.state.write().await;
            let phase = state.phase.observe(snapshot.phase());
            if let Some(has_voted) = has_voted {
                state.has_voted.observe(has_voted);
            }
            let view = ElectionView::from_snapshot(&snapshot, phase);
            state.snapshot = Some(snapshot);
            view
        };
        self.sync_ticker(view.phase, remaining_secs).await;

        let _ = self.events.send(SessionEvent::Refreshed(view.clone()));
        Ok(view)
    }

    async fn sync_ticker(&self, phase: ElectionPhase, remaining_secs: u64) {
        let mut ticker = self.ticker.lock().await;
        if phase != ElectionPhase::Active {
            if let Some(ticker) = ticker.take() {
                ticker.stop();
            }
            return;
        }
        let running = ticker.as_ref().is_some_and(CountdownTicker::is_running);
        if !running && remaining_secs > 0 {
            *ticker = Some(CountdownTicker::start(
                Arc::clone(&self.contract),
                remaining_secs,
                self.tick_interval,
            ));
        }
    }

    pub async fn snapshot(&self) -> Option<ElectionSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    pub async fn phase(&self) -> Option<ElectionPhase> {
        self.state.read().await.phase.current()
    }

    pub async fn view(&self) -> Option<ElectionView> {
        let state = self.state.read().await;
        let snapshot = state.snapshot.as_ref()?;
        let phase = state.phase.current()?;
        Some(ElectionView::from_snapshot(snapshot, phase))
    }

    pub async fn has_voted(&self) -> bool {
        self.state.read().await.has_voted.get()
    }

    /// The connected identity and its sticky has-voted flag.
    pub async fn voter(&self) -> Option<VoterRecord> {
        let address = self.account.clone()?;
        Some(VoterRecord {
            address,
            has_voted: self.has_voted().await,
        })
    }

    pub async fn is_admin(&self) -> bool {
        let state = self.state.read().await;
        is_admin(state.snapshot.as_ref().map(|s| &s.admin), self.account.as_ref())
    }

    pub async fn remaining_secs(&self) -> u64 {
        if let Some(ticker) = self.ticker.lock().await.as_ref() {
            return ticker.remaining();
        }
        self.state
            .read()
            .await
            .snapshot
            .as_ref()
            .map_or(0, |s| s.remaining_secs)
    }

    pub async fn countdown_label(&self) -> String {
        format_remaining(i64::try_from(self.remaining_secs().await).unwrap_or(i64::MAX))
    }

    pub async fn is_countdown_running(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(CountdownTicker::is_running)
    }

    async fn local_state(&self) -> Result<(ElectionSnapshot, ElectionPhase, bool), ElectionError> {
        let state = self.state.read().await;
        match (&state.snapshot, state.phase.current()) {
            (Some(snapshot), Some(phase)) => Ok((snapshot.clone(), phase, state.has_voted.get())),
            _ => Err(ElectionError::Validation(
                "election state has not been loaded yet".to_string(),
            )),
        }
    }

    pub async fn add_candidate(&self, name: &str) -> Result<TxHash, ElectionError> {
        let (snapshot, phase, has_voted) = self.local_state().await?;
        let view = LocalView::new(&snapshot, phase, has_voted);
        self.orchestrator.add_candidate(&view, name).await
    }

    pub async fn start_voting(&self, duration_days: u64) -> Result<TxHash, ElectionError> {
        self.orchestrator.start_voting(duration_days).await
    }

    pub async fn end_voting(&self) -> Result<TxHash, ElectionError> {
        self.orchestrator.end_voting().await
    }

    pub async fn cast_vote(&self, candidate_id: CandidateId) -> Result<TxHash, ElectionError> {
        let (snapshot, phase, has_voted) = self.local_state().await?;
        let view = LocalView::new(&snapshot, phase, has_voted);
        let tx_hash = self.orchestrator.cast_vote(&view, candidate_id).await?;
        self.mark_voted().await;
        Ok(tx_hash)
    }

    async fn mark_voted(&self) {
        self.state.write().await.has_voted.observe(true);
    }

    /// Refreshes whenever a transaction confirms and republishes request
    /// updates as session events.
    pub async fn spawn_refresh_listener(self: &Arc<Self>) {
        let mut tx_events = self.orchestrator.subscribe();
        let session = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let event = match tx_events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: transaction events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(session) = session.upgrade() else {
                    break;
                };
                match event {
                    TxEvent::Updated(request) => {
                        let _ = session.events.send(SessionEvent::Transaction(request));
                    }
                    TxEvent::RefreshRequested(kind) => {
                        if kind == TxKind::CastVote {
                            session.mark_voted().await;
                        }
                        info!(kind = %kind, "session: refreshing after confirmation");
                        let _ = session.refresh().await;
                    }
                }
            }
        });
        self.tasks.lock().await.push(task);
    }

    /// Subscribes to the contract's logs and refreshes on every event.
    pub async fn attach_event_feed(
        self: &Arc<Self>,
        ws_url: &str,
        contract: &Address,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = broadcast::channel(1024);
        let feed = spawn_log_subscription(ws_url, contract, tx).await?;
        let session: Weak<Self> = Arc::downgrade(self);
        let listener = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: contract events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.apply_contract_event(event).await;
            }
        });
        self.tasks.lock().await.extend([feed, listener]);
        Ok(())
    }

    async fn apply_contract_event(&self, event: ContractEvent) {
        if let ContractEvent::VoteCast { voter, .. } = &event {
            if self.account.as_ref() == Some(voter) {
                self.mark_voted().await;
            }
        }
        info!(event = event.name(), "session: refreshing after contract event");
        let _ = self.events.send(SessionEvent::Contract(event));
        let _ = self.refresh().await;
    }

    /// Stops the countdown and every background task owned by the session.
    pub async fn shutdown(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.stop();
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        info!("session: shut down");
    }
}

impl Drop for ElectionSession {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
