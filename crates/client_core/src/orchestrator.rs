use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use shared::{
    domain::{Candidate, CandidateId, ElectionPhase, ElectionSnapshot, TxHash, TxKind, TxStatus},
    error::ElectionError,
};
use tokio::{sync::broadcast, sync::Mutex, time::timeout};
use tracing::{info, warn};

use crate::{config::Settings, ElectionCall, TransactionSender};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// What the client last observed, used for advisory checks before submitting.
#[derive(Debug, Clone, Copy)]
pub struct LocalView<'a> {
    pub phase: ElectionPhase,
    pub candidates: &'a [Candidate],
    pub has_voted: bool,
}

impl<'a> LocalView<'a> {
    pub fn new(snapshot: &'a ElectionSnapshot, phase: ElectionPhase, has_voted: bool) -> Self {
        Self {
            phase,
            candidates: &snapshot.candidates,
            has_voted,
        }
    }

    fn contains_candidate(&self, id: CandidateId) -> bool {
        self.candidates.iter().any(|c| c.id == id)
    }
}

/// Lifecycle record of the latest request of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub kind: TxKind,
    pub status: TxStatus,
    pub error: Option<ElectionError>,
    pub tx_hash: Option<TxHash>,
}

impl TransactionRequest {
    pub fn new(kind: TxKind) -> Self {
        Self {
            kind,
            status: TxStatus::Idle,
            error: None,
            tx_hash: None,
        }
    }

    fn transition(&mut self, to: TxStatus) -> Result<(), ElectionError> {
        use TxStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Idle | Confirmed | Failed, Pending)
                | (Pending, Confirming)
                | (Confirming, Confirmed)
                | (Pending | Confirming, Failed)
        );
        if allowed {
            self.status = to;
            return Ok(());
        }
        if to == Pending {
            return Err(ElectionError::AlreadyPending(self.kind));
        }
        Err(ElectionError::StateConflict(format!(
            "{} request cannot move from {:?} to {to:?}",
            self.kind, self.status
        )))
    }

    /// Starts a new attempt, clearing the outcome of the previous one.
    pub fn begin(&mut self) -> Result<(), ElectionError> {
        self.transition(TxStatus::Pending)?;
        self.error = None;
        self.tx_hash = None;
        Ok(())
    }

    pub fn broadcast(&mut self, tx_hash: TxHash) -> Result<(), ElectionError> {
        self.transition(TxStatus::Confirming)?;
        self.tx_hash = Some(tx_hash);
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), ElectionError> {
        self.transition(TxStatus::Confirmed)
    }

    pub fn fail(&mut self, error: ElectionError) -> Result<(), ElectionError> {
        self.transition(TxStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Feedback line for the current status, if there is one to show.
    pub fn label(&self) -> Option<String> {
        match self.status {
            TxStatus::Idle => None,
            TxStatus::Pending | TxStatus::Confirming => Some(self.kind.pending_label().to_string()),
            TxStatus::Confirmed => Some(self.kind.success_label().to_string()),
            TxStatus::Failed => self.error.as_ref().map(ElectionError::message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    Updated(TransactionRequest),
    /// A request confirmed; remote state has changed and should be re-read.
    RefreshRequested(TxKind),
}

pub fn parse_duration_days(raw: &str) -> Result<u64, ElectionError> {
    let days = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ElectionError::Validation(format!("duration must be a whole number of days: {raw:?}")))?;
    duration_secs(days).map(|_| days)
}

fn duration_secs(days: u64) -> Result<u64, ElectionError> {
    if days == 0 {
        return Err(ElectionError::Validation(
            "duration must be at least 1 day".to_string(),
        ));
    }
    days.checked_mul(SECONDS_PER_DAY)
        .ok_or_else(|| ElectionError::Validation(format!("duration of {days} days is too long")))
}

/// Drives the four state-changing calls, one in flight per kind.
///
/// Local checks run before anything is sent and reject with `Validation` or
/// `AlreadyPending`. Once submitted, a request runs on its own task so that
/// dropping the caller never strands it in a non-terminal state.
pub struct TransactionOrchestrator {
    sender: Arc<dyn TransactionSender>,
    requests: Mutex<HashMap<TxKind, TransactionRequest>>,
    events: broadcast::Sender<TxEvent>,
    submit_timeout: Duration,
    confirm_timeout: Duration,
}

impl TransactionOrchestrator {
    pub fn new(
        sender: Arc<dyn TransactionSender>,
        submit_timeout: Duration,
        confirm_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            sender,
            requests: Mutex::new(HashMap::new()),
            events,
            submit_timeout,
            confirm_timeout,
        })
    }

    pub fn from_settings(sender: Arc<dyn TransactionSender>, settings: &Settings) -> Arc<Self> {
        Self::new(sender, settings.request_timeout, settings.receipt_timeout)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }

    pub async fn request(&self, kind: TxKind) -> TransactionRequest {
        self.requests
            .lock()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| TransactionRequest::new(kind))
    }

    pub async fn status(&self, kind: TxKind) -> TxStatus {
        self.request(kind).await.status
    }

    pub fn can_end_voting(phase: ElectionPhase) -> bool {
        phase == ElectionPhase::Active
    }

    pub fn can_add_candidate(phase: ElectionPhase) -> bool {
        phase == ElectionPhase::NotStarted
    }

    pub async fn add_candidate(
        self: &Arc<Self>,
        view: &LocalView<'_>,
        name: &str,
    ) -> Result<TxHash, ElectionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ElectionError::Validation(
                "candidate name must not be empty".to_string(),
            ));
        }
        if !Self::can_add_candidate(view.phase) {
            return Err(ElectionError::Validation(format!(
                "candidates can only be added before voting starts (voting is {})",
                view.phase
            )));
        }
        self.execute(ElectionCall::AddCandidate {
            name: name.to_string(),
        })
        .await
    }

    pub async fn start_voting(self: &Arc<Self>, duration_days: u64) -> Result<TxHash, ElectionError> {
        let duration_secs = duration_secs(duration_days)?;
        self.execute(ElectionCall::StartVoting { duration_secs }).await
    }

    pub async fn end_voting(self: &Arc<Self>) -> Result<TxHash, ElectionError> {
        self.execute(ElectionCall::EndVoting).await
    }

    pub async fn cast_vote(
        self: &Arc<Self>,
        view: &LocalView<'_>,
        candidate_id: CandidateId,
    ) -> Result<TxHash, ElectionError> {
        if !view.contains_candidate(candidate_id) {
            return Err(ElectionError::Validation(format!(
                "unknown candidate {candidate_id}"
            )));
        }
        if view.phase != ElectionPhase::Active {
            return Err(ElectionError::Validation(format!(
                "votes can only be cast while voting is active (voting is {})",
                view.phase
            )));
        }
        if view.has_voted {
            return Err(ElectionError::Validation(
                "this account has already voted".to_string(),
            ));
        }
        self.execute(ElectionCall::Vote { candidate_id }).await
    }

    async fn execute(self: &Arc<Self>, call: ElectionCall) -> Result<TxHash, ElectionError> {
        let kind = call.kind();
        self.update(kind, TransactionRequest::begin).await?;

        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(call).await })
            .await
            .map_err(|err| {
                ElectionError::NetworkUnavailable(format!("{kind} request task ended: {err}"))
            })?
    }

    async fn drive(&self, call: ElectionCall) -> Result<TxHash, ElectionError> {
        let kind = call.kind();
        info!(kind = %kind, call = %call, "tx: submitting");

        let submitted = bounded(self.submit_timeout, "signer", self.sender.submit(&call)).await;
        let tx_hash = match submitted {
            Ok(tx_hash) => tx_hash,
            Err(err) => return Err(self.fail(kind, err).await),
        };
        self.update(kind, |r| r.broadcast(tx_hash.clone())).await?;
        info!(kind = %kind, tx_hash = %tx_hash, "tx: broadcast, awaiting confirmation");

        let confirmed = bounded(
            self.confirm_timeout,
            "confirmation",
            self.sender.wait_for_confirmation(&tx_hash),
        )
        .await;
        if let Err(err) = confirmed {
            return Err(self.fail(kind, err).await);
        }
        self.update(kind, TransactionRequest::confirm).await?;
        info!(kind = %kind, tx_hash = %tx_hash, "tx: confirmed");

        let _ = self.events.send(TxEvent::RefreshRequested(kind));
        Ok(tx_hash)
    }

    async fn update(
        &self,
        kind: TxKind,
        apply: impl FnOnce(&mut TransactionRequest) -> Result<(), ElectionError>,
    ) -> Result<(), ElectionError> {
        let updated = {
            let mut requests = self.requests.lock().await;
            let request = requests
                .entry(kind)
                .or_insert_with(|| TransactionRequest::new(kind));
            apply(request)?;
            request.clone()
        };
        let _ = self.events.send(TxEvent::Updated(updated));
        Ok(())
    }

    async fn fail(&self, kind: TxKind, err: ElectionError) -> ElectionError {
        warn!(kind = %kind, code = ?err.code(), "tx: failed: {err}");
        if let Err(transition) = self.update(kind, |r| r.fail(err.clone())).await {
            warn!(kind = %kind, "tx: could not record failure: {transition}");
        }
        err
    }
}

async fn bounded<T>(
    limit: Duration,
    stage: &str,
    fut: impl Future<Output = Result<T, ElectionError>>,
) -> Result<T, ElectionError> {
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ElectionError::NetworkUnavailable(format!(
            "{stage} did not respond within {limit:?}"
        ))),
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
