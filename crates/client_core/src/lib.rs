use std::fmt;

use async_trait::async_trait;
use shared::{
    domain::{
        Address, Candidate, CandidateId, ElectionSnapshot, TxHash, TxKind, VotingWindow, Winner,
    },
    error::ElectionError,
};
use thiserror::Error;

pub mod abi;
pub mod access;
pub mod config;
pub mod countdown;
pub mod events;
pub mod orchestrator;
pub mod rpc;
pub mod session;
pub mod view_model;

pub use access::is_admin;
pub use countdown::{format_remaining, CountdownTicker};
pub use orchestrator::{LocalView, TransactionOrchestrator, TransactionRequest, TxEvent};
pub use rpc::JsonRpcElectionContract;
pub use session::{ElectionSession, SessionEvent};
pub use view_model::{CandidateRow, ElectionView};

/// Why a read against the contract did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt remote response: {0}")]
    Corrupt(String),
    #[error("remote rejected query: {0}")]
    Rejected(ElectionError),
}

impl From<RemoteError> for ElectionError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::Unavailable(message) => ElectionError::NetworkUnavailable(message),
            RemoteError::Corrupt(message) => ElectionError::Corrupt(message),
            RemoteError::Rejected(error) => error,
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Read-only view of the deployed election contract.
///
/// Every method is a single idempotent query; implementations never retry.
#[async_trait]
pub trait ElectionContract: Send + Sync {
    async fn admin(&self) -> RemoteResult<Address>;
    async fn all_candidates(&self) -> RemoteResult<Vec<Candidate>>;
    async fn candidate(&self, id: CandidateId) -> RemoteResult<Candidate>;
    async fn candidate_count(&self) -> RemoteResult<u64>;
    async fn remaining_time(&self) -> RemoteResult<u64>;
    async fn voting_status(&self) -> RemoteResult<bool>;
    async fn voting_window(&self) -> RemoteResult<VotingWindow>;
    async fn winner(&self) -> RemoteResult<Winner>;
    async fn has_voted(&self, voter: &Address) -> RemoteResult<bool>;

    /// Skips the query entirely when no identity is connected.
    async fn has_voted_for(&self, voter: Option<&Address>) -> RemoteResult<Option<bool>> {
        match voter {
            Some(voter) => self.has_voted(voter).await.map(Some),
            None => Ok(None),
        }
    }

    async fn snapshot(&self) -> RemoteResult<ElectionSnapshot> {
        let (admin, candidates, winner, window, voting_status, remaining_secs) = tokio::try_join!(
            self.admin(),
            self.all_candidates(),
            self.winner(),
            self.voting_window(),
            self.voting_status(),
            self.remaining_time(),
        )?;
        Ok(ElectionSnapshot {
            admin,
            candidates,
            winner,
            window,
            voting_status,
            remaining_secs,
        })
    }
}

pub struct MissingElectionContract;

#[async_trait]
impl ElectionContract for MissingElectionContract {
    async fn admin(&self) -> RemoteResult<Address> {
        Err(missing())
    }

    async fn all_candidates(&self) -> RemoteResult<Vec<Candidate>> {
        Err(missing())
    }

    async fn candidate(&self, _id: CandidateId) -> RemoteResult<Candidate> {
        Err(missing())
    }

    async fn candidate_count(&self) -> RemoteResult<u64> {
        Err(missing())
    }

    async fn remaining_time(&self) -> RemoteResult<u64> {
        Err(missing())
    }

    async fn voting_status(&self) -> RemoteResult<bool> {
        Err(missing())
    }

    async fn voting_window(&self) -> RemoteResult<VotingWindow> {
        Err(missing())
    }

    async fn winner(&self) -> RemoteResult<Winner> {
        Err(missing())
    }

    async fn has_voted(&self, _voter: &Address) -> RemoteResult<bool> {
        Err(missing())
    }
}

fn missing() -> RemoteError {
    RemoteError::Unavailable("election contract is not configured".to_string())
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionCall {
    AddCandidate { name: String },
    StartVoting { duration_secs: u64 },
    EndVoting,
    Vote { candidate_id: CandidateId },
}

impl ElectionCall {
    pub fn kind(&self) -> TxKind {
        match self {
            Self::AddCandidate { .. } => TxKind::AddCandidate,
            Self::StartVoting { .. } => TxKind::StartVoting,
            Self::EndVoting => TxKind::EndVoting,
            Self::Vote { .. } => TxKind::CastVote,
        }
    }
}

impl fmt::Display for ElectionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddCandidate { name } => write!(f, "addCandidate({name:?})"),
            Self::StartVoting { duration_secs } => write!(f, "startVoting({duration_secs})"),
            Self::EndVoting => f.write_str("endVoting()"),
            Self::Vote { candidate_id } => write!(f, "vote({candidate_id})"),
        }
    }
}

/// Signing and broadcasting side of the contract.
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Hands the call to the signer and resolves once it has been broadcast.
    async fn submit(&self, call: &ElectionCall) -> Result<TxHash, ElectionError>;
    /// Resolves once the transaction is included, or with the reason it failed.
    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<(), ElectionError>;
}

pub struct MissingTransactionSender;

#[async_trait]
impl TransactionSender for MissingTransactionSender {
    async fn submit(&self, call: &ElectionCall) -> Result<TxHash, ElectionError> {
        Err(ElectionError::NetworkUnavailable(format!(
            "no transaction sender configured for {call}"
        )))
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> Result<(), ElectionError> {
        Err(ElectionError::NetworkUnavailable(format!(
            "no transaction sender configured to track {tx_hash}"
        )))
    }
}

#[cfg(test)]
#[path = "tests/fakes.rs"]
pub(crate) mod fakes;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
