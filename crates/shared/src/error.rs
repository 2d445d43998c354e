use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TxKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    AlreadyPending,
    Unauthorized,
    StateConflict,
    InvalidInput,
    NetworkUnavailable,
    UserDeclined,
    Corrupt,
}

/// Every failure a user-initiated election action can end in.
///
/// `Validation` and `AlreadyPending` are raised locally before anything is
/// sent; the rest come back from the node, the signer or the contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("a {0} request is already pending")]
    AlreadyPending(TxKind),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("state conflict: {0}")]
    StateConflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("user declined: {0}")]
    UserDeclined(String),
    #[error("corrupt response: {0}")]
    Corrupt(String),
}

impl ElectionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::AlreadyPending(_) => ErrorCode::AlreadyPending,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::StateConflict(_) => ErrorCode::StateConflict,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::NetworkUnavailable(_) => ErrorCode::NetworkUnavailable,
            Self::UserDeclined(_) => ErrorCode::UserDeclined,
            Self::Corrupt(_) => ErrorCode::Corrupt,
        }
    }

    /// The message as received, without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Self::AlreadyPending(kind) => format!("{kind} already pending"),
            Self::Validation(message)
            | Self::Unauthorized(message)
            | Self::StateConflict(message)
            | Self::InvalidInput(message)
            | Self::NetworkUnavailable(message)
            | Self::UserDeclined(message)
            | Self::Corrupt(message) => message.clone(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::AlreadyPending(_))
    }
}

/// Custom errors declared by the voting contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractError {
    AlreadyVoted,
    InvalidCandidate,
    InvalidVotingPeriod,
    NotAdmin,
    VotingAlreadyStarted,
    VotingNotActive,
    VotingStillActive,
}

impl ContractError {
    pub const ALL: [ContractError; 7] = [
        ContractError::AlreadyVoted,
        ContractError::InvalidCandidate,
        ContractError::InvalidVotingPeriod,
        ContractError::NotAdmin,
        ContractError::VotingAlreadyStarted,
        ContractError::VotingNotActive,
        ContractError::VotingStillActive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::AlreadyVoted => "VotingSystem__AlreadyVoted",
            Self::InvalidCandidate => "VotingSystem__InvalidCandidate",
            Self::InvalidVotingPeriod => "VotingSystem__InvalidVotingPeriod",
            Self::NotAdmin => "VotingSystem__NotAdmin",
            Self::VotingAlreadyStarted => "VotingSystem__VotingAlreadyStarted",
            Self::VotingNotActive => "VotingSystem__VotingNotActive",
            Self::VotingStillActive => "VotingSystem__VotingStillActive",
        }
    }

    /// Solidity signature hashed into the 4-byte revert selector.
    pub fn signature(self) -> String {
        format!("{}()", self.name())
    }

    pub fn code(self) -> ErrorCode {
        match self {
            Self::NotAdmin => ErrorCode::Unauthorized,
            Self::AlreadyVoted
            | Self::VotingAlreadyStarted
            | Self::VotingNotActive
            | Self::VotingStillActive => ErrorCode::StateConflict,
            Self::InvalidCandidate | Self::InvalidVotingPeriod => ErrorCode::InvalidInput,
        }
    }

    /// Attaches the node's message verbatim, naming the decoded error when the
    /// node did not.
    pub fn into_election_error(self, remote_message: &str) -> ElectionError {
        let message = if remote_message.contains(self.name()) {
            remote_message.to_string()
        } else if remote_message.is_empty() {
            self.name().to_string()
        } else {
            format!("{remote_message} ({})", self.name())
        };
        match self.code() {
            ErrorCode::Unauthorized => ElectionError::Unauthorized(message),
            ErrorCode::InvalidInput => ElectionError::InvalidInput(message),
            _ => ElectionError::StateConflict(message),
        }
    }
}
