use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ElectionError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(CandidateId);

/// Declares a `0x`-prefixed hex string newtype, lowercased at parse time so
/// equality never depends on the caller's casing.
macro_rules! hex_newtype {
    ($name:ident, $digits:expr, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, ElectionError> {
                let trimmed = raw.trim();
                let digits = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                    .ok_or_else(|| {
                        ElectionError::Validation(format!("{} must start with 0x: {raw}", $label))
                    })?;
                if digits.len() != $digits || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ElectionError::Validation(format!(
                        "malformed {}: {raw}",
                        $label
                    )));
                }
                Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Hex digits without the `0x` prefix.
            pub fn digits(&self) -> &str {
                &self.0[2..]
            }
        }

        impl FromStr for $name {
            type Err = ElectionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ElectionError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

hex_newtype!(Address, 40, "address");
hex_newtype!(TxHash, 64, "transaction hash");

impl Address {
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        let digits = self.digits().as_bytes();
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = (nibble(digits[2 * i]) << 4) | nibble(digits[2 * i + 1]);
        }
        out
    }
}

// Only reached with digits already validated by `parse`.
fn nibble(c: u8) -> u8 {
    (c as char).to_digit(16).unwrap_or(0) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub vote_count: u64,
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionPhase {
    NotStarted,
    Active,
    Ended,
}

impl ElectionPhase {
    /// The contract only reports a boolean status; a closed election is told
    /// apart from an unopened one by whether a window was ever recorded.
    pub fn derive(voting_status: bool, window: Option<VotingWindow>) -> Self {
        if voting_status {
            Self::Active
        } else if window.is_some_and(|w| w.is_valid()) {
            Self::Ended
        } else {
            Self::NotStarted
        }
    }

    pub fn status_label(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::NotStarted | Self::Ended => "Inactive",
        }
    }
}

impl fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "not started",
            Self::Active => "active",
            Self::Ended => "ended",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingWindow {
    pub start: u64,
    pub end: u64,
}

impl VotingWindow {
    pub fn is_valid(&self) -> bool {
        self.start > 0
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.is_valid().then(|| unix_to_utc(self.start)).flatten()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.is_valid().then(|| unix_to_utc(self.end)).flatten()
    }
}

fn unix_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub candidate_id: CandidateId,
    pub vote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub address: Address,
    pub has_voted: bool,
}

/// One consistent-enough read of everything the views derive from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSnapshot {
    pub admin: Address,
    pub candidates: Vec<Candidate>,
    pub winner: Winner,
    pub window: VotingWindow,
    pub voting_status: bool,
    pub remaining_secs: u64,
}

impl ElectionSnapshot {
    pub fn phase(&self) -> ElectionPhase {
        ElectionPhase::derive(self.voting_status, Some(self.window))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    AddCandidate,
    StartVoting,
    EndVoting,
    CastVote,
}

impl TxKind {
    pub const ALL: [TxKind; 4] = [
        TxKind::AddCandidate,
        TxKind::StartVoting,
        TxKind::EndVoting,
        TxKind::CastVote,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddCandidate => "add_candidate",
            Self::StartVoting => "start_voting",
            Self::EndVoting => "end_voting",
            Self::CastVote => "cast_vote",
        }
    }

    pub fn pending_label(self) -> &'static str {
        match self {
            Self::AddCandidate => "Adding...",
            Self::StartVoting => "Starting...",
            Self::EndVoting => "Ending...",
            Self::CastVote => "Confirming...",
        }
    }

    pub fn success_label(self) -> &'static str {
        match self {
            Self::AddCandidate => "Candidate added successfully!",
            Self::StartVoting => "Voting started successfully!",
            Self::EndVoting => "Voting ended successfully!",
            Self::CastVote => "Vote Recorded",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    #[default]
    Idle,
    Pending,
    Confirming,
    Confirmed,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Confirming)
    }
}
