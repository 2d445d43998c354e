//! Display-ready figures derived from a snapshot. Nothing here talks to the
//! network; every value is recomputed from its inputs on demand.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{Candidate, CandidateId, ElectionPhase, ElectionSnapshot, VotingWindow, Winner};

pub const NO_VOTES_LABEL: &str = "No votes yet";
pub const NOT_AVAILABLE_LABEL: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRow {
    pub id: CandidateId,
    pub name: String,
    pub votes: u64,
    /// Share of all votes, rounded to one decimal place.
    pub percentage: f64,
    pub is_leader: bool,
}

impl CandidateRow {
    pub fn percentage_label(&self) -> String {
        format!("{:.1}", self.percentage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElectionView {
    pub rows: Vec<CandidateRow>,
    pub total_votes: u128,
    pub leader: Option<CandidateId>,
    pub leader_votes: Option<u64>,
    pub phase: ElectionPhase,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

impl ElectionView {
    pub fn derive(
        candidates: &[Candidate],
        winner: &Winner,
        window: &VotingWindow,
        phase: ElectionPhase,
    ) -> Self {
        let total_votes: u128 = candidates.iter().map(|c| u128::from(c.vote_count)).sum();
        // The contract reports (0, 0) before anyone votes, so a zero count means
        // no leader. A winner id missing from the candidate list is not shown.
        let leader = (winner.vote_count > 0)
            .then_some(winner.candidate_id)
            .filter(|id| candidates.iter().any(|c| c.id == *id));

        let rows = candidates
            .iter()
            .map(|c| CandidateRow {
                id: c.id,
                name: c.name.clone(),
                votes: c.vote_count,
                percentage: percentage(c.vote_count, total_votes),
                is_leader: leader == Some(c.id),
            })
            .collect();

        Self {
            rows,
            total_votes,
            leader,
            leader_votes: leader.map(|_| winner.vote_count),
            phase,
            window_start: window.start_time(),
            window_end: window.end_time(),
        }
    }

    pub fn from_snapshot(snapshot: &ElectionSnapshot, phase: ElectionPhase) -> Self {
        Self::derive(&snapshot.candidates, &snapshot.winner, &snapshot.window, phase)
    }

    pub fn leader_row(&self) -> Option<&CandidateRow> {
        self.rows.iter().find(|row| row.is_leader)
    }

    /// Leader's name, or a placeholder when there is none to show.
    pub fn leader_label(&self) -> String {
        self.leader_row()
            .map_or_else(|| NO_VOTES_LABEL.to_string(), |row| row.name.clone())
    }

    pub fn candidate_count_label(&self) -> String {
        match self.rows.len() {
            1 => "1 Candidate".to_string(),
            n => format!("{n} Candidates"),
        }
    }

    pub fn status_label(&self) -> &'static str {
        self.phase.status_label()
    }

    pub fn window_start_label(&self) -> String {
        format_time(self.window_start)
    }

    pub fn window_end_label(&self) -> String {
        format_time(self.window_end)
    }
}

fn percentage(votes: u64, total: u128) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = votes as f64 / total as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| NOT_AVAILABLE_LABEL.to_string())
}

#[cfg(test)]
#[path = "tests/view_model_tests.rs"]
mod tests;
