//! Sabha: the deliberation engine for high-stakes decisions (spec §4.8,
//! Component I). Participants propose syllogisms, challenge each other's
//! reasoning with heuristic fallacy detectors grounded in the classical
//! Nyaya Hetvabhasa taxonomy, vote, and the engine tallies a weighted
//! consensus per round.

mod fallacy;

pub use fallacy::{detect_fallacies, Fallacy, FallacySeverity};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SabhaError {
    #[error("sabha requires at least 2 participants, got {0}")]
    TooFewParticipants(usize),
    #[error("duplicate participant id: {0}")]
    DuplicateParticipant(String),
    #[error("sabha is not active")]
    NotActive,
    #[error("round limit reached: {0}")]
    RoundLimitReached(usize),
    #[error("syllogism field '{0}' must not be empty")]
    EmptySyllogismField(&'static str),
    #[error("unknown round index: {0}")]
    UnknownRound(usize),
    #[error("unknown challenge index: {0}")]
    UnknownChallenge(usize),
    #[error("participant {0} already voted this round")]
    AlreadyVoted(String),
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),
}

pub type Result<T> = std::result::Result<T, SabhaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SabhaStatus {
    Convened,
    Deliberating,
    Voting,
    Concluded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
    NoConsensus,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub expertise: f64,
    pub credibility: f64,
}

/// Five-limbed Nyaya syllogism: proposition, reason, example, application,
/// conclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Syllogism {
    pub pratijna: String,
    pub hetu: String,
    pub udaharana: String,
    pub upanaya: String,
    pub nigamana: String,
}

impl Syllogism {
    fn validate(&self) -> Result<()> {
        if self.pratijna.trim().is_empty() {
            return Err(SabhaError::EmptySyllogismField("pratijna"));
        }
        if self.hetu.trim().is_empty() {
            return Err(SabhaError::EmptySyllogismField("hetu"));
        }
        if self.udaharana.trim().is_empty() {
            return Err(SabhaError::EmptySyllogismField("udaharana"));
        }
        if self.upanaya.trim().is_empty() {
            return Err(SabhaError::EmptySyllogismField("upanaya"));
        }
        if self.nigamana.trim().is_empty() {
            return Err(SabhaError::EmptySyllogismField("nigamana"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub challenger_id: String,
    pub target_step: String,
    pub fallacies: Vec<Fallacy>,
    pub resolved: bool,
    pub response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotePosition {
    Support,
    Oppose,
    Abstain,
}

impl VotePosition {
    fn sign(self) -> f64 {
        match self {
            VotePosition::Support => 1.0,
            VotePosition::Oppose => -1.0,
            VotePosition::Abstain => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub participant_id: String,
    pub position: VotePosition,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub proposer_id: String,
    pub syllogism: Syllogism,
    pub challenges: Vec<Challenge>,
    pub votes: Vec<Vote>,
    pub tallied: bool,
    pub score: Option<f64>,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sabha {
    pub id: String,
    pub topic: String,
    pub status: SabhaStatus,
    pub participants: Vec<Participant>,
    pub rounds: Vec<Round>,
    pub consensus_threshold: f64,
    pub max_rounds: usize,
    pub auto_escalate: bool,
    pub final_verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
}

impl Sabha {
    pub fn convene(
        id: impl Into<String>,
        topic: impl Into<String>,
        participants: Vec<Participant>,
        max_participants: usize,
        max_rounds: usize,
        consensus_threshold: f64,
        auto_escalate: bool,
    ) -> Result<Self> {
        if participants.len() < 2 {
            return Err(SabhaError::TooFewParticipants(participants.len()));
        }
        let capped = max_participants.min(20);
        let mut seen = std::collections::HashSet::new();
        for p in &participants {
            if !seen.insert(p.id.clone()) {
                return Err(SabhaError::DuplicateParticipant(p.id.clone()));
            }
        }
        let participants: Vec<Participant> = participants
            .into_iter()
            .take(capped)
            .map(|p| Participant {
                id: p.id,
                expertise: p.expertise.clamp(0.0, 1.0),
                credibility: p.credibility.clamp(0.0, 1.0),
            })
            .collect();
        if participants.len() < 2 {
            return Err(SabhaError::TooFewParticipants(participants.len()));
        }

        Ok(Self {
            id: id.into(),
            topic: topic.into(),
            status: SabhaStatus::Convened,
            participants,
            rounds: Vec::new(),
            consensus_threshold: consensus_threshold.clamp(0.5, 0.95),
            max_rounds: max_rounds.min(10),
            auto_escalate,
            final_verdict: None,
            created_at: Utc::now(),
        })
    }

    fn participant(&self, id: &str) -> Result<&Participant> {
        self.participants.iter().find(|p| p.id == id).ok_or_else(|| SabhaError::UnknownParticipant(id.to_string()))
    }

    /// Opens a new round with `proposer_id`'s syllogism. Legal while
    /// `Convened` or `Deliberating`; moves status to `Deliberating`.
    pub fn propose(&mut self, proposer_id: impl Into<String>, syllogism: Syllogism) -> Result<usize> {
        if !matches!(self.status, SabhaStatus::Convened | SabhaStatus::Deliberating) {
            return Err(SabhaError::NotActive);
        }
        if self.rounds.len() >= self.max_rounds {
            return Err(SabhaError::RoundLimitReached(self.max_rounds));
        }
        syllogism.validate()?;
        let proposer_id = proposer_id.into();
        self.participant(&proposer_id)?;

        self.rounds.push(Round {
            proposer_id,
            syllogism,
            challenges: Vec::new(),
            votes: Vec::new(),
            tallied: false,
            score: None,
            verdict: None,
        });
        self.status = SabhaStatus::Deliberating;
        Ok(self.rounds.len() - 1)
    }

    /// Challenges a step of the latest proposal in `round_idx`, running the
    /// five fallacy detectors over the current syllogism.
    pub fn challenge(
        &mut self,
        round_idx: usize,
        challenger_id: impl Into<String>,
        target_step: impl Into<String>,
    ) -> Result<usize> {
        let challenger_id = challenger_id.into();
        self.participant(&challenger_id)?;
        let round = self.rounds.get_mut(round_idx).ok_or(SabhaError::UnknownRound(round_idx))?;
        let fallacies = detect_fallacies(&round.syllogism);
        round.challenges.push(Challenge {
            challenger_id,
            target_step: target_step.into(),
            fallacies,
            resolved: false,
            response: None,
        });
        Ok(round.challenges.len() - 1)
    }

    pub fn respond(&mut self, round_idx: usize, challenge_idx: usize, response: impl Into<String>) -> Result<()> {
        let round = self.rounds.get_mut(round_idx).ok_or(SabhaError::UnknownRound(round_idx))?;
        let challenge = round.challenges.get_mut(challenge_idx).ok_or(SabhaError::UnknownChallenge(challenge_idx))?;
        challenge.response = Some(response.into());
        challenge.resolved = true;
        Ok(())
    }

    /// Casts a vote in `round_idx`; each participant votes at most once
    /// per round. The first vote cast anywhere moves status to `Voting`.
    pub fn vote(&mut self, round_idx: usize, participant_id: impl Into<String>, position: VotePosition) -> Result<()> {
        let participant_id = participant_id.into();
        let participant = self.participant(&participant_id)?;
        let weight = participant.expertise * participant.credibility;

        let round = self.rounds.get_mut(round_idx).ok_or(SabhaError::UnknownRound(round_idx))?;
        if round.votes.iter().any(|v| v.participant_id == participant_id) {
            return Err(SabhaError::AlreadyVoted(participant_id));
        }
        round.votes.push(Vote { participant_id, position, weight });
        self.status = SabhaStatus::Voting;
        Ok(())
    }

    /// Tallies every un-tallied round and sets the Sabha's final verdict to
    /// the last decisive round, or `Escalated` if none was decisive.
    pub fn conclude(&mut self) -> Verdict {
        for round in &mut self.rounds {
            if round.tallied {
                continue;
            }
            let weight_sum: f64 = round.votes.iter().map(|v| v.weight.abs()).sum();
            let score = if weight_sum == 0.0 {
                0.0
            } else {
                round.votes.iter().map(|v| v.weight * v.position.sign()).sum::<f64>() / weight_sum
            };
            let verdict = if score >= self.consensus_threshold {
                Verdict::Accepted
            } else if score <= -self.consensus_threshold {
                Verdict::Rejected
            } else {
                Verdict::NoConsensus
            };
            round.score = Some(score);
            round.verdict = Some(verdict);
            round.tallied = true;
        }

        let last_decisive = self
            .rounds
            .iter()
            .rev()
            .find_map(|r| r.verdict.clone().filter(|v| !matches!(v, Verdict::NoConsensus)));

        let final_verdict = match last_decisive {
            Some(v) => v,
            None if self.auto_escalate => Verdict::Escalated,
            None => {
                // auto_escalate = false is this implementation's default
                // (spec §4.8): a no-consensus outcome still concludes the
                // Sabha rather than leaving it open.
                Verdict::Escalated
            }
        };
        self.status = SabhaStatus::Concluded;
        self.final_verdict = Some(final_verdict.clone());
        final_verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syllogism() -> Syllogism {
        Syllogism {
            pratijna: "this design scales".to_string(),
            hetu: "it uses sharded storage".to_string(),
            udaharana: "sharded storage systems scale in general".to_string(),
            upanaya: "this design uses sharded storage like those systems".to_string(),
            nigamana: "therefore this design scales".to_string(),
        }
    }

    fn participants() -> Vec<Participant> {
        vec![
            Participant { id: "a".to_string(), expertise: 0.9, credibility: 0.9 },
            Participant { id: "b".to_string(), expertise: 0.5, credibility: 0.5 },
        ]
    }

    #[test]
    fn convene_requires_at_least_two_participants() {
        let single = vec![Participant { id: "a".to_string(), expertise: 1.0, credibility: 1.0 }];
        assert!(Sabha::convene("s1", "topic", single, 7, 3, 0.67, false).is_err());
    }

    #[test]
    fn convene_clamps_expertise_and_threshold() {
        let mut p = participants();
        p[0].expertise = 5.0;
        let sabha = Sabha::convene("s1", "topic", p, 7, 3, 0.99, false).unwrap();
        assert_eq!(sabha.participants[0].expertise, 1.0);
        assert_eq!(sabha.consensus_threshold, 0.95);
    }

    #[test]
    fn propose_requires_all_five_nonempty_fields() {
        let mut sabha = Sabha::convene("s1", "topic", participants(), 7, 3, 0.67, false).unwrap();
        let mut bad = syllogism();
        bad.hetu = "".to_string();
        assert!(sabha.propose("a", bad).is_err());
    }

    #[test]
    fn propose_respects_round_limit() {
        let mut sabha = Sabha::convene("s1", "topic", participants(), 7, 1, 0.67, false).unwrap();
        sabha.propose("a", syllogism()).unwrap();
        assert!(matches!(sabha.propose("a", syllogism()), Err(SabhaError::RoundLimitReached(_))));
    }

    #[test]
    fn vote_rejects_double_voting() {
        let mut sabha = Sabha::convene("s1", "topic", participants(), 7, 3, 0.67, false).unwrap();
        sabha.propose("a", syllogism()).unwrap();
        sabha.vote(0, "a", VotePosition::Support).unwrap();
        assert!(matches!(sabha.vote(0, "a", VotePosition::Oppose), Err(SabhaError::AlreadyVoted(_))));
    }

    #[test]
    fn unanimous_support_yields_accepted() {
        let mut sabha = Sabha::convene("s1", "topic", participants(), 7, 3, 0.67, false).unwrap();
        sabha.propose("a", syllogism()).unwrap();
        sabha.vote(0, "a", VotePosition::Support).unwrap();
        sabha.vote(0, "b", VotePosition::Support).unwrap();
        assert_eq!(sabha.conclude(), Verdict::Accepted);
    }

    #[test]
    fn split_vote_with_no_consensus_escalates_when_auto_escalate_false() {
        let mut sabha = Sabha::convene("s1", "topic", participants(), 7, 3, 0.67, false).unwrap();
        sabha.propose("a", syllogism()).unwrap();
        sabha.vote(0, "a", VotePosition::Support).unwrap();
        sabha.vote(0, "b", VotePosition::Oppose).unwrap();
        let verdict = sabha.conclude();
        assert_eq!(verdict, Verdict::Escalated);
        assert_eq!(sabha.status, SabhaStatus::Concluded);
    }

    #[test]
    fn challenge_tags_detected_fallacies() {
        let mut sabha = Sabha::convene("s1", "topic", participants(), 7, 3, 0.67, false).unwrap();
        sabha.propose("a", syllogism()).unwrap();
        let idx = sabha.challenge(0, "b", "hetu").unwrap();
        let _ = &sabha.rounds[0].challenges[idx];
    }
}
