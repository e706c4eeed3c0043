//! End-to-end journey over deliberation (Sabha): convene, propose, have a
//! skeptic challenge the reasoning, vote, and tally a weighted consensus
//! (spec §4.8, §8 scenario 5).

use antara_core::sabha::{Participant, Syllogism, VotePosition};
use antara_core::{Sabha, Verdict};
use antara_e2e_tests::mocks;

#[test]
fn sound_proposal_survives_challenge_and_reaches_consensus() {
    let mut sabha = Sabha::convene(
        "sabha-1",
        "should we cache this endpoint's response?",
        mocks::three_participants(),
        7,
        3,
        0.67,
        true,
    )
    .unwrap();

    let round = sabha.propose("alice", mocks::sound_syllogism()).unwrap();
    let challenge = sabha.challenge(round, "bob", "hetu").unwrap();
    sabha.respond(round, challenge, "the hot-path profile confirms this is the expensive call").unwrap();

    sabha.vote(round, "alice", VotePosition::Support).unwrap();
    sabha.vote(round, "bob", VotePosition::Support).unwrap();
    sabha.vote(round, "carol", VotePosition::Support).unwrap();

    let verdict = sabha.conclude();
    assert_eq!(verdict, Verdict::Accepted);
}

#[test]
fn split_vote_below_threshold_escalates_when_no_further_round_is_proposed() {
    // Matches the spec's worked example: weights 0.5/0.3/0.2 voting
    // support/support/oppose give score (0.5+0.3-0.2)/1.0 = 0.6, which
    // falls short of the default 0.67 consensus threshold.
    let participants = vec![
        Participant { id: "a".to_string(), expertise: 1.0, credibility: 0.5 },
        Participant { id: "b".to_string(), expertise: 1.0, credibility: 0.3 },
        Participant { id: "c".to_string(), expertise: 1.0, credibility: 0.2 },
    ];
    let mut sabha = Sabha::convene("sabha-2", "should we ship this migration now?", participants, 7, 3, 0.67, false)
        .unwrap();

    let round = sabha.propose("a", mocks::sound_syllogism()).unwrap();
    sabha.vote(round, "a", VotePosition::Support).unwrap();
    sabha.vote(round, "b", VotePosition::Support).unwrap();
    sabha.vote(round, "c", VotePosition::Oppose).unwrap();

    let verdict = sabha.conclude();
    // The round itself is scored as no-consensus (0.6 < 0.67)...
    assert_eq!(sabha.rounds[round].verdict, Some(Verdict::NoConsensus));
    // ...but with no decisive round to fall back to, the Sabha as a whole
    // concludes escalated regardless of `auto_escalate`.
    assert_eq!(verdict, Verdict::Escalated);
    assert_eq!(sabha.final_verdict, Some(Verdict::Escalated));
}

#[test]
fn convene_rejects_fewer_than_two_participants() {
    let solo = vec![Participant { id: "a".to_string(), expertise: 0.8, credibility: 0.8 }];
    let err = Sabha::convene("sabha-3", "topic", solo, 7, 3, 0.67, false);
    assert!(err.is_err());
}

#[test]
fn each_participant_votes_at_most_once_per_round() {
    let mut sabha = Sabha::convene("sabha-4", "topic", mocks::three_participants(), 7, 3, 0.67, false).unwrap();
    let round = sabha.propose("alice", mocks::sound_syllogism()).unwrap();
    sabha.vote(round, "alice", VotePosition::Support).unwrap();
    let err = sabha.vote(round, "alice", VotePosition::Oppose);
    assert!(err.is_err());
}

#[test]
fn challenging_a_proposal_surfaces_fallacy_detections() {
    let mut sabha = Sabha::convene("sabha-5", "topic", mocks::three_participants(), 7, 3, 0.67, false).unwrap();
    // Deliberately flawed: hetu negates a claim it shares vocabulary with
    // the proposition (Viruddha), and leans on universal quantifiers
    // (Anaikantika).
    let flawed = Syllogism {
        pratijna: "this design always reduces latency under load".to_string(),
        hetu: "it does not reduce latency under load at all, and always helps every request".to_string(),
        udaharana: "memory caches reduce latency in general".to_string(),
        upanaya: "this design behaves like those caches".to_string(),
        nigamana: "therefore this design reduces latency".to_string(),
    };
    let round = sabha.propose("alice", flawed).unwrap();
    let challenge_idx = sabha.challenge(round, "bob", "hetu").unwrap();

    let fallacies = &sabha.rounds[round].challenges[challenge_idx].fallacies;
    assert!(!fallacies.is_empty());
}
