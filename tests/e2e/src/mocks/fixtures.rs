//! Canned conversational fixtures for the journey tests: realistic turn
//! sequences and `Sabha` deliberation inputs, kept in one place so each
//! journey test reads as the scenario it exercises rather than scaffolding.

use antara_core::sabha::{Participant, Syllogism};

/// A short back-and-forth about fixing an auth bug, alternating user/
/// assistant turns starting with the user.
pub fn auth_bugfix_turns() -> Vec<&'static str> {
    vec![
        "the login endpoint is throwing a 500 when the token is expired",
        "found it: the refresh-token check doesn't handle the expired case, adding a guard now",
        "can you also add a test for that",
        "added a regression test for expired-token refresh",
    ]
}

/// A second, unrelated conversation used to prove recall discriminates by
/// topic rather than returning everything.
pub fn database_migration_turns() -> Vec<&'static str> {
    vec![
        "we need to migrate the sessions table to add a branch column",
        "wrote the migration, it's additive so no backfill needed",
    ]
}

pub fn three_participants() -> Vec<Participant> {
    vec![
        Participant { id: "alice".to_string(), expertise: 0.9, credibility: 0.56 },
        Participant { id: "bob".to_string(), expertise: 0.6, credibility: 0.5 },
        Participant { id: "carol".to_string(), expertise: 0.5, credibility: 0.4 },
    ]
}

/// A syllogism with no structural fallacies: `udaharana` shares enough
/// vocabulary with `hetu` to pass the Asiddha check, avoids negation,
/// universal quantifiers, and tense mismatches, and the conclusion doesn't
/// just restate the proposition.
pub fn sound_syllogism() -> Syllogism {
    Syllogism {
        pratijna: "this endpoint should cache its response".to_string(),
        hetu: "the response is expensive to compute and rarely changes".to_string(),
        udaharana: "expensive rarely-changing responses are good caching candidates".to_string(),
        upanaya: "this response is expensive and rarely changes".to_string(),
        nigamana: "adding a cache here cuts load without serving stale data".to_string(),
    }
}
