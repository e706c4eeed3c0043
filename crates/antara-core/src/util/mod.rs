//! Small dependency-free helpers shared across subsystems: a bounded ring
//! buffer for rolling history windows, FNV-1a fingerprinting for goal/intent
//! dedup, and the Wilson score interval used by the self-model.

mod ring_buffer;

pub use ring_buffer::RingBuffer;

/// FNV-1a 64-bit hash, truncated to a 12-hex-character fingerprint.
///
/// Used both for the project-path -> session-scope key and for goal
/// fingerprinting in the intention subsystem. Non-cryptographic by design:
/// we only need a stable, reproducible mapping, not collision resistance
/// against an adversary.
pub fn fnv1a_hex12(input: &str) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:012x}", hash & 0xffff_ffff_ffff)
}

/// Wilson score confidence interval lower/upper bound at the given z-score.
///
/// `successes`/`total` describe a binomial proportion; returns `(0.0, 1.0)`
/// when `total == 0` since there is no evidence to narrow the interval.
pub fn wilson_interval(successes: u64, total: u64, z: f64) -> (f64, f64) {
    if total == 0 {
        return (0.0, 1.0);
    }
    let n = total as f64;
    let p = successes as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = p + z2 / (2.0 * n);
    let margin = z * ((p * (1.0 - p) / n) + (z2 / (4.0 * n * n))).sqrt();
    let lower = ((center - margin) / denom).clamp(0.0, 1.0);
    let upper = ((center + margin) / denom).clamp(0.0, 1.0);
    (lower, upper)
}

/// Jaccard similarity between two token sets, used for intention dedup and
/// the Sabha `prakarana-sama` fallacy detector.
pub fn jaccard<'a, I>(a: I, b: I) -> f64
where
    I: IntoIterator<Item = &'a str>,
{
    use std::collections::HashSet;
    let a: HashSet<&str> = a.into_iter().collect();
    let b: HashSet<&str> = b.into_iter().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Tokenize text into lowercase alphanumeric words of at least `min_len`,
/// dropping the given stop words. Shared by Dhyana concept tracking,
/// Sankalpa keyword extraction, and the Sabha fallacy detectors.
pub fn tokenize_keywords(text: &str, min_len: usize, stop_words: &[&str]) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= min_len && !stop_words.contains(&w.as_str()))
        .collect()
}

pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our",
    "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see", "two",
    "way", "who", "boy", "did", "its", "let", "put", "say", "she", "too", "use", "with", "this",
    "that", "from", "have", "will", "your", "about", "into", "just", "like", "been", "some",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_deterministic_and_stable_length() {
        let a = fnv1a_hex12("/home/user/project");
        let b = fnv1a_hex12("/home/user/project");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn fnv1a_distinguishes_distinct_paths() {
        assert_ne!(fnv1a_hex12("/a"), fnv1a_hex12("/b"));
    }

    #[test]
    fn wilson_interval_widens_with_less_data() {
        let (lo_few, hi_few) = wilson_interval(1, 2, 1.96);
        let (lo_many, hi_many) = wilson_interval(500, 1000, 1.96);
        assert!(hi_few - lo_few > hi_many - lo_many);
    }

    #[test]
    fn wilson_interval_no_data_is_full_range() {
        assert_eq!(wilson_interval(0, 0, 1.96), (0.0, 1.0));
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a = vec!["fix", "auth", "bug"];
        assert_eq!(jaccard(a.clone(), a), 1.0);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        assert_eq!(jaccard(vec!["a"], vec!["b"]), 0.0);
    }
}
