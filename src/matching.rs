// 🔤 Merchant string matching - normalization + similarity
//
// "WALMART INC.", "Walmart", "the walmart co" → "walmart"
// Fuzzy comparisons run on normalized strings only.

/// Standalone words dropped during normalization
const STOP_WORDS: &[&str] = &["inc", "llc", "ltd", "corp", "co", "company", "the"];

/// Normalize a raw merchant/description string for rule matching
///
/// - Lowercase
/// - Drop everything outside [a-z0-9] and whitespace
/// - Collapse whitespace runs
/// - Remove corporate suffixes and "the"
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`
pub fn normalize(merchant: &str) -> String {
    let cleaned: String = merchant
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity between two (already normalized) strings, in [0, 1]
///
/// - equal → 1.0
/// - one contains the other → shorter/longer * 0.95
/// - otherwise → 1 - levenshtein / max_len
pub fn similarity_score(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let len_a = a.chars().count();
    let len_b = b.chars().count();

    let (shorter, longer, short_len, long_len) = if len_a <= len_b {
        (a, b, len_a, len_b)
    } else {
        (b, a, len_b, len_a)
    };

    if longer.contains(shorter) {
        return short_len as f64 / long_len as f64 * 0.95;
    }

    let distance = levenshtein_distance(a, b);
    1.0 - distance as f64 / long_len as f64
}

/// Levenshtein distance between two strings (counted in chars)
///
/// Minimum number of single-character insertions, deletions, or
/// substitutions needed to turn one string into the other.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    if s1_chars.is_empty() {
        return s2_chars.len();
    }
    if s2_chars.is_empty() {
        return s1_chars.len();
    }

    // Two rolling rows instead of the full matrix
    let mut previous: Vec<usize> = (0..=s2_chars.len()).collect();
    let mut current = vec![0; s2_chars.len() + 1];

    for (i, c1) in s1_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = if c1 == c2 { 0 } else { 1 };
            current[j + 1] = std::cmp::min(
                std::cmp::min(
                    previous[j + 1] + 1, // deletion
                    current[j] + 1,      // insertion
                ),
                previous[j] + cost, // substitution
            );
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[s2_chars.len()]
}

// ============================================================================
// TESTS
// ============================================================================
