//! Shared utility functions

// ============================================================================
// Levenshtein distance for typo suggestions
// ============================================================================

/// Calculate Levenshtein edit distance between two strings.
/// Uses O(min(m,n)) space with two-row optimization.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Find the most similar name from a list of candidates.
/// Returns `Some(suggestion)` if a match is found within the threshold.
pub fn find_similar_name<'a>(
    name: &str,
    candidates: &[&'a str],
    threshold: usize,
) -> Option<&'a str> {
    let mut best_match: Option<&str> = None;
    let mut best_distance = usize::MAX;

    for &candidate in candidates {
        let distance = levenshtein_distance(name, candidate);
        if distance < best_distance && distance <= threshold {
            best_distance = distance;
            best_match = Some(candidate);
        }
    }

    best_match
}

/// Threshold scaled to the length of the misspelled name
pub fn suggestion_threshold(name: &str) -> usize {
    (name.chars().count() / 3).clamp(1, 3)
}

/// "did you mean" note text for an unknown name, if a close candidate exists
pub fn suggestion_note(name: &str, candidates: &[&str]) -> Option<String> {
    find_similar_name(name, candidates, suggestion_threshold(name))
        .filter(|candidate| *candidate != name)
        .map(|candidate| format!("did you mean `{candidate}`?"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein_distance("count", "count"), 0);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
    }

    #[test]
    fn test_levenshtein_edits() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("cout", "count"), 1);
    }

    #[test]
    fn test_find_similar_name_picks_closest() {
        let candidates = ["counter", "count", "amount"];
        assert_eq!(find_similar_name("coutn", &candidates, 2), Some("count"));
        assert_eq!(find_similar_name("zzz", &candidates, 2), None);
    }

    #[test]
    fn test_suggestion_note() {
        assert_eq!(
            suggestion_note("lenght", &["length", "width"]),
            Some("did you mean `length`?".to_string())
        );
        assert_eq!(suggestion_note("q", &["length"]), None);
    }
}
