//! Heuristic detection of "I will do X next" language in final text.
//!
//! A turn that ends on an announcement of future work rather than either
//! a tool call or a completed answer is not actually done, even though
//! the provider stopped with `EndTurn`. This classifier is deliberately
//! conservative: it would rather miss a real case than flag a turn that
//! merely mentions the future in passing (e.g. quoting a user's request).

const FUTURE_INTENT_PHRASES: &[&str] = &[
    "i will now",
    "i'll now",
    "next i'll",
    "next, i'll",
    "next i will",
    "now let me",
    "let me now",
    "i'm going to now",
    "i am going to now",
    "now i'll",
    "now i will",
    "let's now",
    "i will next",
    "my next step",
    "i will proceed to",
];

/// Number of trailing characters searched for a future-intent phrase.
/// Intent announcements that open a response, rather than close it, are
/// typically followed by the action itself in the same turn and aren't
/// what this heuristic is meant to catch.
const TRAILING_WINDOW_CHARS: usize = 240;

/// Whether `text` looks like it ends by announcing work rather than
/// doing it or concluding.
pub fn looks_like_future_intent(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    let tail_start = trimmed.len().saturating_sub(TRAILING_WINDOW_CHARS);
    let tail = &trimmed[tail_start..];
    let lower = tail.to_lowercase();
    FUTURE_INTENT_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_trailing_future_intent() {
        assert!(looks_like_future_intent(
            "I've reviewed the file. Next I'll update the config to match."
        ));
    }

    #[test]
    fn detects_various_phrasings() {
        assert!(looks_like_future_intent("Let me now check the other module."));
        assert!(looks_like_future_intent("Now I will run the migration."));
    }

    #[test]
    fn does_not_flag_a_completed_answer() {
        assert!(!looks_like_future_intent(
            "The bug was a missing null check on line 42. Fixed and verified."
        ));
    }

    #[test]
    fn does_not_flag_empty_text() {
        assert!(!looks_like_future_intent(""));
        assert!(!looks_like_future_intent("   "));
    }

    #[test]
    fn only_checks_the_trailing_window() {
        let mut long_text = "i will now ".to_string();
        long_text.push_str(&"x".repeat(500));
        assert!(!looks_like_future_intent(&long_text));
    }
}
