//! Property-based tests for grading and classification heuristics

use super::classifier::{Submission, ANALOGOUS, FILL_GAPS};
use super::roleplay::{max_turns, should_finish};
use super::*;
use chrono::Utc;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_score_line() -> impl Strategy<Value = (String, u32, u32)> {
    (0u32..1000, 1u32..1000, 0usize..3).prop_map(|(score, max, style)| {
        let line = match style {
            0 => format!("**Total Score:** {score}/{max} points"),
            1 => format!("Total Score: {score}/{max}"),
            _ => format!("Загальна оцінка: {score}/{max}"),
        };
        (line, score, max)
    })
}

fn roleplay_turns(count: usize) -> Vec<RoleplayTurn> {
    (1..=count)
        .map(|turn| RoleplayTurn {
            user_message: format!("learner line {turn}"),
            agent_response: format!("Reply {turn}: the shop keeper names a price"),
            turn,
            timestamp: Utc::now(),
        })
        .collect()
}

// ============================================================================
// Score extraction
// ============================================================================

proptest! {
    #[test]
    fn score_line_is_found_anywhere((line, score, _max) in arb_score_line(),
                                    before in "[a-z ]{0,40}",
                                    after in "[a-z ]{0,40}") {
        let report = format!("{before}\n{line}\n{after}");
        let extracted = extract_score(&report).expect("score line present");
        prop_assert!((extracted - f64::from(score)).abs() < 1e-9);
    }

    #[test]
    fn decimal_scores_keep_two_places(whole in 0u32..100, frac in 0u32..100, max in 1u32..100) {
        let report = format!("Total Score: {whole}.{frac:02}/{max}");
        let extracted = extract_score(&report).expect("score line present");
        let expected = f64::from(whole) + f64::from(frac) / 100.0;
        prop_assert!((extracted - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_denominator_never_grades(score in 0u32..1000) {
        prop_assert_eq!(extract_score(&format!("Total Score: {score}/0")), None);
        prop_assert_eq!(extract_score(&format!("**Total Score:** {score}/0 points")), None);
    }

    #[test]
    fn text_without_total_is_ungraded(text in "[a-zA-Z0-9 .,]{0,200}") {
        prop_assert_eq!(extract_score(&text), None);
    }
}

// ============================================================================
// Submission classification
// ============================================================================

proptest! {
    #[test]
    fn question_mark_always_means_question(prefix in "[a-z ]{0,30}",
                                           suffix in "[a-z ]{0,30}",
                                           assignment in "[a-z ]{0,80}") {
        let message = format!("{prefix}?{suffix}");
        prop_assert_eq!(FILL_GAPS.classify(&message, &assignment), Submission::Question);
        prop_assert_eq!(ANALOGOUS.classify(&message, &assignment), Submission::Question);
    }

    #[test]
    fn short_submissions_are_incomplete(answer_words in 1usize..40, assignment_words in 1usize..60) {
        let message = vec!["zz"; answer_words].join(" ");
        let assignment = vec!["xx"; assignment_words].join(" ");
        let expected = if answer_words * 100 < assignment_words * 30 {
            Submission::Incomplete
        } else {
            Submission::Answer
        };
        prop_assert_eq!(FILL_GAPS.classify(&message, &assignment), expected);
        prop_assert_eq!(ANALOGOUS.classify(&message, &assignment), expected);
    }

    #[test]
    fn classification_ignores_surrounding_whitespace(pad in "[ \t\n]{0,5}",
                                                      answer_words in 1usize..20) {
        let message = vec!["zz"; answer_words].join(" ");
        let padded = format!("{pad}{message}{pad}");
        prop_assert_eq!(
            FILL_GAPS.classify(&padded, "xx xx xx"),
            FILL_GAPS.classify(&message, "xx xx xx")
        );
    }
}

// ============================================================================
// Role-play finish detection
// ============================================================================

proptest! {
    #[test]
    fn stated_turn_limit_is_used(limit in 1usize..200) {
        prop_assert_eq!(max_turns(&format!("Finish after {limit} turns")), limit);
    }

    #[test]
    fn minutes_become_exchanges(minutes in 1usize..120) {
        prop_assert_eq!(max_turns(&format!("{minutes} хвилин")), (minutes * 2).max(10));
    }

    #[test]
    fn finishes_exactly_at_turn_limit(limit in 1usize..12, played in 1usize..12) {
        let conditions = format!("Finish after {limit} turns");
        let turns = roleplay_turns(played);
        prop_assert_eq!(should_finish(&conditions, &turns), played >= limit.max(3));
    }

    #[test]
    fn empty_conditions_never_finish(played in 0usize..30) {
        prop_assert!(!should_finish("", &roleplay_turns(played)));
        prop_assert!(!should_finish("   ", &roleplay_turns(played)));
    }
}
