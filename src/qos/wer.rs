//! Word error rate.
//!
//! WER = (substitutions + insertions + deletions) / reference word count,
//! computed over whitespace-separated tokens with unit edit costs.

/// Compute the word error rate between a reference text and a hypothesis.
///
/// Returns 0.0 for a perfect match. An empty reference scores 1.0 against
/// any non-empty hypothesis and 0.0 against an empty one. The rate can
/// exceed 1.0 when the hypothesis inserts more words than the reference
/// holds.
pub fn word_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let reference_words: Vec<&str> = reference.split_whitespace().collect();
    let hypothesis_words: Vec<&str> = hypothesis.split_whitespace().collect();

    if reference_words.is_empty() {
        return if hypothesis_words.is_empty() { 0.0 } else { 1.0 };
    }

    let distance = edit_distance(&reference_words, &hypothesis_words);
    distance as f64 / reference_words.len() as f64
}

/// Levenshtein distance over word slices, keeping only two DP rows.
fn edit_distance(reference: &[&str], hypothesis: &[&str]) -> usize {
    let mut previous: Vec<usize> = (0..=hypothesis.len()).collect();
    let mut current = vec![0; hypothesis.len() + 1];

    for (i, ref_word) in reference.iter().enumerate() {
        current[0] = i + 1;
        for (j, hyp_word) in hypothesis.iter().enumerate() {
            current[j + 1] = if ref_word == hyp_word {
                previous[j]
            } else {
                let substitution = previous[j] + 1;
                let insertion = current[j] + 1;
                let deletion = previous[j + 1] + 1;
                substitution.min(insertion).min(deletion)
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[hypothesis.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_zero() {
        assert_eq!(word_error_rate("le chat dort", "le chat dort"), 0.0);
    }

    #[test]
    fn both_empty_score_zero() {
        assert_eq!(word_error_rate("", ""), 0.0);
        assert_eq!(word_error_rate("  ", "\t"), 0.0);
    }

    #[test]
    fn empty_reference_with_hypothesis_scores_one() {
        assert_eq!(word_error_rate("", "bonjour"), 1.0);
    }

    #[test]
    fn single_substitution() {
        let wer = word_error_rate("le chat dort", "le chien dort");
        assert!((wer - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn deletion_and_insertion() {
        // One deletion out of four reference words.
        let wer = word_error_rate("il fait beau temps", "il fait beau");
        assert!((wer - 0.25).abs() < 1e-9);

        // One insertion against a three word reference.
        let wer = word_error_rate("il fait beau", "il fait tres beau");
        assert!((wer - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn completely_different_texts() {
        assert_eq!(word_error_rate("un deux trois", "quatre cinq six"), 1.0);
    }

    #[test]
    fn rate_can_exceed_one() {
        let wer = word_error_rate("oui", "non mais peut etre");
        assert!(wer > 1.0);
    }

    #[test]
    fn whitespace_is_normalized() {
        assert_eq!(word_error_rate("le  chat\tdort", "le chat dort"), 0.0);
    }
}
