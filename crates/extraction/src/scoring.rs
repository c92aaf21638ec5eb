//! Local quote importance scoring and insight complexity tagging
//!
//! Both run without the LLM: they are deterministic heuristics applied to
//! every extracted quote and insight after the per-unit call returns.

use podgraph_core::Quote;

/// Score a quote's importance in [0, 1].
///
/// Base weight by quote type, adjusted for a quotable length band and
/// speaker attribution, then scaled by extraction confidence.
pub fn score_quote(quote: &Quote) -> f64 {
    let base = match quote.quote_type.trim().to_lowercase().as_str() {
        "insightful" | "key_point" => 0.9,
        "controversial" => 0.85,
        "humorous" => 0.7,
        "personal" | "anecdote" => 0.65,
        "factual" => 0.6,
        _ => 0.5,
    };

    let words = quote.text.split_whitespace().count();
    let length_adjust = if (8..=40).contains(&words) {
        0.1
    } else if words < 4 {
        -0.2
    } else {
        0.0
    };

    let attribution = if quote.speaker.is_empty() || quote.speaker == "Unknown" {
        0.0
    } else {
        0.05
    };

    let confidence_scale = 0.5 + quote.confidence.clamp(0.0, 1.0) / 2.0;

    ((base + length_adjust + attribution) * confidence_scale).clamp(0.0, 1.0)
}

/// Tag an insight's complexity from its wording: short single-clause
/// statements are "low", long multi-clause reasoning is "high".
pub fn complexity_label(content: &str) -> &'static str {
    let words = content.split_whitespace().count();
    let clauses = content
        .matches([',', ';', ':'])
        .count()
        .max(content.split(" because ").count() - 1);

    if words >= 60 || (words >= 30 && clauses >= 3) {
        "high"
    } else if words >= 20 || clauses >= 2 {
        "medium"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(text: &str, quote_type: &str, speaker: &str, confidence: f64) -> Quote {
        Quote {
            text: text.into(),
            speaker: speaker.into(),
            confidence,
            quote_type: quote_type.into(),
            importance_score: 0.0,
            meaningful_unit_id: String::new(),
        }
    }

    #[test]
    fn test_insightful_quote_scores_high() {
        let q = quote(
            "The real bottleneck in knowledge work is attention, not time",
            "insightful",
            "Alice",
            0.95,
        );
        assert!(score_quote(&q) > 0.8);
    }

    #[test]
    fn test_tiny_quote_penalized() {
        let long = quote(
            "This is a reasonably sized quote with enough words to matter",
            "factual",
            "Alice",
            0.9,
        );
        let tiny = quote("Yes.", "factual", "Alice", 0.9);
        assert!(score_quote(&tiny) < score_quote(&long));
    }

    #[test]
    fn test_score_bounded() {
        let q = quote("Hmm", "", "", 0.0);
        let score = score_quote(&q);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_complexity_bands() {
        assert_eq!(complexity_label("Focus matters."), "low");
        assert_eq!(
            complexity_label(
                "Deep work requires long stretches of focus, which most offices \
                 make impossible, because interruptions are constant"
            ),
            "medium"
        );
        let long = "word ".repeat(70);
        assert_eq!(complexity_label(&long), "high");
    }
}
