//! Sentiment response parsing

use podgraph_core::{
    DiscoveredSentiment, EmotionalMoment, MeaningfulUnit, SpeakerSentiment, UnitSentiment,
};
use serde_json::Value;

/// Convert the model's sentiment JSON into a `UnitSentiment`, tolerating
/// missing optional sections. Discovered sentiments below the confidence
/// floor are dropped; sentiment output is noisier than entity extraction,
/// so the floor here is set lower by the caller.
pub fn parse_sentiment(
    value: &Value,
    unit: &MeaningfulUnit,
    unit_index: usize,
    min_confidence: f64,
) -> UnitSentiment {
    let mut sentiment = UnitSentiment {
        unit_id: unit.id.clone(),
        unit_index,
        overall_polarity: value
            .get("overall_polarity")
            .and_then(Value::as_str)
            .unwrap_or("neutral")
            .to_string(),
        overall_score: value
            .get("overall_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        trajectory: value
            .get("trajectory")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        interaction_harmony: value
            .get("interaction_harmony")
            .and_then(Value::as_f64)
            .unwrap_or(0.5),
        confidence: value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5),
        ..Default::default()
    };

    if let Some(speakers) = value.get("speaker_sentiments").and_then(Value::as_object) {
        for (speaker, entry) in speakers {
            sentiment.speaker_sentiments.insert(
                speaker.clone(),
                SpeakerSentiment {
                    polarity: entry
                        .get("polarity")
                        .and_then(Value::as_str)
                        .unwrap_or("neutral")
                        .to_string(),
                    score: entry.get("score").and_then(Value::as_f64).unwrap_or(0.0),
                    dominant_emotion: entry
                        .get("dominant_emotion")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                },
            );
        }
    }

    if let Some(moments) = value.get("emotional_moments").and_then(Value::as_array) {
        for moment in moments {
            let Some(text) = moment.get("text").and_then(Value::as_str) else {
                continue;
            };
            sentiment.emotional_moments.push(EmotionalMoment {
                text: text.to_string(),
                speaker: moment
                    .get("speaker")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                emotion: moment
                    .get("emotion")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string(),
                intensity: moment
                    .get("intensity")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.5),
            });
        }
    }

    if let Some(discovered) = value.get("discovered_sentiments").and_then(Value::as_array) {
        for entry in discovered {
            let Some(sentiment_type) = entry.get("type").and_then(Value::as_str) else {
                continue;
            };
            let confidence = entry
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5);
            if confidence < min_confidence {
                continue;
            }
            sentiment.discovered_sentiments.push(DiscoveredSentiment {
                sentiment_type: sentiment_type.to_string(),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                confidence,
            });
        }
    }

    sentiment
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn unit() -> MeaningfulUnit {
        MeaningfulUnit {
            id: "unit_x".into(),
            text: "text".into(),
            start_time: 0.0,
            end_time: 10.0,
            primary_speaker: "Alice".into(),
            speaker_distribution: HashMap::new(),
            unit_type: "discussion".into(),
            themes: vec![],
            segment_refs: vec![],
            embedding: None,
        }
    }

    #[test]
    fn test_full_parse() {
        let value = json!({
            "overall_polarity": "positive",
            "overall_score": 0.6,
            "speaker_sentiments": {
                "Alice": {"polarity": "positive", "score": 0.7, "dominant_emotion": "enthusiasm"},
            },
            "emotional_moments": [
                {"text": "I love this", "speaker": "Alice", "emotion": "joy", "intensity": 0.9},
            ],
            "trajectory": "rising",
            "interaction_harmony": 0.8,
            "discovered_sentiments": [
                {"type": "nostalgic_reflection", "description": "d", "confidence": 0.7},
                {"type": "weak_signal", "confidence": 0.1},
            ],
            "confidence": 0.75,
        });
        let parsed = parse_sentiment(&value, &unit(), 3, 0.3);
        assert_eq!(parsed.unit_id, "unit_x");
        assert_eq!(parsed.unit_index, 3);
        assert_eq!(parsed.overall_polarity, "positive");
        assert_eq!(parsed.speaker_sentiments["Alice"].dominant_emotion, "enthusiasm");
        assert_eq!(parsed.emotional_moments.len(), 1);
        // Below-floor discovery dropped
        assert_eq!(parsed.discovered_sentiments.len(), 1);
        assert_eq!(parsed.discovered_sentiments[0].sentiment_type, "nostalgic_reflection");
    }

    #[test]
    fn test_minimal_parse_defaults() {
        let parsed = parse_sentiment(&json!({}), &unit(), 0, 0.3);
        assert_eq!(parsed.overall_polarity, "neutral");
        assert_eq!(parsed.overall_score, 0.0);
        assert!(parsed.speaker_sentiments.is_empty());
    }
}
