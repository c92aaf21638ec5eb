//! Prompt builders and JSON output contracts
//!
//! Contracts are JSON Schemas passed to `chat_json`; validation failures
//! surface as `InvalidResponse` and feed the retry policy of each phase.

use podgraph_core::{EpisodeMetadata, MeaningfulUnit, Segment};
use serde_json::{json, Value};

/// Speaker mapping contract: an object keyed by generic label. Values are
/// either a plain `"Name (role)"` string or `{name, confidence}`.
pub fn speaker_schema() -> Value {
    json!({
        "type": "object",
        "minProperties": 1,
        "additionalProperties": {
            "anyOf": [
                {"type": "string"},
                {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string"},
                        "confidence": {"type": "number"}
                    }
                }
            ]
        }
    })
}

pub fn speaker_prompt(segments: &[Segment], meta: &EpisodeMetadata, window: usize) -> String {
    let excerpt: String = segments
        .iter()
        .take(window)
        .map(|s| format!("{}: {}", s.speaker, s.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Identify the real names of the speakers in this podcast transcript.\n\n\
         Podcast: {}\n\
         Episode: {}\n\
         Episode description (likely to contain guest names):\n{}\n\n\
         Transcript excerpt:\n{}\n\n\
         Map every generic speaker label to the person's name and role.\n\
         Respond with JSON only, for example:\n\
         {{\"SPEAKER_1\": {{\"name\": \"Alice Host (host)\", \"confidence\": 0.9}}, \
         \"SPEAKER_2\": {{\"name\": \"Bob Guest (guest)\", \"confidence\": 0.8}}}}",
        meta.podcast.name, meta.title, meta.description, excerpt
    )
}

/// Conversation structure contract.
pub fn conversation_schema() -> Value {
    json!({
        "type": "object",
        "required": ["units"],
        "properties": {
            "units": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["start_index", "end_index", "unit_type"],
                    "properties": {
                        "start_index": {"type": "integer", "minimum": 0},
                        "end_index": {"type": "integer", "minimum": 0},
                        "unit_type": {"type": "string"},
                        "description": {"type": "string"}
                    }
                }
            },
            "themes": {"type": "array"},
            "boundaries": {"type": "array"}
        }
    })
}

pub fn conversation_prompt(segments: &[Segment]) -> String {
    let listing: String = segments
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{i}] {}: {}", s.speaker, s.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Analyze the structure of this podcast conversation. Group the numbered \
         segments into coherent thematic units.\n\n\
         Segments:\n{listing}\n\n\
         Rules:\n\
         1. Every unit covers a contiguous range of segment indices (inclusive)\n\
         2. Together the units must cover at least 90% of the segments\n\
         3. unit_type is a free-form label such as \"introduction\", \"discussion\", \"q_and_a\"\n\
         4. Also list episode-level themes and the segment indices where the topic shifts\n\n\
         Respond with JSON only:\n\
         {{\"units\": [{{\"start_index\": 0, \"end_index\": 12, \"unit_type\": \"introduction\", \
         \"description\": \"...\"}}],\n\
          \"themes\": [{{\"theme\": \"...\", \"description\": \"...\"}}],\n\
          \"boundaries\": [{{\"index\": 13, \"reason\": \"...\"}}]}}",
    )
}

/// Combined extraction contract: four arrays in one response.
pub fn combined_extraction_schema() -> Value {
    json!({
        "type": "object",
        "required": ["entities", "quotes", "relationships", "insights"],
        "properties": {
            "entities": {"type": "array"},
            "quotes": {"type": "array"},
            "relationships": {"type": "array"},
            "insights": {"type": "array"}
        }
    })
}

pub fn combined_extraction_prompt(
    unit: &MeaningfulUnit,
    meta: &EpisodeMetadata,
    unit_index: usize,
    total_units: usize,
) -> String {
    format!(
        "Extract knowledge from this podcast conversation excerpt.\n\n\
         Podcast: {} | Episode: {} | Section {}/{}\n\n\
         Text:\n{}\n\n\
         Extract four kinds of knowledge. Types are open vocabulary: use whatever \
         entity and relationship types best describe the content.\n\n\
         1. entities: {{\"value\", \"type\", \"confidence\", \"properties\": {{\"description\"}}}}\n\
         2. quotes: {{\"text\", \"speaker\", \"quote_type\", \"confidence\"}} - verbatim, notable\n\
         3. relationships: {{\"source\", \"target\", \"type\", \"confidence\", \
         \"properties\": {{\"bidirectional\"}}}} - between extracted entities, by value\n\
         4. insights: {{\"content\", \"type\", \"confidence\", \"supporting_entities\"}}\n\n\
         Respond with a single JSON object with keys entities, quotes, relationships, insights.",
        meta.podcast.name,
        meta.title,
        unit_index + 1,
        total_units,
        unit.text
    )
}

/// Single-category prompt for the fallback path (one call per category).
pub fn category_extraction_prompt(unit: &MeaningfulUnit, category: &str) -> String {
    let shape = match category {
        "entities" => "{\"value\", \"type\", \"confidence\", \"properties\": {\"description\"}}",
        "quotes" => "{\"text\", \"speaker\", \"quote_type\", \"confidence\"}",
        "relationships" => "{\"source\", \"target\", \"type\", \"confidence\"}",
        _ => "{\"content\", \"type\", \"confidence\", \"supporting_entities\"}",
    };
    format!(
        "Extract all {category} from this podcast excerpt. Types are open \
         vocabulary.\n\nText:\n{}\n\n\
         Respond with JSON only: {{\"{category}\": [{shape}]}}",
        unit.text
    )
}

pub fn category_schema(category: &str) -> Value {
    json!({
        "type": "object",
        "required": [category],
        "properties": { category: {"type": "array"} }
    })
}

/// Sentiment contract; analyzed separately from knowledge extraction with a
/// lower confidence bar because sentiment is inherently noisier.
pub fn sentiment_schema() -> Value {
    json!({
        "type": "object",
        "required": ["overall_polarity", "overall_score"],
        "properties": {
            "overall_polarity": {"type": "string"},
            "overall_score": {"type": "number"},
            "speaker_sentiments": {"type": "object"},
            "emotional_moments": {"type": "array"},
            "trajectory": {"type": "string"},
            "interaction_harmony": {"type": "number"},
            "discovered_sentiments": {"type": "array"},
            "confidence": {"type": "number"}
        }
    })
}

pub fn sentiment_prompt(unit: &MeaningfulUnit) -> String {
    format!(
        "Analyze the sentiment of this podcast conversation excerpt.\n\n\
         Text:\n{}\n\n\
         Respond with JSON only:\n\
         {{\"overall_polarity\": \"positive|negative|neutral|mixed\",\n\
          \"overall_score\": -1.0 to 1.0,\n\
          \"speaker_sentiments\": {{\"<speaker>\": {{\"polarity\", \"score\", \"dominant_emotion\"}}}},\n\
          \"emotional_moments\": [{{\"text\", \"speaker\", \"emotion\", \"intensity\"}}],\n\
          \"trajectory\": \"rising|falling|flat|volatile\",\n\
          \"interaction_harmony\": 0.0 to 1.0,\n\
          \"discovered_sentiments\": [{{\"type\", \"description\", \"confidence\"}}],\n\
          \"confidence\": 0.0 to 1.0}}\n\n\
         discovered_sentiments is open vocabulary: name any sentiment patterns \
         you observe, even unusual ones.",
        unit.text
    )
}
