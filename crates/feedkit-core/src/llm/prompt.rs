//! # Prompt Templates
//!
//! The system prompt and response schema are plain data: the defaults below
//! can be replaced wholesale from `feedkit.toml` without touching the
//! pipeline. Only the user prompt (the numbered comment list) is built here
//! per batch.

use serde_json::{json, Value};

use crate::batch::Batch;
use crate::model::Emotion;

/// Prompt and schema handed to every completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub system_prompt: String,
    pub schema: Value,
    /// Top-level key of the result array in the response object.
    pub results_key: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            schema: default_schema(),
            results_key: "analyses".to_string(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "Analiza comentarios de clientes. Para cada uno extrae:

EMOCIONES (0-1):
- satisfaccion: nivel de satisfaccion o alegria
- frustracion: nivel de frustracion
- enojo: nivel de enojo o ira
- confianza: nivel de confianza o esperanza
- decepcion: nivel de decepcion o tristeza
- confusion: nivel de confusion o neutralidad
- anticipacion: nivel de anticipacion o sorpresa

CHURN_RISK (0-1):
- 0.8-1.0: menciona cancelar o cambiar de proveedor
- 0.4-0.7: quejas fuertes
- 0.0-0.3: satisfecho

PAIN_POINTS:
- Maximo 2, muy breves (menos de 30 caracteres)
- Solo problemas reales mencionados

NPS:
- promoter: muy positivo (9-10)
- passive: neutral (7-8)
- detractor: negativo (0-6)

Se preciso y objetivo. Responde solo en JSON.";

/// Response schema: `{"analyses": [{emotions, churn_risk, pain_points, nps}]}`.
///
/// Kept within the subset accepted by OpenAI strict structured outputs
/// (every property required, no additional properties).
pub fn default_schema() -> Value {
    let emotion_props: serde_json::Map<String, Value> = Emotion::ALL
        .iter()
        .map(|e| (e.key().to_string(), json!({ "type": "number" })))
        .collect();
    let emotion_keys: Vec<&str> = Emotion::ALL.iter().map(|e| e.key()).collect();

    json!({
        "type": "object",
        "properties": {
            "analyses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "emotions": {
                            "type": "object",
                            "properties": emotion_props,
                            "required": emotion_keys,
                            "additionalProperties": false
                        },
                        "churn_risk": { "type": "number" },
                        "pain_points": {
                            "type": "array",
                            "items": { "type": "string" }
                        },
                        "nps": {
                            "type": "string",
                            "enum": ["promoter", "passive", "detractor"]
                        }
                    },
                    "required": ["emotions", "churn_risk", "pain_points", "nps"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["analyses"],
        "additionalProperties": false
    })
}

impl PromptSet {
    /// Numbered comment list for one batch.
    ///
    /// Newlines inside a comment are flattened so the numbering stays
    /// unambiguous.
    pub fn user_prompt(&self, batch: &Batch) -> String {
        let mut listing = String::new();
        for (i, item) in batch.items.iter().enumerate() {
            let flat = item.text.split_whitespace().collect::<Vec<_>>().join(" ");
            listing.push_str(&format!("{}. {}\n", i + 1, flat));
        }

        format!(
            "Analiza estos {n} comentarios:\n\n{listing}\nResponde con JSON array '{key}' con {n} elementos en orden.",
            n = batch.len(),
            listing = listing,
            key = self.results_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchItem;

    fn batch(texts: &[&str]) -> Batch {
        Batch {
            id: 0,
            items: texts
                .iter()
                .enumerate()
                .map(|(i, t)| BatchItem {
                    index: i * 10,
                    text: t.to_string(),
                    estimated_tokens: 1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_user_prompt_numbers_comments() {
        let prompt = PromptSet::default().user_prompt(&batch(&["Muy caro", "Excelente\nservicio"]));
        assert!(prompt.starts_with("Analiza estos 2 comentarios:"));
        assert!(prompt.contains("1. Muy caro\n"));
        assert!(prompt.contains("2. Excelente servicio\n"));
        assert!(prompt.contains("'analyses' con 2 elementos"));
    }

    #[test]
    fn test_schema_requires_every_emotion() {
        let schema = default_schema();
        let required = &schema["properties"]["analyses"]["items"]["properties"]["emotions"]["required"];
        let keys: Vec<&str> = required
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(keys.len(), 7);
        assert!(keys.contains(&"frustracion"));
    }

    #[test]
    fn test_system_prompt_mentions_all_emotions() {
        let prompts = PromptSet::default();
        for emotion in Emotion::ALL {
            assert!(prompts.system_prompt.contains(emotion.key()), "{}", emotion.key());
        }
    }
}
