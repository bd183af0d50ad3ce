use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use feedkit_core::error::CompletionError;
use feedkit_core::llm::{CompletionClient, CompletionRequest};
use feedkit_core::model::Comment;
use serde_json::{json, Value};
use tokio::time::Instant;

/// What a [`ScriptedClient`] does for one call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this text immediately.
    Respond(String),
    /// Return this text after sleeping.
    Delayed(Duration, String),
    Fail(CompletionError),
    /// Never return; only a timeout gets the caller out.
    Hang,
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Step + Send + Sync>;

enum Script {
    Sequence(Mutex<VecDeque<Step>>),
    Function(Responder),
}

/// A `CompletionClient` that plays a script instead of calling a provider.
///
/// Every call is recorded (timestamp and user prompt) before the step runs,
/// so tests can assert on rate limiting and batch contents afterwards.
pub struct ScriptedClient {
    script: Script,
    model: String,
    calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedClient {
    /// Play `steps` in order, one per call. Calls past the end fail with a
    /// non-transient error.
    pub fn sequence(steps: Vec<Step>) -> Self {
        Self::with_script(Script::Sequence(Mutex::new(steps.into())))
    }

    /// Decide each call's step from the request.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Step + Send + Sync + 'static,
    {
        Self::with_script(Script::Function(Box::new(responder)))
    }

    /// Answer every batch with `analysis_for(text)` per listed comment,
    /// wrapped in the `analyses` object the default prompt asks for.
    pub fn echo<F>(analysis_for: F) -> Self
    where
        F: Fn(&str) -> Value + Send + Sync + 'static,
    {
        Self::from_fn(move |request| {
            let items: Vec<Value> = prompt_items(&request.user_prompt)
                .iter()
                .map(|text| analysis_for(text))
                .collect();
            Step::Respond(json!({ "analyses": items }).to_string())
        })
    }

    /// Always answer with the same step.
    pub fn always(step: Step) -> Self {
        Self::from_fn(move |_| step.clone())
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            model: "scripted".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// When each call started, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    fn next_step(&self, request: &CompletionRequest) -> Step {
        match &self.script {
            Script::Sequence(steps) => steps.lock().unwrap().pop_front().unwrap_or_else(|| {
                Step::Fail(CompletionError::BadRequest {
                    message: "script exhausted".to_string(),
                })
            }),
            Script::Function(responder) => responder(request),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), request.user_prompt.clone()));

        match self.next_step(request) {
            Step::Respond(text) => Ok(text),
            Step::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Comment texts listed in a batch user prompt (`"N. text"` lines).
pub fn prompt_items(user_prompt: &str) -> Vec<String> {
    user_prompt
        .lines()
        .filter_map(|line| {
            let (number, text) = line.split_once(". ")?;
            number.parse::<usize>().ok()?;
            Some(text.to_string())
        })
        .collect()
}

/// One analysis element in the default response shape.
///
/// Promoters get high satisfaction and trust, detractors high frustration
/// and disappointment, passives sit in the middle.
pub fn analysis_json(churn_risk: f64, pain_points: &[&str], nps_category: &str) -> Value {
    let (positive, negative) = match nps_category {
        "promoter" => (0.9, 0.05),
        "detractor" => (0.1, 0.8),
        _ => (0.4, 0.3),
    };
    json!({
        "emotions": {
            "satisfaccion": positive,
            "frustracion": negative,
            "enojo": negative / 2.0,
            "confianza": positive,
            "decepcion": negative,
            "confusion": 0.1,
            "anticipacion": 0.2
        },
        "churn_risk": churn_risk,
        "pain_points": pain_points,
        "nps_category": nps_category
    })
}

/// Keyword-driven analysis for Spanish feedback fixtures.
pub fn keyword_analysis(text: &str) -> Value {
    let lower = text.to_lowercase();
    let mut pain_points = Vec::new();
    if lower.contains("caro") || lower.contains("precio") {
        pain_points.push("precio");
    }
    if lower.contains("lento") || lower.contains("tarda") {
        pain_points.push("velocidad");
    }
    if lower.contains("soporte") || lower.contains("atencion") {
        pain_points.push("atencion al cliente");
    }

    if lower.contains("excelente") || lower.contains("encanta") {
        analysis_json(0.05, &pain_points, "promoter")
    } else if pain_points.is_empty() {
        analysis_json(0.3, &pain_points, "passive")
    } else {
        analysis_json(0.8, &pain_points, "detractor")
    }
}

/// Build a comment arena from `(text, rating)` pairs.
pub fn comments_from(rows: &[(&str, i64)]) -> Vec<Comment> {
    rows.iter()
        .enumerate()
        .map(|(i, (text, rating))| Comment::new(i, *text, *rating))
        .collect()
}

/// `n` distinct, non-trivial comments, with some exact repeats mixed in.
pub fn feedback_corpus(n: usize) -> Vec<Comment> {
    const TOPICS: &[&str] = &[
        "el envio llego tarde",
        "la aplicacion se cierra al pagar",
        "muy caro para lo que ofrecen",
        "excelente atencion del equipo",
        "el soporte nunca responde",
        "me encanta la nueva interfaz",
    ];
    (0..n)
        .map(|i| {
            let text = if i % 7 == 0 {
                TOPICS[0].to_string()
            } else {
                format!("{} pedido {}", TOPICS[i % TOPICS.len()], i)
            };
            Comment::new(i, text, (i % 11) as i64)
        })
        .collect()
}
