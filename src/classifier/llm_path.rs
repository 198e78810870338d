//! Model-backed classification.
//!
//! Asks the configured `LlmProvider` for a JSON verdict. Malformed output is
//! retried a bounded number of times with a short fixed delay; a rate-limit
//! error gets one retry after a longer backoff. Any other failure is
//! returned to the caller, which falls back to keywords.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::classifier::{Category, Classification, ClassificationSource};
use crate::config::ClassifierConfig;
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::retry::Sleeper;

const SYSTEM_PROMPT: &str = r#"You classify customer replies to a WhatsApp marketing campaign sent by a retail business in Kenya.
Replies may be in English, Swahili, Sheng or another local language, and may mix them.

Pick exactly one category:
- interested: wants to buy, order, or learn more about a product
- complaint: unhappy with a product, delivery or service
- question: asks for information (price, availability, location, hours)
- opt_out_desired: wants to stop receiving messages, in any wording or language
- positive_feedback: thanks or praise without a purchase intent
- neutral: acknowledgements and anything else
- urgent: needs a human immediately

Opt-out rule: if there is ANY doubt whether the sender wants messages to stop, answer opt_out_desired.
Words like "stop", "unsubscribe", "remove", "quit", "sitaki", "hatutaki", "acha", "wacha", "hapana", "usinitumie" are opt-out.

Respond with a single JSON object and nothing else:
{"category": "<one of the categories above>", "confidence": <number between 0 and 1>, "requires_attention": <true|false>, "reason": "<short explanation>"}"#;

/// Raw model verdict.
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    category: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    requires_attention: bool,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

/// Primary classification path.
pub struct ModelClassifier {
    provider: Arc<dyn LlmProvider>,
    sleeper: Arc<dyn Sleeper>,
    config: ClassifierConfig,
}

impl ModelClassifier {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        sleeper: Arc<dyn Sleeper>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            provider,
            sleeper,
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Classify `text`, retrying malformed output and one rate limit.
    pub async fn classify(&self, text: &str) -> Result<Classification, LlmError> {
        let mut malformed_attempts = 0u32;
        let mut rate_limit_retried = false;

        loop {
            let request = build_request(text);
            match self.provider.complete(request).await {
                Ok(response) => match parse_verdict(&response.content) {
                    Ok(classification) => return Ok(classification),
                    Err(reason) => {
                        if malformed_attempts >= self.config.malformed_retries {
                            return Err(LlmError::InvalidResponse {
                                provider: self.provider.model_name().to_string(),
                                reason,
                            });
                        }
                        malformed_attempts += 1;
                        debug!(
                            attempt = malformed_attempts,
                            reason = %reason,
                            "Malformed classifier output, retrying"
                        );
                        self.sleeper.sleep(self.config.malformed_retry_delay).await;
                    }
                },
                Err(LlmError::RateLimited { retry_after, .. }) if !rate_limit_retried => {
                    rate_limit_retried = true;
                    let wait = retry_after
                        .unwrap_or(self.config.rate_limit_backoff)
                        .max(self.config.rate_limit_backoff);
                    warn!(wait_secs = wait.as_secs(), "Classifier rate limited, backing off");
                    self.sleeper.sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn build_request(text: &str) -> CompletionRequest {
    CompletionRequest::new(vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Customer reply:\n\"\"\"\n{text}\n\"\"\"")),
    ])
    .with_max_tokens(200)
    .with_temperature(0.0)
    .with_json_output()
}

/// Parse the model's JSON verdict into a `Classification`.
fn parse_verdict(raw: &str) -> Result<Classification, String> {
    let json_str = extract_json_object(raw);
    let verdict: ModelVerdict =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    let category: Category = verdict.category.parse()?;
    let confidence = verdict.confidence.ok_or("missing confidence")?;
    if !confidence.is_finite() {
        return Err("confidence is not a number".into());
    }

    Ok(Classification::new(
        category,
        confidence,
        verdict.requires_attention,
        ClassificationSource::Model,
    ))
}

/// Pull a JSON object out of a model reply that may be wrapped in prose or
/// a markdown code fence.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::llm::{CompletionResponse, FinishReason};
    use crate::retry::RecordingSleeper;

    /// Replays scripted results in order, then repeats the last one.
    struct ScriptedProvider {
        script: Mutex<Vec<Result<String, LlmError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.remove(0)
            } else {
                match &script[0] {
                    Ok(s) => Ok(s.clone()),
                    Err(_) => Err(LlmError::RequestFailed {
                        provider: "scripted".into(),
                        reason: "down".into(),
                    }),
                }
            };
            next.map(|content| CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn classifier(
        script: Vec<Result<String, LlmError>>,
    ) -> (ModelClassifier, Arc<ScriptedProvider>, Arc<RecordingSleeper>) {
        let provider = Arc::new(ScriptedProvider::new(script));
        let sleeper = Arc::new(RecordingSleeper::new());
        let c = ModelClassifier::new(
            provider.clone(),
            sleeper.clone(),
            ClassifierConfig::default(),
        );
        (c, provider, sleeper)
    }

    const NEUTRAL: &str =
        r#"{"category": "neutral", "confidence": 0.9, "requires_attention": false, "reason": "ok"}"#;

    #[test]
    fn parse_plain_json() {
        let c = parse_verdict(NEUTRAL).unwrap();
        assert_eq!(c.category, Category::Neutral);
        assert!((c.confidence - 0.9).abs() < 0.001);
        assert_eq!(c.source, ClassificationSource::Model);
    }

    #[test]
    fn parse_fenced_json() {
        let raw = "Here you go:\n```json\n{\"category\": \"question\", \"confidence\": 0.7}\n```";
        assert_eq!(parse_verdict(raw).unwrap().category, Category::Question);
    }

    #[test]
    fn parse_forces_attention_for_complaint() {
        let raw = r#"{"category": "complaint", "confidence": 0.8, "requires_attention": false}"#;
        assert!(parse_verdict(raw).unwrap().requires_attention);
    }

    #[test]
    fn parse_accepts_spelling_variants() {
        let raw = r#"{"category": "DESIRED_OPT_OUT", "confidence": 1.4}"#;
        let c = parse_verdict(raw).unwrap();
        assert!(c.is_opt_out);
        assert!((c.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_rejects_unknown_category_and_garbage() {
        assert!(parse_verdict(r#"{"category": "sarcastic", "confidence": 0.5}"#).is_err());
        assert!(parse_verdict(r#"{"category": "neutral"}"#).is_err());
        assert!(parse_verdict("I think this is neutral").is_err());
    }

    #[test]
    fn extract_json_bounds() {
        assert_eq!(extract_json_object("noise {\"a\":1} tail"), "{\"a\":1}");
        assert_eq!(extract_json_object("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(extract_json_object("nothing"), "nothing");
    }

    #[tokio::test]
    async fn malformed_output_retried_then_succeeds() {
        let (c, provider, sleeper) =
            classifier(vec![Ok("nope".into()), Ok(NEUTRAL.into())]);
        let result = c.classify("hello").await.unwrap();
        assert_eq!(result.category, Category::Neutral);
        assert_eq!(provider.calls(), 2);
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn malformed_budget_exhausted() {
        let (c, provider, sleeper) = classifier(vec![Ok("nope".into())]);
        let err = c.classify("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
        // First attempt plus two retries.
        assert_eq!(provider.calls(), 3);
        assert_eq!(sleeper.calls().len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_gets_one_long_backoff() {
        let (c, provider, sleeper) = classifier(vec![
            Err(LlmError::RateLimited {
                provider: "scripted".into(),
                retry_after: None,
            }),
            Ok(NEUTRAL.into()),
        ]);
        c.classify("hello").await.unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(30)]);
    }

    #[tokio::test]
    async fn second_rate_limit_is_returned() {
        let (c, provider, _sleeper) = classifier(vec![
            Err(LlmError::RateLimited {
                provider: "scripted".into(),
                retry_after: None,
            }),
            Err(LlmError::RateLimited {
                provider: "scripted".into(),
                retry_after: Some(Duration::from_secs(5)),
            }),
            Ok(NEUTRAL.into()),
        ]);
        let err = c.classify("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn request_failure_is_not_retried() {
        let (c, provider, sleeper) = classifier(vec![Err(LlmError::RequestFailed {
            provider: "scripted".into(),
            reason: "connection refused".into(),
        })]);
        assert!(c.classify("hello").await.is_err());
        assert_eq!(provider.calls(), 1);
        assert!(sleeper.calls().is_empty());
    }
}
