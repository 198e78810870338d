//! Reply classification: a model-backed primary path with a deterministic
//! keyword fallback, isolated by a circuit breaker.

pub mod breaker;
pub mod keywords;
pub mod llm_path;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use keywords::KeywordClassifier;
pub use llm_path::ModelClassifier;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ClassifierConfig;
use crate::llm::LlmProvider;
use crate::retry::Sleeper;

/// Sentiment / intent category of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Interested,
    Complaint,
    Question,
    OptOutDesired,
    PositiveFeedback,
    Neutral,
    Urgent,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interested => "interested",
            Self::Complaint => "complaint",
            Self::Question => "question",
            Self::OptOutDesired => "opt_out_desired",
            Self::PositiveFeedback => "positive_feedback",
            Self::Neutral => "neutral",
            Self::Urgent => "urgent",
        }
    }

    /// Categories that always need a human to look at them.
    pub fn forces_attention(&self) -> bool {
        matches!(self, Self::Complaint | Self::Urgent | Self::OptOutDesired)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    /// Accepts the canonical names plus the spellings models tend to
    /// produce (`opt-out-desired`, `DESIRED_OPT_OUT`, `positive feedback`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        match key.as_str() {
            "interested" | "interest" => Ok(Self::Interested),
            "complaint" | "negative" => Ok(Self::Complaint),
            "question" => Ok(Self::Question),
            "opt_out_desired" | "desired_opt_out" | "opt_out" | "optout" => {
                Ok(Self::OptOutDesired)
            }
            "positive_feedback" | "positive" => Ok(Self::PositiveFeedback),
            "neutral" => Ok(Self::Neutral),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Unknown reply category: {}", s)),
        }
    }
}

/// Which path produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Model,
    Keywords,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub requires_attention: bool,
    pub is_opt_out: bool,
    pub source: ClassificationSource,
}

impl Classification {
    /// Build a verdict, clamping confidence and deriving the opt-out and
    /// attention flags from the category.
    pub fn new(
        category: Category,
        confidence: f32,
        requires_attention: bool,
        source: ClassificationSource,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            category,
            confidence,
            requires_attention: requires_attention || category.forces_attention(),
            is_opt_out: category == Category::OptOutDesired,
            source,
        }
    }
}

/// Composite classifier.
///
/// The model path runs only when a provider is configured and the breaker
/// is closed. Every model failure is absorbed here and answered by the
/// keyword path, so `classify` cannot fail.
pub struct ReplyClassifier {
    model: Option<ModelClassifier>,
    keywords: KeywordClassifier,
    breaker: Arc<CircuitBreaker>,
}

impl ReplyClassifier {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        sleeper: Arc<dyn Sleeper>,
        config: ClassifierConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown,
        ));
        Self::with_breaker(provider, sleeper, config, breaker)
    }

    /// Build with an externally owned breaker so tests can inspect and
    /// reset it.
    pub fn with_breaker(
        provider: Option<Arc<dyn LlmProvider>>,
        sleeper: Arc<dyn Sleeper>,
        config: ClassifierConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let keywords = KeywordClassifier::default_rules(config.fallback_confidence);
        let model = provider.map(|p| ModelClassifier::new(p, sleeper, config));
        if model.is_none() {
            info!("No LLM provider configured, replies use keyword classification only");
        }
        Self {
            model,
            keywords,
            breaker,
        }
    }

    /// Keyword-only classifier.
    pub fn fallback_only(config: ClassifierConfig) -> Self {
        Self::new(None, Arc::new(crate::retry::TokioSleeper), config)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Independent stop-keyword scan, regardless of which path classifies.
    pub fn keyword_opt_out(&self, text: &str) -> bool {
        self.keywords.is_opt_out(text)
    }

    pub async fn classify(&self, text: &str) -> Classification {
        let Some(model) = &self.model else {
            return self.keywords.classify(text);
        };

        if !self.breaker.allow_request() {
            warn!("Classifier circuit open, using keyword fallback");
            return self.keywords.classify(text);
        }

        match model.classify(text).await {
            Ok(classification) => {
                self.breaker.record_success();
                classification
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(model = %model.model_name(), error = %e, "Model classification failed, using keyword fallback");
                self.keywords.classify(text)
            }
        }
    }
}
