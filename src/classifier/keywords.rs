//! Deterministic keyword classifier.
//!
//! Rule groups are checked in priority order and the first group with a
//! match decides the category:
//! opt-out > urgent > complaint > interested > positive feedback > question.
//! Anything else is neutral. Patterns cover English and Swahili.

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::classifier::{Category, Classification, ClassificationSource};

/// One category with its compiled pattern.
#[derive(Debug, Clone)]
struct KeywordRule {
    category: Category,
    regex: Regex,
}

const OPT_OUT_PATTERNS: &[&str] = &[
    r"\bstop\b",
    r"\bunsubscribe\b",
    r"\bopt[\s\-]?out\b",
    r"\bremove\b",
    r"\bquit\b",
    r"\bdelete my (number|contact|details)\b",
    r"\bblock me\b",
    r"\b(don'?t|do not|dont) (message|text|contact|send|sms)\b",
    r"\b(don'?t|do not|dont) want (these|this|your|any|more)( \w+)? messages\b",
    r"\bnot interested\b",
    r"\b(enough|too many) messages\b",
    r"\bleave me alone\b",
    r"\bannoying\b",
    r"\bspam(ming)?\b",
    // Swahili
    r"\bhatutaki\b",
    r"\bsitaki\b",
    r"\bacha\b",
    r"\bwacha\b",
    r"\bhapana\b",
    r"\businitumie\b",
    r"\bnitoe\b",
    r"\bniondoe\b",
];

const URGENT_PATTERNS: &[&str] = &[
    r"\burgent(ly)?\b",
    r"\bemergency\b",
    r"\basap\b",
    r"\bimmediately\b",
    r"\bharaka\b",
    r"\bsasa hivi\b",
    r"\bdharura\b",
];

const COMPLAINT_PATTERNS: &[&str] = &[
    r"\bcomplain(t|ts|ing)?\b",
    r"\bdisappointed\b",
    r"\bnot happy\b",
    r"\bunhappy\b",
    r"\bterrible\b",
    r"\bawful\b",
    r"\bworst\b",
    r"\bpoor (quality|service)\b",
    r"\bscam\b",
    r"\bhate\b",
    r"\bnever (received|got|arrived)\b",
    r"\b(wrong|damaged|broken) (item|order|size|product)\b",
    r"\brefund\b",
    r"\bmbaya\b",
    r"\bsijafurahi\b",
];

const INTERESTED_PATTERNS: &[&str] = &[
    r"\binterested\b",
    r"\b(i )?want (to )?(buy|order|get|know)\b",
    r"\bbuy\b",
    r"\border\b",
    r"\bpurchase\b",
    r"\btell me more\b",
    r"\bsounds good\b",
    r"\byes\b",
    r"\bnataka\b",
    r"\bnipe\b",
    r"\bnitanunua\b",
];

const POSITIVE_PATTERNS: &[&str] = &[
    r"\bthank(s| you)\b",
    r"\blove\b",
    r"\bgreat\b",
    r"\bawesome\b",
    r"\bamazing\b",
    r"\bexcellent\b",
    r"\basante\b",
    r"\bpoa\b",
    r"\bnzuri\b",
    r"\bsafi\b",
];

const QUESTION_PATTERNS: &[&str] = &[
    r"\?",
    r"^\s*(how|what|when|where|why|which|who|can|could|do|does|is|are)\b",
    r"\bprice(s)?\b",
    r"\bcost\b",
    r"\bavailable\b",
    r"\bbei\b",
    r"\bngapi\b",
    r"\bwapi\b",
    r"\blini\b",
];

/// Keyword-based fallback classifier.
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
    opt_out: Option<Regex>,
    confidence: f32,
}

impl KeywordClassifier {
    /// Create a classifier with the built-in English and Swahili rules.
    pub fn default_rules(confidence: f32) -> Self {
        let groups: [(Category, &[&str]); 6] = [
            (Category::OptOutDesired, OPT_OUT_PATTERNS),
            (Category::Urgent, URGENT_PATTERNS),
            (Category::Complaint, COMPLAINT_PATTERNS),
            (Category::Interested, INTERESTED_PATTERNS),
            (Category::PositiveFeedback, POSITIVE_PATTERNS),
            (Category::Question, QUESTION_PATTERNS),
        ];

        let rules: Vec<KeywordRule> = groups
            .iter()
            .filter_map(|(category, patterns)| {
                compile_group(patterns).map(|regex| KeywordRule {
                    category: *category,
                    regex,
                })
            })
            .collect();

        let opt_out = rules
            .iter()
            .find(|r| r.category == Category::OptOutDesired)
            .map(|r| r.regex.clone());

        Self {
            rules,
            opt_out,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Whether `text` contains any stop keyword.
    pub fn is_opt_out(&self, text: &str) -> bool {
        self.opt_out
            .as_ref()
            .is_some_and(|r| r.is_match(&normalize(text)))
    }

    pub fn classify(&self, text: &str) -> Classification {
        let normalized = normalize(text);
        let category = self
            .rules
            .iter()
            .find(|rule| rule.regex.is_match(&normalized))
            .map(|rule| rule.category)
            .unwrap_or(Category::Neutral);

        debug!(category = %category, "Keyword classification");
        Classification::new(
            category,
            self.confidence,
            false,
            ClassificationSource::Keywords,
        )
    }
}

/// Lower-case and fold typographic apostrophes so `don’t` matches `don't`.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn compile_group(patterns: &[&str]) -> Option<Regex> {
    let joined = patterns
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    match RegexBuilder::new(&joined).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(error = %e, "Skipping keyword group that failed to compile");
            None
        }
    }
}
