//! Auto-response texts.

use crate::classifier::Category;
use crate::optout::ledger::confirmation_message;

/// Appended to every response that isn't an opt-out confirmation.
pub const COMPLIANCE_FOOTER: &str = "Reply STOP to opt out.";

/// Composes the reply sent back to an inbound message.
#[derive(Debug, Clone)]
pub struct AutoResponder {
    business_name: String,
}

impl AutoResponder {
    pub fn new(business_name: impl Into<String>) -> Self {
        Self {
            business_name: business_name.into(),
        }
    }

    /// Pick the response for a classified reply. An opt-out always gets the
    /// confirmation text, whatever the category says.
    pub fn compose(&self, category: Category, is_opt_out: bool) -> String {
        if is_opt_out || category == Category::OptOutDesired {
            return self.opt_out_confirmation();
        }

        let business = &self.business_name;
        let body = match category {
            Category::Interested => format!(
                "Thank you for your interest in {business}! A member of our team will contact \
                 you shortly with more information."
            ),
            Category::PositiveFeedback => format!(
                "Thank you for your kind words! Everyone at {business} appreciates hearing from you."
            ),
            Category::Question => "Thank you for your question! Our customer service team will \
                 get back to you within 24 hours."
                .to_string(),
            Category::Complaint => format!(
                "We're sorry to hear that. Your feedback has been passed to the {business} team \
                 and someone will follow up with you."
            ),
            Category::Urgent => "We've received your message and marked it urgent. A member of \
                 our team will contact you as soon as possible."
                .to_string(),
            Category::Neutral | Category::OptOutDesired => "Thank you for your message! We've \
                 received your reply and will follow up if needed."
                .to_string(),
        };
        format!("{body}\n\n{COMPLIANCE_FOOTER}")
    }

    pub fn opt_out_confirmation(&self) -> String {
        confirmation_message(&self.business_name)
    }
}
