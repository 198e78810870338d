//! Phone identity normalization.
//!
//! Every number is reduced to one canonical international form (`+<cc><nsn>`)
//! used as the lookup key. Historical rows predate normalization, so lookups
//! also go through [`NumberingPlan::variations`], which enumerates the other
//! textual forms the same number is likely stored under.
//!
//! The rules are heuristic and tied to a single numbering plan. Nothing beyond
//! digit counts is validated.

/// Numbering plan used to canonicalize local numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingPlan {
    /// Country calling code without `+` (e.g. "254").
    pub country_code: String,
    /// Length of the national significant number (digits after the country code).
    pub national_number_len: usize,
    /// Trunk prefix dialled before local numbers (e.g. "0").
    pub trunk_prefix: String,
    /// Prefix the messaging transport puts in front of addresses.
    pub transport_prefix: String,
}

impl Default for NumberingPlan {
    fn default() -> Self {
        Self {
            country_code: "254".to_string(),
            national_number_len: 9,
            trunk_prefix: "0".to_string(),
            transport_prefix: "whatsapp:".to_string(),
        }
    }
}

impl NumberingPlan {
    /// Build a plan from environment variables, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            country_code: std::env::var("PHONE_COUNTRY_CODE")
                .map(|s| s.trim().trim_start_matches('+').to_string())
                .ok()
                .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(defaults.country_code),
            national_number_len: std::env::var("PHONE_NATIONAL_NUMBER_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.national_number_len),
            trunk_prefix: std::env::var("PHONE_TRUNK_PREFIX").unwrap_or(defaults.trunk_prefix),
            transport_prefix: std::env::var("PHONE_TRANSPORT_PREFIX")
                .unwrap_or(defaults.transport_prefix),
        }
    }

    /// Remove the transport decoration (`whatsapp:`) if present.
    pub fn strip_transport<'a>(&self, raw: &'a str) -> &'a str {
        let trimmed = raw.trim();
        let prefix_len = self.transport_prefix.len();
        if prefix_len > 0
            && trimmed.len() >= prefix_len
            && trimmed.is_char_boundary(prefix_len)
            && trimmed[..prefix_len].eq_ignore_ascii_case(&self.transport_prefix)
        {
            trimmed[prefix_len..].trim()
        } else {
            trimmed
        }
    }

    /// Canonicalize a phone number into `+<country code><national number>`.
    ///
    /// Returns `None` only when the input carries fewer digits than a
    /// national number; anything longer yields a best-effort guess.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let digits: String = self
            .strip_transport(raw)
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();

        if digits.len() < self.national_number_len {
            return None;
        }

        let cc = &self.country_code;
        let nsn = self.national_number_len;
        let trunk = &self.trunk_prefix;

        let canonical = if digits.starts_with(cc.as_str()) && digits.len() == cc.len() + nsn {
            format!("+{digits}")
        } else if !trunk.is_empty()
            && digits.starts_with(trunk.as_str())
            && digits.len() == trunk.len() + nsn
        {
            format!("+{cc}{}", &digits[trunk.len()..])
        } else if digits.len() == nsn {
            format!("+{cc}{digits}")
        } else {
            format!("+{digits}")
        };

        Some(canonical)
    }

    /// Enumerate textual forms this number may have been stored under.
    ///
    /// The canonical form (when one exists) is always the first element.
    /// The list never contains duplicates.
    pub fn variations(&self, raw: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |s: String| {
            if !s.is_empty() && !out.contains(&s) {
                out.push(s);
            }
        };

        let Some(canonical) = self.normalize(raw) else {
            push(self.strip_transport(raw).to_string());
            return out;
        };

        let bare = canonical.trim_start_matches('+').to_string();
        push(canonical.clone());
        push(bare.clone());

        if let Some(national) = bare.strip_prefix(self.country_code.as_str())
            && national.len() == self.national_number_len
        {
            push(format!("{}{national}", self.trunk_prefix));
            push(national.to_string());
        }

        push(format!("{}{canonical}", self.transport_prefix));
        push(self.strip_transport(raw).to_string());
        out
    }
}
