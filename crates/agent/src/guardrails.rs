/// Said whenever a turn cannot produce a proper reply.
pub const FALLBACK_APOLOGY: &str = "I'm sorry, I'm having trouble on my end right now. \
Please call us back in a few minutes and we'll get you taken care of.";

const RAW_ERROR_MARKERS: [&str; 8] = [
    "error:",
    "panicked",
    "backtrace",
    "stack trace",
    "sqlx::",
    "reqwest::",
    "traceback",
    "exception",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
    Degrade { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    /// The text that should actually be spoken for `original`.
    pub fn into_spoken(self, original: String) -> String {
        match self {
            Self::Allow => original,
            Self::Deny { user_message, .. } | Self::Degrade { user_message, .. } => user_message,
        }
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }
}

/// Last check on outgoing text before it reaches the voice platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_spoken_chars: usize,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_spoken_chars: 600 }
    }
}

impl GuardrailPolicy {
    pub fn review(&self, reply: &str) -> GuardrailDecision {
        let trimmed = reply.trim();
        if trimmed.is_empty() {
            return GuardrailDecision::Deny {
                reason_code: "empty_reply",
                user_message: FALLBACK_APOLOGY.to_string(),
            };
        }

        let lowered = trimmed.to_ascii_lowercase();
        if trimmed.starts_with('{')
            || trimmed.starts_with('[')
            || RAW_ERROR_MARKERS.iter().any(|marker| lowered.contains(marker))
        {
            return GuardrailDecision::Deny {
                reason_code: "raw_error_text",
                user_message: FALLBACK_APOLOGY.to_string(),
            };
        }

        if trimmed.chars().count() > self.max_spoken_chars {
            return GuardrailDecision::Degrade {
                reason_code: "reply_too_long",
                user_message: truncate_at_sentence(trimmed, self.max_spoken_chars),
            };
        }

        GuardrailDecision::Allow
    }
}

fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(['.', '?', '!']) {
        Some(end) if end > 0 => cut[..=end].to_string(),
        _ => cut.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardrailDecision, GuardrailPolicy, FALLBACK_APOLOGY};

    #[test]
    fn ordinary_reply_is_allowed() {
        let policy = GuardrailPolicy::default();
        assert_eq!(
            policy.review("Great, what's the address for the property?"),
            GuardrailDecision::Allow
        );
    }

    #[test]
    fn raw_error_text_is_replaced_with_apology() {
        let policy = GuardrailPolicy::default();
        for reply in [
            "error: connection refused",
            "thread 'main' panicked at src/lib.rs",
            "{\"detail\": \"upstream\"}",
            "   ",
        ] {
            let decision = policy.review(reply);
            assert!(matches!(decision, GuardrailDecision::Deny { .. }), "{reply}");
            assert_eq!(decision.into_spoken(reply.to_string()), FALLBACK_APOLOGY);
        }
    }

    #[test]
    fn long_reply_is_cut_at_a_sentence_boundary() {
        let policy = GuardrailPolicy { max_spoken_chars: 40 };
        let decision = policy.review("We mow lawns every week. We also edge and blow the walkways.");

        assert_eq!(decision.reason_code(), Some("reply_too_long"));
        assert_eq!(
            decision.into_spoken(String::new()),
            "We mow lawns every week."
        );
    }
}
