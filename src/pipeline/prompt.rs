//! Prompt construction from a normalized message.
//!
//! The prompt is the body with quoted history removed, falling back to the
//! subject. Short messages sent to a topic alias (`lakers@…`, `weather@…`)
//! are expanded from a per-category template.

use crate::mail::strip_quoted_text;
use crate::pipeline::types::InboundMessage;

/// Messages at or under this many words count as short.
pub const SHORT_PROMPT_WORDS: usize = 4;

const SPORTS_ALIASES: &[&str] = &["manutd", "lakers", "arsenal", "yankees"];
const FINANCE_ALIASES: &[&str] = &["aapl", "tsla", "msft", "finance", "stocks"];
const WEATHER_ALIASES: &[&str] = &["weather", "london", "nyc", "forecast"];

/// Template category for a topic alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCategory {
    Sports,
    Finance,
    Weather,
}

impl TopicCategory {
    /// Category for an alias. Unknown aliases fall back to sports.
    pub fn for_alias(alias: &str) -> Self {
        let alias = alias.to_lowercase();
        if FINANCE_ALIASES.contains(&alias.as_str()) {
            Self::Finance
        } else if WEATHER_ALIASES.contains(&alias.as_str()) {
            Self::Weather
        } else {
            Self::Sports
        }
    }

    /// Whether `alias` names a known topic.
    pub fn is_alias(alias: &str) -> bool {
        let alias = alias.to_lowercase();
        [SPORTS_ALIASES, FINANCE_ALIASES, WEATHER_ALIASES]
            .iter()
            .any(|set| set.contains(&alias.as_str()))
    }

    fn template(&self) -> &'static str {
        match self {
            Self::Sports => {
                "Summarise the latest news, results and upcoming fixtures for {topic} in a short email."
            }
            Self::Finance => {
                "Summarise the latest market news and recent price movement for {topic} in a short email."
            }
            Self::Weather => "Give a short weather forecast for {topic} covering the next three days.",
        }
    }
}

/// Expand `alias` into its category template.
pub fn topic_prompt(alias: &str) -> String {
    TopicCategory::for_alias(alias)
        .template()
        .replace("{topic}", alias)
}

/// Local part of an address (`lakers` for `lakers@relay.test`).
fn local_part(address: &str) -> &str {
    address.split('@').next().unwrap_or_default()
}

/// Build the answer prompt for `message`.
pub fn build_prompt(message: &InboundMessage) -> String {
    let body = strip_quoted_text(&message.body_text);
    let user_text = if body.trim().is_empty() {
        message.subject.trim().to_string()
    } else {
        body.trim().to_string()
    };

    let alias = local_part(&message.recipient_address);
    let word_count = format!("{} {}", message.subject, body).split_whitespace().count();
    if word_count <= SHORT_PROMPT_WORDS && TopicCategory::is_alias(alias) {
        return topic_prompt(alias);
    }

    user_text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str, subject: &str, body: &str) -> InboundMessage {
        InboundMessage {
            sender_address: "a@x.com".into(),
            recipient_address: to.into(),
            subject: subject.into(),
            body_text: body.into(),
            raw_content_type: "application/json".into(),
        }
    }

    #[test]
    fn body_is_the_prompt() {
        let msg = message("help@relay.test", "aws outage", "help");
        assert_eq!(build_prompt(&msg), "help");
    }

    #[test]
    fn quoted_history_is_removed() {
        let msg = message(
            "help@relay.test",
            "Re: question",
            "Thanks, one more thing?\n\nOn Mon, Jan 1, 2026 at 10:00 AM Bot wrote:\n> old answer",
        );
        assert_eq!(build_prompt(&msg), "Thanks, one more thing?");
    }

    #[test]
    fn subject_is_used_when_body_is_empty() {
        let msg = message("help@relay.test", "What is Linux?", "   ");
        assert_eq!(build_prompt(&msg), "What is Linux?");
    }

    #[test]
    fn blank_mail_to_sports_alias_uses_template() {
        let msg = message("manutd@relay.test", "", "");
        let prompt = build_prompt(&msg);
        assert!(prompt.contains("Summarise the latest news"));
        assert!(prompt.contains("manutd"));
    }

    #[test]
    fn short_mail_to_finance_alias_uses_template() {
        let msg = message("AAPL@relay.test", "update", "please");
        let prompt = build_prompt(&msg);
        assert!(prompt.contains("market news"));
        assert!(prompt.contains("AAPL"));
    }

    #[test]
    fn weather_alias() {
        assert!(topic_prompt("london").contains("weather forecast for london"));
    }

    #[test]
    fn long_body_to_alias_is_unchanged() {
        let body = "This is a long body with more than four words.";
        let msg = message("manutd@relay.test", "", body);
        assert_eq!(build_prompt(&msg), body);
    }

    #[test]
    fn short_mail_to_non_alias_is_unchanged() {
        let msg = message("support@relay.test", "", "reset password");
        assert_eq!(build_prompt(&msg), "reset password");
    }

    #[test]
    fn unknown_alias_category_falls_back_to_sports() {
        assert_eq!(TopicCategory::for_alias("chelsea"), TopicCategory::Sports);
        assert!(!TopicCategory::is_alias("chelsea"));
    }
}
