//! Keyword router: picks the answer profile for a message.
//!
//! Rules are an ordered priority list evaluated against the lowercased
//! `subject + " " + body`. The first matching rule wins, so a message that
//! mentions both "aws" and "google" goes to whichever rule comes first.
//! No match yields the default profile.

use std::fmt;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Closed set of answer profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Profile {
    Gemini,
    Copilot,
    Titan,
    Mixtral,
    Claude3,
    Grok,
    Gpt4Turbo,
}

impl Profile {
    pub const ALL: [Profile; 7] = [
        Profile::Gemini,
        Profile::Copilot,
        Profile::Titan,
        Profile::Mixtral,
        Profile::Claude3,
        Profile::Grok,
        Profile::Gpt4Turbo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::Copilot => "Copilot",
            Self::Titan => "Titan",
            Self::Mixtral => "Mixtral",
            Self::Claude3 => "Claude 3",
            Self::Grok => "Grok",
            Self::Gpt4Turbo => "GPT-4 Turbo",
        }
    }

    /// Look up a profile by display name, ignoring case, spaces and
    /// punctuation (`gpt4turbo`, `GPT-4 Turbo` and `claude3` all resolve).
    pub fn from_name(name: &str) -> Option<Self> {
        let squash = |s: &str| {
            s.chars()
                .filter(char::is_ascii_alphanumeric)
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        };
        let wanted = squash(name);
        Self::ALL
            .into_iter()
            .find(|profile| squash(profile.as_str()) == wanted)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyword set that routes to one profile.
#[derive(Debug, Clone)]
pub struct TopicRule {
    /// Keywords as configured, for logging.
    pub keywords: Vec<String>,
    /// Compiled alternation of the escaped keywords.
    pub regex: Regex,
    pub profile: Profile,
}

impl TopicRule {
    /// Build a rule matching any of `keywords` as a case-insensitive substring.
    pub fn new(keywords: &[&str], profile: Profile) -> Result<Self, regex::Error> {
        let alternation = keywords
            .iter()
            .map(|k| regex::escape(&k.to_lowercase()))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            regex: Regex::new(&format!("(?i)(?:{alternation})"))?,
            profile,
        })
    }
}

/// Ordered keyword router.
pub struct TopicRouter {
    rules: Vec<TopicRule>,
    default_profile: Profile,
}

impl TopicRouter {
    /// Create a router with the standard rule table.
    pub fn default_rules() -> Self {
        let table: [(&[&str], Profile); 6] = [
            (&["google"], Profile::Gemini),
            (&["excel", "office"], Profile::Copilot),
            (&["aws", "lambda", "devops"], Profile::Titan),
            (&["open source", "linux"], Profile::Mixtral),
            (&["legal", "ethical"], Profile::Claude3),
            (&["twitter", "x.com"], Profile::Grok),
        ];
        let rules = table
            .into_iter()
            .map(|(keywords, profile)| {
                TopicRule::new(keywords, profile).expect("static keyword rules compile")
            })
            .collect();

        Self {
            rules,
            default_profile: Profile::Gpt4Turbo,
        }
    }

    /// Route a message. Total and deterministic.
    pub fn route(&self, subject: &str, body: &str) -> Profile {
        let text = format!("{subject} {body}").to_lowercase();

        for rule in &self.rules {
            if rule.regex.is_match(&text) {
                debug!(
                    profile = %rule.profile,
                    keywords = ?rule.keywords,
                    "Message matched routing rule"
                );
                return rule.profile;
            }
        }

        debug!(profile = %self.default_profile, "No routing rule matched, using default");
        self.default_profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_google_to_gemini() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("Google Sheets help", ""), Profile::Gemini);
    }

    #[test]
    fn routes_office_to_copilot() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("", "My Excel formula is broken"), Profile::Copilot);
        assert_eq!(router.route("Office 365", ""), Profile::Copilot);
    }

    #[test]
    fn routes_aws_to_titan() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("aws outage", "help"), Profile::Titan);
        assert_eq!(router.route("", "Lambda cold starts"), Profile::Titan);
        assert_eq!(router.route("DevOps hiring", ""), Profile::Titan);
    }

    #[test]
    fn routes_multi_word_keyword() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("", "Best open source editors?"), Profile::Mixtral);
        assert_eq!(router.route("", "opensource"), Profile::Gpt4Turbo);
    }

    #[test]
    fn routes_legal_and_social() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("Is this ethical?", ""), Profile::Claude3);
        assert_eq!(router.route("", "saw it on x.com"), Profile::Grok);
    }

    #[test]
    fn keyword_dot_is_literal() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("", "xycom"), Profile::Gpt4Turbo);
    }

    #[test]
    fn empty_input_gets_default() {
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("", ""), Profile::Gpt4Turbo);
    }

    #[test]
    fn earlier_rule_wins_on_overlap() {
        // "google" is checked before "aws"
        let router = TopicRouter::default_rules();
        assert_eq!(
            router.route("aws vs google", "compare aws and google cloud"),
            Profile::Gemini
        );
        assert_eq!(router.route("Linux on AWS", ""), Profile::Titan);
    }

    #[test]
    fn subject_and_body_are_joined() {
        // Joined with a single space, so a phrase may span the two.
        let router = TopicRouter::default_rules();
        assert_eq!(router.route("open", "source"), Profile::Mixtral);
    }

    #[test]
    fn profile_display_names() {
        assert_eq!(Profile::Claude3.to_string(), "Claude 3");
        assert_eq!(Profile::Gpt4Turbo.to_string(), "GPT-4 Turbo");
    }

    #[test]
    fn profiles_resolve_from_loose_names() {
        assert_eq!(Profile::from_name("Titan"), Some(Profile::Titan));
        assert_eq!(Profile::from_name("claude3"), Some(Profile::Claude3));
        assert_eq!(Profile::from_name("Claude 3"), Some(Profile::Claude3));
        assert_eq!(Profile::from_name("gpt-4 turbo"), Some(Profile::Gpt4Turbo));
        assert_eq!(Profile::from_name("GPT4Turbo"), Some(Profile::Gpt4Turbo));
        assert_eq!(Profile::from_name("bard"), None);
        assert_eq!(Profile::from_name(""), None);
        for profile in Profile::ALL {
            assert_eq!(Profile::from_name(profile.as_str()), Some(profile));
        }
    }
}
