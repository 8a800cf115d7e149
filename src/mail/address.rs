//! Address reduction: display names and angle brackets are dropped.

use std::str::FromStr;

use lettre::message::{Mailbox, Mailboxes};

/// Reduce an RFC 5322 address field to the bare address of its first
/// mailbox, e.g. `"Alice" <alice@example.com>` → `alice@example.com`.
///
/// Returns `None` when no address can be found.
pub fn bare_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(mailbox) = Mailbox::from_str(raw) {
        return Some(mailbox.email.to_string());
    }
    if let Ok(mailboxes) = Mailboxes::from_str(raw)
        && let Some(first) = mailboxes.iter().next()
    {
        return Some(first.email.to_string());
    }

    // Lenient fallback for headers lettre rejects (odd display names):
    // take the last angle-bracketed token, else the first token with an '@'.
    if let (Some(start), Some(end)) = (raw.rfind('<'), raw.rfind('>'))
        && start < end
    {
        let inner = raw[start + 1..end].trim();
        if inner.contains('@') {
            return Some(inner.to_string());
        }
    }
    raw.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .map(|t| t.trim_matches(|c| c == '<' || c == '>' || c == '"'))
        .find(|t| t.contains('@') && !t.starts_with('@') && !t.ends_with('@'))
        .map(str::to_string)
}

/// Extract the first bare address from a parsed `mail_parser` address field.
pub fn first_address(addr: Option<&mail_parser::Address>) -> Option<String> {
    addr?
        .first()
        .and_then(|a| a.address())
        .map(str::to_string)
}
