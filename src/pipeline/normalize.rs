//! Payload normalizer: JSON, multipart form, or raw MIME → `InboundMessage`.
//!
//! The declared `Content-Type` is only a hint. Its strategy is tried first,
//! then the rest in priority order (JSON, multipart form, RFC 822). A
//! strategy succeeds when it yields a sender address; otherwise the next one
//! runs. When all fail the error names the declared type and every strategy
//! that was attempted.

use mail_parser::{MessageParser, MimeHeaders, PartType};
use serde_json::Value;
use tracing::debug;

use crate::error::NormalizeError;
use crate::mail::address::{bare_address, first_address};
use crate::mail::strip_html;
use crate::pipeline::types::InboundMessage;

/// Form fields read from a multipart body. Everything else is dropped.
pub const FORM_FIELDS: &[&str] = &["from", "to", "subject", "text", "html"];

/// Form field that may carry a complete raw MIME message.
pub const RAW_EMAIL_FIELD: &str = "email";

/// Parsing strategy, in default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Json,
    MultipartForm,
    Rfc822,
}

impl Strategy {
    const PRIORITY: [Strategy; 3] = [Strategy::Json, Strategy::MultipartForm, Strategy::Rfc822];

    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MultipartForm => "multipart/form-data",
            Self::Rfc822 => "message/rfc822",
        }
    }
}

/// Fields extracted by one strategy, before address reduction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadFields {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl PayloadFields {
    /// Fill fields missing here from `other`.
    fn or(self, other: PayloadFields) -> PayloadFields {
        PayloadFields {
            from: self.from.or(other.from),
            to: self.to.or(other.to),
            subject: self.subject.or(other.subject),
            text: self.text.or(other.text),
            html: self.html.or(other.html),
        }
    }
}

/// Result of a successful strategy, tagged by wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPayload {
    Json(PayloadFields),
    MultipartForm(PayloadFields),
    RawMime(PayloadFields),
}

impl ParsedPayload {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Json(_) => Strategy::Json,
            Self::MultipartForm(_) => Strategy::MultipartForm,
            Self::RawMime(_) => Strategy::Rfc822,
        }
    }

    fn fields(&self) -> &PayloadFields {
        match self {
            Self::Json(f) | Self::MultipartForm(f) | Self::RawMime(f) => f,
        }
    }

    /// Resolve into the canonical message. `None` if there is no sender.
    pub fn into_message(self, raw_content_type: &str) -> Option<InboundMessage> {
        let fields = self.fields();
        let sender_address = fields.from.as_deref().and_then(bare_address)?;
        let recipient_address = fields
            .to
            .as_deref()
            .and_then(bare_address)
            .unwrap_or_default();
        let body_text = match (&fields.text, &fields.html) {
            (Some(text), _) if !text.trim().is_empty() => text.trim().to_string(),
            (_, Some(html)) => strip_html(html),
            (Some(text), None) => text.trim().to_string(),
            (None, None) => String::new(),
        };
        Some(InboundMessage {
            sender_address,
            recipient_address,
            subject: fields.subject.as_deref().unwrap_or_default().trim().to_string(),
            body_text,
            raw_content_type: raw_content_type.to_string(),
        })
    }
}

/// Declared `Content-Type`, split into essence and boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeclaredType {
    essence: String,
    boundary: Option<String>,
}

impl DeclaredType {
    fn parse(header: &str) -> Self {
        let mut parts = header.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_lowercase();
        let boundary = parts.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
                .filter(|b| !b.is_empty())
        });
        Self { essence, boundary }
    }

    fn preferred_strategy(&self) -> Option<Strategy> {
        match self.essence.as_str() {
            "application/json" => Some(Strategy::Json),
            e if e.ends_with("+json") => Some(Strategy::Json),
            "multipart/form-data" => Some(Strategy::MultipartForm),
            "message/rfc822" => Some(Strategy::Rfc822),
            _ => None,
        }
    }

    /// Types the normalizer may legitimately receive mail as.
    fn is_recognized(&self) -> bool {
        self.preferred_strategy().is_some()
            || matches!(
                self.essence.as_str(),
                "" | "text/plain" | "application/octet-stream"
            )
    }
}

/// Strategy order for a declared type: its own first, then the defaults.
fn strategy_order(declared: Option<&DeclaredType>) -> Vec<Strategy> {
    let preferred = declared.and_then(DeclaredType::preferred_strategy);
    preferred
        .into_iter()
        .chain(Strategy::PRIORITY.into_iter().filter(|s| Some(*s) != preferred))
        .collect()
}

/// Normalize a webhook body into an `InboundMessage`.
pub fn normalize(body: &[u8], content_type: Option<&str>) -> Result<InboundMessage, NormalizeError> {
    let content_type = content_type.map(str::trim).filter(|c| !c.is_empty());
    let declared = content_type.map(DeclaredType::parse);
    let order = strategy_order(declared.as_ref());
    let boundary = declared.as_ref().and_then(|d| d.boundary.clone());

    for strategy in &order {
        let parsed = match strategy {
            Strategy::Json => parse_json(body).map(ParsedPayload::Json),
            Strategy::MultipartForm => {
                parse_multipart(body, boundary.as_deref()).map(ParsedPayload::MultipartForm)
            }
            Strategy::Rfc822 => parse_rfc822(body).map(ParsedPayload::RawMime),
        };
        let Some(parsed) = parsed else {
            debug!(strategy = strategy.media_type(), "Strategy produced no fields");
            continue;
        };
        let raw_content_type = content_type.unwrap_or(strategy.media_type());
        if let Some(message) = parsed.into_message(raw_content_type) {
            debug!(
                strategy = strategy.media_type(),
                declared = content_type.unwrap_or("none"),
                sender = %message.sender_address,
                "Payload normalized"
            );
            return Ok(message);
        }
        debug!(strategy = strategy.media_type(), "Strategy produced no sender");
    }

    if let Some(declared) = declared.as_ref().filter(|d| !d.is_recognized()) {
        return Err(NormalizeError::UnsupportedMediaType(declared.essence.clone()));
    }

    Err(NormalizeError::Unparseable {
        content_type: content_type.unwrap_or("none").to_string(),
        attempted: order
            .iter()
            .map(Strategy::media_type)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

// ── JSON ────────────────────────────────────────────────────────────

fn parse_json(body: &[u8]) -> Option<PayloadFields> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let obj = value.as_object()?;
    let field = |name: &str| obj.get(name).and_then(Value::as_str).map(str::to_string);

    let fields = PayloadFields {
        from: field("from"),
        to: field("to"),
        subject: field("subject"),
        text: field("text").or_else(|| field("body")),
        html: field("html"),
    };
    (fields != PayloadFields::default()).then_some(fields)
}

// ── Multipart form ──────────────────────────────────────────────────

/// Boundary from a body that starts with a `--boundary` delimiter line.
fn sniff_boundary(body: &[u8]) -> Option<String> {
    let start = body.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = body.get(start..)?.strip_prefix(b"--")?;
    let end = rest
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(rest.len());
    let boundary = std::str::from_utf8(&rest[..end]).ok()?.trim();
    (!boundary.is_empty() && !boundary.contains(char::is_whitespace)).then(|| boundary.to_string())
}

/// Try the declared boundary, then the one the body actually opens with.
/// The first candidate that yields a sender wins.
fn parse_multipart(body: &[u8], declared_boundary: Option<&str>) -> Option<PayloadFields> {
    let sniffed = sniff_boundary(body);
    let mut candidates: Vec<&str> = declared_boundary.into_iter().collect();
    if let Some(sniffed) = sniffed.as_deref()
        && declared_boundary != Some(sniffed)
    {
        candidates.push(sniffed);
    }

    let mut partial = None;
    for boundary in candidates {
        match parse_form_parts(body, boundary) {
            Some(fields) if fields.from.is_some() => return Some(fields),
            Some(fields) => partial = partial.or(Some(fields)),
            None => debug!(boundary, "No form parts under boundary"),
        }
    }
    partial
}

fn parse_form_parts(body: &[u8], boundary: &str) -> Option<PayloadFields> {
    // Wrap the form body in a MIME envelope so mail-parser can split it.
    let mut envelope =
        format!("Content-Type: multipart/form-data; boundary=\"{boundary}\"\r\n\r\n").into_bytes();
    envelope.extend_from_slice(body);
    let message = MessageParser::default().parse(&envelope[..])?;

    let mut flat = PayloadFields::default();
    let mut embedded: Option<PayloadFields> = None;

    for part in message.parts.iter().skip(1) {
        let Some(name) = part
            .content_disposition()
            .and_then(|cd| cd.attribute("name"))
            .map(str::to_ascii_lowercase)
        else {
            continue;
        };

        if name == RAW_EMAIL_FIELD {
            embedded = match &part.body {
                PartType::Message(inner) => Some(fields_from_message(inner)),
                _ => parse_rfc822(part.contents()),
            }
            .filter(|f| f.from.is_some());
            continue;
        }

        if !FORM_FIELDS.contains(&name.as_str()) {
            continue;
        }
        let value = part
            .text_contents()
            .map(str::to_string)
            .or_else(|| String::from_utf8(part.contents().to_vec()).ok());
        match name.as_str() {
            "from" => flat.from = value,
            "to" => flat.to = value,
            "subject" => flat.subject = value,
            "text" => flat.text = value,
            "html" => flat.html = value,
            _ => {}
        }
    }

    let fields = match embedded {
        Some(mime) => mime.or(flat),
        None => flat,
    };
    (fields != PayloadFields::default()).then_some(fields)
}

// ── RFC 822 ─────────────────────────────────────────────────────────

fn fields_from_message(message: &mail_parser::Message<'_>) -> PayloadFields {
    let text = message
        .body_text(0)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let html = message.body_html(0).map(|h| h.to_string());
    PayloadFields {
        from: first_address(message.from()),
        to: first_address(message.to()),
        subject: message.subject().map(str::to_string),
        text,
        html,
    }
}

fn parse_rfc822(body: &[u8]) -> Option<PayloadFields> {
    let message = MessageParser::default().parse(body)?;
    let fields = fields_from_message(&message);
    fields.from.is_some().then_some(fields)
}
