use serde::Deserialize;
use serde_json::Value;
use shared::processor::{CheckoutSession, FULL_NAME_FIELD, PHONE_FIELD};
use shared::Buyer;
use thiserror::Error;

const MAX_NAME_CHARS: usize = 200;
const MAX_PHONE_CHARS: usize = 50;
const MAX_EMAIL_CHARS: usize = 254;

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid event id {0:?}")]
    InvalidId(String),
    #[error("event object has no id")]
    MissingObjectId,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    livemode: bool,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    CheckoutCompleted { session_id: String },
    CheckoutExpired { session_id: String },
    PaymentIntentCanceled { payment_intent_id: String },
    Unhandled { kind: String },
}

/// A verified webhook delivery, parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeEvent {
    pub id: String,
    /// Connected account the event originated from.
    pub account: Option<String>,
    pub livemode: bool,
    pub payload: WebhookEvent,
}

impl StripeEvent {
    pub fn parse(body: &[u8]) -> Result<Self, EventParseError> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        if !envelope.id.starts_with("evt_") {
            return Err(EventParseError::InvalidId(envelope.id));
        }

        let object_id = || {
            envelope
                .data
                .object
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(EventParseError::MissingObjectId)
        };
        let payload = match envelope.kind.as_str() {
            "checkout.session.completed" => WebhookEvent::CheckoutCompleted {
                session_id: object_id()?,
            },
            "checkout.session.expired" => WebhookEvent::CheckoutExpired {
                session_id: object_id()?,
            },
            "payment_intent.canceled" => WebhookEvent::PaymentIntentCanceled {
                payment_intent_id: object_id()?,
            },
            other => WebhookEvent::Unhandled {
                kind: other.to_string(),
            },
        };

        Ok(Self {
            id: envelope.id,
            account: envelope.account,
            livemode: envelope.livemode,
            payload,
        })
    }
}

/// Correlation data written onto the checkout session when it was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub event_id: String,
    pub is_private: bool,
    pub ticket_type_id: Option<String>,
}

impl SessionMetadata {
    pub fn from_session(session: &CheckoutSession) -> Result<Self, String> {
        let event_id = session
            .metadata
            .get("eventId")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| format!("session {} has no eventId", session.id))?;
        let is_private = match session.metadata.get("isPrivate").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            other => return Err(format!("session {} has isPrivate {:?}", session.id, other)),
        };
        Ok(Self {
            event_id: event_id.clone(),
            is_private,
            ticket_type_id: session
                .metadata
                .get("ticketTypeId")
                .filter(|id| !id.is_empty())
                .cloned(),
        })
    }
}

/// Drops control characters and markup-significant characters, then truncates.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | '"' | '\'' | '`'))
        .collect::<String>()
        .trim()
        .chars()
        .take(max_chars)
        .collect()
}

pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_CHARS || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Buyer details as entered on the hosted checkout page, falling back to the
/// customer details the processor collected.
pub fn buyer_from_session(session: &CheckoutSession) -> Result<Buyer, String> {
    let details = session.customer_details.clone().unwrap_or_default();
    let email = details
        .email
        .map(|email| email.trim().to_string())
        .filter(|email| is_valid_email(email))
        .ok_or_else(|| format!("session {} has no valid customer email", session.id))?;

    let full_name = session
        .custom_field(FULL_NAME_FIELD)
        .or(details.name.as_deref())
        .map(|name| sanitize_text(name, MAX_NAME_CHARS))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("session {} has no attendee name", session.id))?;

    let phone = session
        .custom_field(PHONE_FIELD)
        .or(details.phone.as_deref())
        .map(|phone| sanitize_text(phone, MAX_PHONE_CHARS))
        .unwrap_or_default();

    Ok(Buyer {
        email,
        full_name,
        phone,
    })
}
