use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const GENERAL_TICKET_TYPE: &str = "General";
pub const ADMIN_TICKET_TYPE: &str = "Admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub name: String,
    pub capacity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vacancy: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default)]
    pub payments_active: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub organiser_id: String,
    #[serde(default)]
    pub stripe_fee_to_customer: bool,
    #[serde(default)]
    pub promotional_codes_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    Ended,
    RegistrationClosed,
    Paused,
}

impl Event {
    pub fn closed_reason(&self, now: DateTime<Utc>) -> Option<ClosedReason> {
        if self.end_date.is_some_and(|end| end <= now) {
            Some(ClosedReason::Ended)
        } else if self.registration_deadline.is_some_and(|deadline| deadline <= now) {
            Some(ClosedReason::RegistrationClosed)
        } else if self.paused {
            Some(ClosedReason::Paused)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    #[serde(default)]
    pub name: String,
    pub price: i64,
    pub available_quantity: i64,
    #[serde(default)]
    pub sold_quantity: i64,
}

impl TicketType {
    pub fn remaining(&self) -> i64 {
        (self.available_quantity - self.sold_quantity).max(0)
    }
}

/// The organiser's user document; only the payment-account fields matter here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organiser {
    #[serde(default)]
    pub stripe_account: Option<String>,
    #[serde(default)]
    pub stripe_account_active: bool,
}

impl Organiser {
    pub fn account_id(&self) -> Option<&str> {
        self.stripe_account.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default)]
    pub phone: String,
    pub ticket_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchaser {
    pub email: String,
    #[serde(default)]
    pub attendees: BTreeMap<String, Attendee>,
    #[serde(default)]
    pub total_ticket_count: i64,
}

impl Purchaser {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn add_tickets(&mut self, full_name: &str, phone: &str, quantity: i64) {
        let attendee = self.attendees.entry(full_name.to_string()).or_default();
        attendee.ticket_count += quantity;
        attendee.phone = phone.to_string();
        self.total_ticket_count += quantity;
    }

    /// Takes back up to `quantity` tickets; counts never go below zero.
    pub fn remove_tickets(&mut self, full_name: &str, quantity: i64) {
        if let Some(attendee) = self.attendees.get_mut(full_name) {
            attendee.ticket_count = (attendee.ticket_count - quantity).max(0);
        }
        self.total_ticket_count = (self.total_ticket_count - quantity).max(0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organiser_id: Option<String>,
    #[serde(default)]
    pub purchaser_map: BTreeMap<String, Purchaser>,
    #[serde(default)]
    pub completed_stripe_checkout_session_ids: Vec<String>,
    #[serde(default)]
    pub completed_stripe_payment_intent_ids: Vec<String>,
    #[serde(default)]
    pub order_ids: Vec<String>,
    #[serde(default)]
    pub complete_ticket_count: i64,
}

impl EventMetadata {
    pub fn total_attendees(&self) -> i64 {
        self.purchaser_map
            .values()
            .map(|purchaser| purchaser.total_ticket_count)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAndTicketStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub event_id: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_type_id: Option<String>,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: String,
    pub tickets: Vec<String>,
    pub status: OrderAndTicketStatus,
    #[serde(default)]
    pub stripe_payment_intent_id: String,
    pub date_purchased: DateTime<Utc>,
    #[serde(default)]
    pub application_fees: i64,
    #[serde(default)]
    pub discounts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub event_id: String,
    pub order_id: String,
    pub price: i64,
    pub purchase_date: DateTime<Utc>,
    pub status: OrderAndTicketStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buyer {
    pub email: String,
    pub full_name: String,
    pub phone: String,
}

/// Which counter a reservation was taken from, and therefore which counter a
/// restock must give back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventorySource {
    TicketTypePool { ticket_type_id: String },
    LegacyEventPool,
}

impl InventorySource {
    pub fn from_ticket_type(ticket_type_id: Option<&str>) -> Self {
        match ticket_type_id.filter(|id| !id.is_empty()) {
            Some(id) => Self::TicketTypePool {
                ticket_type_id: id.to_string(),
            },
            None => Self::LegacyEventPool,
        }
    }

    pub fn ticket_type_id(&self) -> Option<&str> {
        match self {
            Self::TicketTypePool { ticket_type_id } => Some(ticket_type_id),
            Self::LegacyEventPool => None,
        }
    }
}

/// Stable purchaser-map key for an email address: hex SHA-256 of the trimmed,
/// lower-cased address.
pub fn purchaser_key(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!("{:x}", digest)
}
