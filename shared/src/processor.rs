//! Boundary to the external payment processor.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FULL_NAME_FIELD: &str = "attendeeFullName";
pub const PHONE_FIELD: &str = "attendeePhone";
pub const SURCHARGE_LABEL: &str = "Stripe Card Surcharge Fees";

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("processor rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("processor response is missing {0}")]
    MissingField(&'static str),
}

/// Everything needed to open a hosted checkout for one reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCheckoutSession {
    pub event_id: String,
    pub is_private: bool,
    pub ticket_type_id: Option<String>,
    pub product_name: String,
    pub currency: String,
    pub unit_amount: i64,
    pub quantity: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
    pub connected_account: String,
    pub idempotency_key: String,
    /// Card fee passed on to the buyer as a fixed shipping rate.
    pub surcharge: Option<i64>,
    pub allow_promotion_codes: bool,
}

impl CreateCheckoutSession {
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::from([
            ("eventId".to_string(), self.event_id.clone()),
            ("isPrivate".to_string(), self.is_private.to_string()),
        ]);
        if let Some(ticket_type_id) = &self.ticket_type_id {
            metadata.insert("ticketTypeId".to_string(), ticket_type_id.clone());
        }
        metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub line_items: Option<LineItemList>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub total_details: Option<TotalDetails>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

impl CheckoutSession {
    pub fn first_line_item(&self) -> Option<&LineItem> {
        self.line_items.as_ref().and_then(|items| items.data.first())
    }

    pub fn custom_field(&self, key: &str) -> Option<&str> {
        self.custom_fields
            .iter()
            .find(|field| field.key == key)
            .and_then(|field| field.text.as_ref())
            .and_then(|text| text.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItemList {
    #[serde(default)]
    pub data: Vec<LineItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub price: Option<Price>,
}

impl LineItem {
    pub fn unit_amount(&self) -> Option<i64> {
        self.price.as_ref().and_then(|price| price.unit_amount)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default)]
    pub unit_amount: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub key: String,
    #[serde(default)]
    pub text: Option<CustomFieldText>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldText {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalDetails {
    #[serde(default)]
    pub amount_discount: i64,
    #[serde(default)]
    pub amount_shipping: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub capture_method: Option<String>,
}

impl PaymentIntent {
    pub fn is_manual_capture(&self) -> bool {
        self.capture_method.as_deref() == Some("manual")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

impl ConnectedAccount {
    pub fn can_accept_payments(&self) -> bool {
        self.charges_enabled && self.details_submitted
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: &CreateCheckoutSession,
    ) -> Result<CheckoutSession, ProcessorError>;

    /// Retrieves a session with its line items expanded.
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
        connected_account: Option<&str>,
    ) -> Result<CheckoutSession, ProcessorError>;

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
        connected_account: Option<&str>,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError>;
}
