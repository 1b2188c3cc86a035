//! Per-event record of processor callbacks that have already taken effect.
//!
//! The processed ids live on the event's metadata document and are appended in
//! the same transaction as the effect they guard, so a redelivered callback
//! finds its id and does nothing.

use crate::models::EventMetadata;
use crate::paths;
use crate::store::{FieldOp, StoreError, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerToken<'a> {
    CheckoutSession(&'a str),
    PaymentIntent(&'a str),
}

impl<'a> LedgerToken<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Self::CheckoutSession(id) | Self::PaymentIntent(id) => id,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            Self::CheckoutSession(_) => "completedStripeCheckoutSessionIds",
            Self::PaymentIntent(_) => "completedStripePaymentIntentIds",
        }
    }
}

impl EventMetadata {
    pub fn has_processed(&self, token: LedgerToken<'_>) -> bool {
        let ids = match token {
            LedgerToken::CheckoutSession(_) => &self.completed_stripe_checkout_session_ids,
            LedgerToken::PaymentIntent(_) => &self.completed_stripe_payment_intent_ids,
        };
        ids.iter().any(|id| id == token.id())
    }
}

/// A missing metadata document means nothing has been processed yet.
pub async fn has_processed(
    tx: &Transaction,
    event_id: &str,
    token: LedgerToken<'_>,
) -> Result<bool, StoreError> {
    let metadata = tx
        .get_as::<EventMetadata>(&paths::event_metadata(event_id))
        .await?;
    Ok(metadata.is_some_and(|metadata| metadata.has_processed(token)))
}

pub async fn record_processed(tx: &Transaction, event_id: &str, token: LedgerToken<'_>) {
    tx.upsert(
        paths::event_metadata(event_id),
        vec![FieldOp::array_union(token.field(), token.id())],
    )
    .await;
}
