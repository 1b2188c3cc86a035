use std::sync::Arc;

use serde::Serialize;
use shared::processor::CheckoutSession;
use shared::{PaymentProcessor, ProcessorError, Store, StoreError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::events::{buyer_from_session, SessionMetadata, StripeEvent, WebhookEvent};
use crate::fulfilment::{
    CompletedCheckout, FulfilmentOutcome, FulfilmentTransactor, PaymentDetails, PurchasedItem,
};
use crate::notifier::{Confirmation, Notifier, RetryPolicy};
use crate::restock::{CancellationOutcome, ExpiredCheckout, RestockError, RestockOutcome, RestockTransactor};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid session metadata: {0}")]
    InvalidMetadata(String),
    #[error("invalid customer details: {0}")]
    InvalidCustomer(String),
    #[error("checkout session {0} has no line items")]
    MissingLineItems(String),
    #[error("{0}")]
    Integrity(String),
    #[error("unhandled event type {0}")]
    Unhandled(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

impl From<RestockError> for WebhookError {
    fn from(e: RestockError) -> Self {
        match e {
            RestockError::Integrity(message) => Self::Integrity(message),
            RestockError::Store(e) => Self::Store(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAck {
    Processed,
    AlreadyProcessed,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub accept_test_events: bool,
    pub retry: RetryPolicy,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            accept_test_events: true,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct WebhookHandler {
    processor: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    fulfilment: FulfilmentTransactor,
    restock: RestockTransactor,
    config: WebhookConfig,
}

impl WebhookHandler {
    pub fn new(
        store: Store,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Arc<dyn Notifier>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            processor,
            notifier,
            fulfilment: FulfilmentTransactor::new(store.clone()),
            restock: RestockTransactor::new(store),
            config,
        }
    }

    pub async fn handle(&self, event: &StripeEvent) -> Result<WebhookAck, WebhookError> {
        if !event.livemode && !self.config.accept_test_events {
            info!(stripe_event_id = %event.id, "Ignoring test mode event");
            return Ok(WebhookAck::Ignored);
        }

        match &event.payload {
            WebhookEvent::CheckoutCompleted { session_id } => {
                self.handle_completed(session_id, event.account.as_deref()).await
            }
            WebhookEvent::CheckoutExpired { session_id } => {
                self.handle_expired(session_id, event.account.as_deref()).await
            }
            WebhookEvent::PaymentIntentCanceled { payment_intent_id } => {
                self.handle_canceled(payment_intent_id).await
            }
            WebhookEvent::Unhandled { kind } => {
                warn!(stripe_event_id = %event.id, "Unhandled event type {}", kind);
                Err(WebhookError::Unhandled(kind.clone()))
            }
        }
    }

    async fn handle_completed(&self, session_id: &str, account: Option<&str>) -> Result<WebhookAck, WebhookError> {
        let session = self.processor.retrieve_checkout_session(session_id, account).await?;
        let metadata = SessionMetadata::from_session(&session).map_err(WebhookError::InvalidMetadata)?;
        let buyer = buyer_from_session(&session).map_err(WebhookError::InvalidCustomer)?;

        let manual_capture = match &session.payment_intent {
            Some(payment_intent_id) => self
                .processor
                .retrieve_payment_intent(payment_intent_id, account)
                .await?
                .is_manual_capture(),
            None => false,
        };
        let checkout = CompletedCheckout {
            session_id: session.id.clone(),
            line_item: purchased_item(&session),
            payment: payment_details(&session, manual_capture),
            metadata,
            buyer,
        };

        let event_id = checkout.metadata.event_id.as_str();
        let (order_id, ticket_ids, event_name) = match self.fulfilment.fulfil(&checkout).await? {
            FulfilmentOutcome::Fulfilled {
                order_id,
                ticket_ids,
                event_name,
            } => (order_id, ticket_ids, event_name),
            FulfilmentOutcome::AlreadyProcessed => return Ok(WebhookAck::AlreadyProcessed),
            FulfilmentOutcome::Declined(reason) => {
                error!(event_id, session_id, "Fulfilment declined: {:?}", reason);
                return Err(WebhookError::Integrity(format!(
                    "checkout session {} could not be fulfilled: {:?}",
                    session_id, reason
                )));
            }
        };

        let confirmation = Confirmation {
            order_id,
            event_id: event_id.to_string(),
            event_name,
            email: checkout.buyer.email.clone(),
            full_name: checkout.buyer.full_name.clone(),
            ticket_ids,
        };
        if let Err(e) = self
            .config
            .retry
            .run(|| self.notifier.send_confirmation(&confirmation))
            .await
        {
            error!(
                event_id,
                session_id,
                order_id = %confirmation.order_id,
                "Failed to send order confirmation: {}",
                e
            );
        }

        Ok(WebhookAck::Processed)
    }

    async fn handle_expired(&self, session_id: &str, account: Option<&str>) -> Result<WebhookAck, WebhookError> {
        let session = self.processor.retrieve_checkout_session(session_id, account).await?;
        let metadata = SessionMetadata::from_session(&session).map_err(WebhookError::InvalidMetadata)?;
        let quantity = session
            .first_line_item()
            .and_then(|item| item.quantity)
            .filter(|quantity| *quantity > 0)
            .ok_or_else(|| WebhookError::MissingLineItems(session.id.clone()))?;

        let expired = ExpiredCheckout {
            session_id: session.id.clone(),
            metadata,
            quantity,
        };
        match self.restock.restock_expired(&expired).await? {
            RestockOutcome::Restocked { .. } => Ok(WebhookAck::Processed),
            RestockOutcome::AlreadyProcessed => Ok(WebhookAck::AlreadyProcessed),
        }
    }

    async fn handle_canceled(&self, payment_intent_id: &str) -> Result<WebhookAck, WebhookError> {
        match self.restock.cancel_payment_intent(payment_intent_id).await? {
            CancellationOutcome::Cancelled { .. } => Ok(WebhookAck::Processed),
            CancellationOutcome::AlreadyProcessed => Ok(WebhookAck::AlreadyProcessed),
            CancellationOutcome::NoMatchingOrder => Ok(WebhookAck::Ignored),
        }
    }
}

fn purchased_item(session: &CheckoutSession) -> Option<PurchasedItem> {
    session.first_line_item().map(|item| PurchasedItem {
        quantity: item.quantity,
        unit_amount: item.unit_amount(),
    })
}

/// The card surcharge is carried as the shipping amount, so that is what the
/// organiser's application fees are.
fn payment_details(session: &CheckoutSession, manual_capture: bool) -> PaymentDetails {
    let totals = session.total_details.clone().unwrap_or_default();
    PaymentDetails {
        payment_intent_id: session.payment_intent.clone(),
        manual_capture,
        application_fees: totals.amount_shipping,
        discounts: totals.amount_discount,
    }
}
