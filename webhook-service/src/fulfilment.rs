use chrono::Utc;
use shared::ledger::{self, LedgerToken};
use shared::orders::{record_purchase, write_order, NewOrder};
use shared::store::FieldOp;
use shared::{
    paths, purchaser_key, Buyer, Event, EventMetadata, OrderAndTicketStatus, Store, StoreError,
    Transaction,
};
use tracing::{info, warn};

use crate::events::SessionMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchasedItem {
    pub quantity: Option<i64>,
    pub unit_amount: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentDetails {
    pub payment_intent_id: Option<String>,
    pub manual_capture: bool,
    pub application_fees: i64,
    pub discounts: i64,
}

/// A paid checkout session with everything extracted from the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCheckout {
    pub session_id: String,
    pub metadata: SessionMetadata,
    pub line_item: Option<PurchasedItem>,
    pub buyer: Buyer,
    pub payment: PaymentDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfilmentDecline {
    EventNotFound,
    MissingLineItem,
    MissingQuantity,
    MissingUnitAmount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfilmentOutcome {
    Fulfilled {
        order_id: String,
        ticket_ids: Vec<String>,
        event_name: String,
    },
    AlreadyProcessed,
    Declined(FulfilmentDecline),
}

/// Lowered vacancy when more tickets are out than the counter admits;
/// `None` when the counter is already consistent. Never raises vacancy.
pub fn reconciled_vacancy(event: &Event, total_attendees: i64) -> Option<i64> {
    let vacancy = event.vacancy?;
    let corrected = (event.capacity - total_attendees).max(0);
    (corrected < vacancy).then_some(corrected)
}

pub struct FulfilmentTransactor {
    store: Store,
}

impl FulfilmentTransactor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn fulfil(&self, checkout: &CompletedCheckout) -> Result<FulfilmentOutcome, StoreError> {
        self.store
            .run_transaction(|tx| self.try_fulfil(tx, checkout))
            .await
    }

    async fn try_fulfil(
        &self,
        tx: Transaction,
        checkout: &CompletedCheckout,
    ) -> Result<FulfilmentOutcome, StoreError> {
        let event_id = checkout.metadata.event_id.as_str();
        let token = LedgerToken::CheckoutSession(&checkout.session_id);
        if ledger::has_processed(&tx, event_id, token).await? {
            info!(event_id, session_id = %checkout.session_id, "Checkout session already fulfilled");
            return Ok(FulfilmentOutcome::AlreadyProcessed);
        }

        let event_path = paths::event(event_id, checkout.metadata.is_private);
        let Some(event) = tx.get_as::<Event>(&event_path).await? else {
            return Ok(FulfilmentOutcome::Declined(FulfilmentDecline::EventNotFound));
        };
        let Some(item) = checkout.line_item else {
            return Ok(FulfilmentOutcome::Declined(FulfilmentDecline::MissingLineItem));
        };
        let quantity = match item.quantity {
            Some(quantity) if quantity > 0 => quantity,
            _ => return Ok(FulfilmentOutcome::Declined(FulfilmentDecline::MissingQuantity)),
        };
        let Some(unit_amount) = item.unit_amount else {
            return Ok(FulfilmentOutcome::Declined(FulfilmentDecline::MissingUnitAmount));
        };
        let metadata = tx
            .get_as::<EventMetadata>(&paths::event_metadata(event_id))
            .await?
            .unwrap_or_default();

        let status = if checkout.payment.manual_capture {
            OrderAndTicketStatus::Pending
        } else {
            OrderAndTicketStatus::Approved
        };
        let created = write_order(
            &tx,
            &NewOrder {
                event_id,
                is_private: checkout.metadata.is_private,
                ticket_type_id: checkout.metadata.ticket_type_id.as_deref(),
                buyer: &checkout.buyer,
                quantity,
                unit_price: unit_amount,
                status,
                payment_intent_id: checkout.payment.payment_intent_id.as_deref().unwrap_or_default(),
                application_fees: checkout.payment.application_fees,
                discounts: checkout.payment.discounts,
                purchased_at: Utc::now(),
            },
        )
        .await?;

        let metadata =
            record_purchase(&tx, event_id, metadata, &checkout.buyer, quantity, &created.order_id).await?;
        ledger::record_processed(&tx, event_id, token).await;
        tx.upsert(
            paths::purchaser_sessions(&purchaser_key(&checkout.buyer.email), event_id),
            vec![FieldOp::array_union("checkoutSessions", checkout.session_id.as_str())],
        )
        .await;

        if let Some(vacancy) = reconciled_vacancy(&event, metadata.total_attendees()) {
            warn!(
                event_id,
                capacity = event.capacity,
                attendees = metadata.total_attendees(),
                "Vacancy {:?} exceeds remaining capacity, lowering to {}",
                event.vacancy,
                vacancy
            );
            tx.update(event_path, vec![FieldOp::set("vacancy", vacancy)]).await;
        }

        info!(
            event_id,
            session_id = %checkout.session_id,
            order_id = %created.order_id,
            "Fulfilled {} tickets",
            quantity
        );
        Ok(FulfilmentOutcome::Fulfilled {
            order_id: created.order_id,
            ticket_ids: created.ticket_ids,
            event_name: event.name,
        })
    }
}
