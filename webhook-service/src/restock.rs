use shared::ledger::{self, LedgerToken};
use shared::store::{DocPath, FieldOp, FieldPath};
use shared::{
    paths, purchaser_key, Event, EventMetadata, InventorySource, Order, OrderAndTicketStatus, Store,
    StoreError, TicketType, Transaction,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::SessionMetadata;

#[derive(Debug, Error)]
pub enum RestockError {
    #[error("{0}")]
    Integrity(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredCheckout {
    pub session_id: String,
    pub metadata: SessionMetadata,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestockOutcome {
    Restocked { quantity: i64, source: InventorySource },
    AlreadyProcessed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationOutcome {
    Cancelled { order_id: String, quantity: i64 },
    AlreadyProcessed,
    NoMatchingOrder,
}

/// The counter a reservation came out of, as read inside the transaction.
enum Pool {
    TicketType { path: DocPath, ticket_type: TicketType },
    Event { path: DocPath, event: Event },
}

impl Pool {
    async fn load(
        tx: &Transaction,
        event_id: &str,
        is_private: bool,
        source: &InventorySource,
    ) -> Result<Self, RestockError> {
        match source {
            InventorySource::TicketTypePool { ticket_type_id } => {
                let path = paths::ticket_type(event_id, is_private, ticket_type_id);
                let ticket_type = tx
                    .get_as::<TicketType>(&path)
                    .await?
                    .ok_or_else(|| RestockError::Integrity(format!("ticket type {} not found", path)))?;
                Ok(Self::TicketType { path, ticket_type })
            }
            InventorySource::LegacyEventPool => {
                let path = paths::event(event_id, is_private);
                let event = tx
                    .get_as::<Event>(&path)
                    .await?
                    .ok_or_else(|| RestockError::Integrity(format!("event {} not found", path)))?;
                Ok(Self::Event { path, event })
            }
        }
    }

    async fn release(self, tx: &Transaction, quantity: i64) {
        match self {
            Self::TicketType { path, ticket_type } => {
                let sold = (ticket_type.sold_quantity - quantity).max(0);
                tx.update(path, vec![FieldOp::set("soldQuantity", sold)]).await;
            }
            Self::Event { path, event } => {
                let vacancy = (event.vacancy.unwrap_or(0) + quantity).min(event.capacity);
                tx.update(path, vec![FieldOp::set("vacancy", vacancy)]).await;
            }
        }
    }
}

pub struct RestockTransactor {
    store: Store,
}

impl RestockTransactor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Returns the seats held by an abandoned checkout to the pool they came from.
    pub async fn restock_expired(&self, expired: &ExpiredCheckout) -> Result<RestockOutcome, RestockError> {
        self.store
            .run_transaction(|tx| self.try_restock(tx, expired))
            .await
    }

    /// Rejects the order paid through `payment_intent_id` and releases its seats.
    pub async fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<CancellationOutcome, RestockError> {
        if payment_intent_id.is_empty() {
            return Ok(CancellationOutcome::NoMatchingOrder);
        }
        self.store
            .run_transaction(|tx| self.try_cancel(tx, payment_intent_id))
            .await
    }

    async fn try_restock(&self, tx: Transaction, expired: &ExpiredCheckout) -> Result<RestockOutcome, RestockError> {
        let event_id = expired.metadata.event_id.as_str();
        let token = LedgerToken::CheckoutSession(&expired.session_id);
        if ledger::has_processed(&tx, event_id, token).await? {
            info!(event_id, session_id = %expired.session_id, "Expired session already restocked");
            return Ok(RestockOutcome::AlreadyProcessed);
        }

        let source = InventorySource::from_ticket_type(expired.metadata.ticket_type_id.as_deref());
        let pool = Pool::load(&tx, event_id, expired.metadata.is_private, &source).await?;
        pool.release(&tx, expired.quantity).await;
        ledger::record_processed(&tx, event_id, token).await;

        info!(
            event_id,
            session_id = %expired.session_id,
            source = ?source,
            "Restocked {} tickets",
            expired.quantity
        );
        Ok(RestockOutcome::Restocked {
            quantity: expired.quantity,
            source,
        })
    }

    async fn try_cancel(&self, tx: Transaction, payment_intent_id: &str) -> Result<CancellationOutcome, RestockError> {
        let Some(snapshot) = tx
            .find_one(paths::ORDERS, "stripePaymentIntentId", payment_intent_id)
            .await?
        else {
            warn!(payment_intent_id, "No order matches canceled payment intent");
            return Ok(CancellationOutcome::NoMatchingOrder);
        };
        let order_id = snapshot.path.id.clone();
        let order: Order = snapshot.decode()?;
        let event_id = order.event_id.as_str();

        let token = LedgerToken::PaymentIntent(payment_intent_id);
        if ledger::has_processed(&tx, event_id, token).await? {
            info!(event_id, payment_intent_id, "Payment intent cancellation already applied");
            return Ok(CancellationOutcome::AlreadyProcessed);
        }

        let source = InventorySource::from_ticket_type(order.ticket_type_id.as_deref());
        let pool = Pool::load(&tx, event_id, order.is_private, &source).await?;
        for ticket_id in &order.tickets {
            if tx.get(&paths::ticket(ticket_id)).await?.is_none() {
                return Err(RestockError::Integrity(format!(
                    "ticket {} of order {} not found",
                    ticket_id, order_id
                )));
            }
        }
        let metadata = tx
            .get_as::<EventMetadata>(&paths::event_metadata(event_id))
            .await?
            .unwrap_or_default();

        let quantity = order.tickets.len() as i64;
        pool.release(&tx, quantity).await;

        let rejected = serde_json::to_value(OrderAndTicketStatus::Rejected).map_err(StoreError::Encode)?;
        for ticket_id in &order.tickets {
            tx.update(paths::ticket(ticket_id), vec![FieldOp::set("status", rejected.clone())])
                .await;
        }
        tx.update(paths::order(&order_id), vec![FieldOp::set("status", rejected)])
            .await;

        let key = purchaser_key(&order.email);
        if let Some(mut purchaser) = metadata.purchaser_map.get(&key).cloned() {
            purchaser.remove_tickets(&order.full_name, quantity);
            let value = serde_json::to_value(&purchaser).map_err(StoreError::Encode)?;
            tx.upsert(
                paths::event_metadata(event_id),
                vec![FieldOp::Set(FieldPath::new(["purchaserMap", key.as_str()]), value)],
            )
            .await;
        }
        ledger::record_processed(&tx, event_id, token).await;

        info!(
            event_id,
            payment_intent_id,
            order_id = %order_id,
            "Rejected order and restocked {} tickets",
            quantity
        );
        Ok(CancellationOutcome::Cancelled { order_id, quantity })
    }
}
