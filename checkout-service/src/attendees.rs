use chrono::Utc;
use shared::orders::{record_purchase, write_order, CreatedOrder, NewOrder};
use shared::store::FieldOp;
use shared::{
    paths, Buyer, Event, EventMetadata, OrderAndTicketStatus, Store, TicketType, Transaction,
    ADMIN_TICKET_TYPE, GENERAL_TICKET_TYPE,
};
use tracing::info;

use crate::handlers::CheckoutError;

/// Organiser-initiated attendee addition that bypasses payment.
#[derive(Debug, Clone)]
pub struct AddAttendee {
    pub event_id: String,
    pub is_private: bool,
    pub buyer: Buyer,
    pub num_tickets: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceOutcome {
    Issued(CreatedOrder),
    EventNotFound,
    InsufficientInventory { requested: i64, available: i64 },
}

pub struct AttendeeHandler {
    store: Store,
}

impl AttendeeHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn add_attendee(&self, request: &AddAttendee) -> Result<IssuanceOutcome, CheckoutError> {
        if request.num_tickets < 1 {
            return Err(CheckoutError::InvalidRequest(
                "numTickets must be at least 1".to_string(),
            ));
        }
        if request.buyer.email.trim().is_empty() || request.buyer.full_name.trim().is_empty() {
            return Err(CheckoutError::InvalidRequest(
                "email and full name are required".to_string(),
            ));
        }

        let outcome = self
            .store
            .run_transaction(|tx| self.try_add(tx, request))
            .await?;
        match &outcome {
            IssuanceOutcome::Issued(created) => info!(
                event_id = %request.event_id,
                order_id = %created.order_id,
                "Issued {} tickets without payment",
                request.num_tickets
            ),
            declined => info!(event_id = %request.event_id, "Attendee issuance declined: {:?}", declined),
        }
        Ok(outcome)
    }

    /// Admin tickets draw on General availability when the event has ticket
    /// types, and on the legacy vacancy counter otherwise.
    async fn try_add(&self, tx: Transaction, request: &AddAttendee) -> Result<IssuanceOutcome, CheckoutError> {
        let event_path = paths::event(&request.event_id, request.is_private);
        let general_path = paths::ticket_type(&request.event_id, request.is_private, GENERAL_TICKET_TYPE);
        let admin_path = paths::ticket_type(&request.event_id, request.is_private, ADMIN_TICKET_TYPE);

        let Some(event) = tx.get_as::<Event>(&event_path).await? else {
            return Ok(IssuanceOutcome::EventNotFound);
        };
        let general = tx.get_as::<TicketType>(&general_path).await?;
        let admin = tx.get_as::<TicketType>(&admin_path).await?;
        let metadata = tx
            .get_as::<EventMetadata>(&paths::event_metadata(&request.event_id))
            .await?
            .unwrap_or_default();

        let n = request.num_tickets;
        let available = match &general {
            Some(general) => general.remaining(),
            None => event.vacancy.unwrap_or(0),
        };
        if available < n {
            return Ok(IssuanceOutcome::InsufficientInventory {
                requested: n,
                available,
            });
        }

        if general.is_some() {
            tx.update(general_path, vec![FieldOp::increment("soldQuantity", n)]).await;
            if admin.is_some() {
                tx.update(admin_path, vec![FieldOp::increment("soldQuantity", n)]).await;
            }
        } else {
            tx.update(event_path, vec![FieldOp::set("vacancy", available - n)]).await;
        }

        let created = write_order(
            &tx,
            &NewOrder {
                event_id: &request.event_id,
                is_private: request.is_private,
                ticket_type_id: general.as_ref().map(|_| GENERAL_TICKET_TYPE),
                buyer: &request.buyer,
                quantity: n,
                unit_price: 0,
                status: OrderAndTicketStatus::Approved,
                payment_intent_id: "",
                application_fees: 0,
                discounts: 0,
                purchased_at: Utc::now(),
            },
        )
        .await?;
        record_purchase(&tx, &request.event_id, metadata, &request.buyer, n, &created.order_id).await?;

        Ok(IssuanceOutcome::Issued(created))
    }
}
