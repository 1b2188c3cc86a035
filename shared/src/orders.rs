use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{purchaser_key, Buyer, EventMetadata, Order, OrderAndTicketStatus, Purchaser, Ticket};
use crate::paths;
use crate::store::{FieldOp, FieldPath, StoreError, Transaction};

pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub event_id: &'a str,
    pub is_private: bool,
    pub ticket_type_id: Option<&'a str>,
    pub buyer: &'a Buyer,
    pub quantity: i64,
    pub unit_price: i64,
    pub status: OrderAndTicketStatus,
    pub payment_intent_id: &'a str,
    pub application_fees: i64,
    pub discounts: i64,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: String,
    pub ticket_ids: Vec<String>,
}

/// Buffers one Ticket per seat plus the Order that lists them.
pub async fn write_order(tx: &Transaction, new: &NewOrder<'_>) -> Result<CreatedOrder, StoreError> {
    let order_id = new_document_id();
    let mut ticket_ids = Vec::new();
    for _ in 0..new.quantity {
        let ticket_id = new_document_id();
        let ticket = Ticket {
            event_id: new.event_id.to_string(),
            order_id: order_id.clone(),
            price: new.unit_price,
            purchase_date: new.purchased_at,
            status: new.status,
        };
        tx.create(paths::ticket(&ticket_id), &ticket).await?;
        ticket_ids.push(ticket_id);
    }

    let order = Order {
        event_id: new.event_id.to_string(),
        is_private: new.is_private,
        ticket_type_id: new.ticket_type_id.map(str::to_string),
        email: new.buyer.email.clone(),
        full_name: new.buyer.full_name.clone(),
        phone: new.buyer.phone.clone(),
        tickets: ticket_ids.clone(),
        status: new.status,
        stripe_payment_intent_id: new.payment_intent_id.to_string(),
        date_purchased: new.purchased_at,
        application_fees: new.application_fees,
        discounts: new.discounts,
    };
    tx.create(paths::order(&order_id), &order).await?;

    Ok(CreatedOrder { order_id, ticket_ids })
}

/// Merges a purchase into the event metadata and returns the metadata as it
/// will read after commit.
///
/// `metadata` must be the document read earlier in the same transaction
/// (default when it does not exist yet).
pub async fn record_purchase(
    tx: &Transaction,
    event_id: &str,
    mut metadata: EventMetadata,
    buyer: &Buyer,
    quantity: i64,
    order_id: &str,
) -> Result<EventMetadata, StoreError> {
    let key = purchaser_key(&buyer.email);
    let purchaser = metadata
        .purchaser_map
        .entry(key.clone())
        .or_insert_with(|| Purchaser::new(buyer.email.clone()));
    purchaser.add_tickets(&buyer.full_name, &buyer.phone, quantity);
    let purchaser_value = serde_json::to_value(&*purchaser).map_err(StoreError::Encode)?;

    metadata.complete_ticket_count += quantity;
    if !metadata.order_ids.iter().any(|id| id == order_id) {
        metadata.order_ids.push(order_id.to_string());
    }

    tx.upsert(
        paths::event_metadata(event_id),
        vec![
            FieldOp::Set(FieldPath::new(["purchaserMap", key.as_str()]), purchaser_value),
            FieldOp::increment("completeTicketCount", quantity),
            FieldOp::array_union("orderIds", Value::from(order_id)),
        ],
    )
    .await;
    Ok(metadata)
}
