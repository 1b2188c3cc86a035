use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use shared::processor::CreateCheckoutSession;
use shared::store::FieldOp;
use shared::{
    paths, ClosedReason, Event, InventorySource, Organiser, PaymentProcessor, ProcessorError, Store,
    StoreError, TicketType, Transaction,
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::resolver::{InventoryResolver, Unavailable};

pub const DEFAULT_ERROR_URL: &str = "/error";
pub const DEFAULT_CURRENCY: &str = "aud";
pub const DEFAULT_SESSION_EXPIRY_SECS: i64 = 1800;
pub const DEFAULT_MIN_CHARGEABLE_AMOUNT: i64 = 50;

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub error_url: String,
    pub currency: String,
    pub session_expiry: Duration,
    pub min_chargeable_amount: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            error_url: DEFAULT_ERROR_URL.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            session_expiry: Duration::seconds(DEFAULT_SESSION_EXPIRY_SECS),
            min_chargeable_amount: DEFAULT_MIN_CHARGEABLE_AMOUNT,
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub event_id: String,
    #[serde(default)]
    pub is_private: bool,
    pub quantity: i64,
    #[serde(default)]
    pub ticket_type_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    pub fn validate(&self) -> Result<(), CheckoutError> {
        let invalid = |msg: &str| Err(CheckoutError::InvalidRequest(msg.to_string()));
        if self.event_id.trim().is_empty() {
            return invalid("eventId must not be empty");
        }
        if self.quantity < 1 {
            return invalid("quantity must be at least 1");
        }
        if self.success_url.trim().is_empty() || self.cancel_url.trim().is_empty() {
            return invalid("successUrl and cancelUrl are required");
        }
        Ok(())
    }

    fn ticket_type_id(&self) -> Option<&str> {
        self.ticket_type_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    EventNotFound,
    EventClosed(ClosedReason),
    PaymentsDisabled,
    OrganiserNotFound,
    PaymentAccountMissing,
    PaymentAccountInactive,
    Unavailable(Unavailable),
}

impl DeclineReason {
    /// Declines the buyer can act on go back to the cancel page; everything
    /// else is an error.
    fn returns_to_cancel(&self) -> bool {
        matches!(self, Self::PaymentsDisabled | Self::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Redirect { url: String, session_id: String },
    Declined { reason: DeclineReason, url: String },
}

impl CheckoutOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Redirect { url, .. } | Self::Declined { url, .. } => url,
        }
    }
}

#[derive(Debug)]
struct Reservation {
    event_name: String,
    price: i64,
    source: InventorySource,
    connected_account: String,
    surcharge_to_buyer: bool,
    allow_promotion_codes: bool,
}

/// Processor-side readiness of an organiser account that is not yet marked
/// active, looked up once per request outside the reservation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AccountCheck {
    account_id: String,
    ready: bool,
}

#[derive(Debug)]
enum Attempt {
    Reserved(Reservation),
    Declined(DeclineReason),
}

/// Card fee passed on to the buyer: 30 cents plus 1.7% of the order total,
/// rounded up.
pub fn card_surcharge(total: i64) -> i64 {
    30 + (total * 17 + 999) / 1000
}

pub struct CheckoutHandler {
    store: Store,
    processor: Arc<dyn PaymentProcessor>,
    resolver: InventoryResolver,
    config: CheckoutConfig,
}

impl CheckoutHandler {
    pub fn new(store: Store, processor: Arc<dyn PaymentProcessor>, config: CheckoutConfig) -> Self {
        Self {
            store,
            processor,
            resolver: InventoryResolver::new(config.min_chargeable_amount),
            config,
        }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Takes the tickets out of inventory, then opens a hosted checkout for
    /// them. The decrement is committed before the processor is called; if the
    /// processor fails the seats stay held until the session would have expired.
    pub async fn reserve(&self, request: &CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        request.validate()?;

        let account_check = self.check_pending_account(request).await?;
        let attempt = self
            .store
            .run_transaction(|tx| self.try_reserve(tx, request, account_check.as_ref()))
            .await?;

        let reservation = match attempt {
            Attempt::Reserved(reservation) => reservation,
            Attempt::Declined(reason) => {
                info!(
                    event_id = %request.event_id,
                    quantity = request.quantity,
                    "Checkout declined: {:?}",
                    reason
                );
                let url = if reason.returns_to_cancel() {
                    request.cancel_url.clone()
                } else {
                    self.config.error_url.clone()
                };
                return Ok(CheckoutOutcome::Declined { reason, url });
            }
        };

        info!(
            event_id = %request.event_id,
            quantity = request.quantity,
            source = ?reservation.source,
            "Reserved tickets"
        );

        let total = reservation.price * request.quantity;
        let params = CreateCheckoutSession {
            event_id: request.event_id.clone(),
            is_private: request.is_private,
            ticket_type_id: reservation.source.ticket_type_id().map(str::to_string),
            product_name: reservation.event_name,
            currency: self.config.currency.clone(),
            unit_amount: reservation.price,
            quantity: request.quantity,
            success_url: request.success_url.clone(),
            cancel_url: request.cancel_url.clone(),
            expires_at: Utc::now() + self.config.session_expiry,
            connected_account: reservation.connected_account,
            idempotency_key: format!("idempotency_key_{}_{}", request.event_id, Uuid::new_v4()),
            surcharge: (reservation.surcharge_to_buyer && total > 0).then(|| card_surcharge(total)),
            allow_promotion_codes: reservation.allow_promotion_codes,
        };

        let session = self
            .processor
            .create_checkout_session(&params)
            .await
            .map_err(|e| {
                error!(
                    event_id = %request.event_id,
                    quantity = request.quantity,
                    "Checkout session creation failed after reserving tickets: {}",
                    e
                );
                e
            })?;
        let url = session.url.ok_or(ProcessorError::MissingField("url"))?;

        info!(event_id = %request.event_id, session_id = %session.id, "Checkout session created");
        Ok(CheckoutOutcome::Redirect {
            url,
            session_id: session.id,
        })
    }

    /// Asks the processor whether an organiser account still marked inactive
    /// can take payments. Returns `None` when no lookup is needed.
    async fn check_pending_account(&self, request: &CheckoutRequest) -> Result<Option<AccountCheck>, CheckoutError> {
        let event_path = paths::event(&request.event_id, request.is_private);
        let Some(event) = self.store.get_as::<Event>(&event_path).await? else {
            return Ok(None);
        };
        if event.organiser_id.is_empty() || !event.payments_active || event.closed_reason(Utc::now()).is_some() {
            return Ok(None);
        }
        let Some(organiser) = self
            .store
            .get_as::<Organiser>(&paths::organiser(&event.organiser_id))
            .await?
        else {
            return Ok(None);
        };
        if organiser.stripe_account_active {
            return Ok(None);
        }
        let Some(account_id) = organiser.account_id() else {
            return Ok(None);
        };

        let account = self.processor.retrieve_account(account_id).await?;
        Ok(Some(AccountCheck {
            account_id: account_id.to_string(),
            ready: account.can_accept_payments(),
        }))
    }

    async fn try_reserve(
        &self,
        tx: Transaction,
        request: &CheckoutRequest,
        account_check: Option<&AccountCheck>,
    ) -> Result<Attempt, CheckoutError> {
        let event_path = paths::event(&request.event_id, request.is_private);
        let Some(event) = tx.get_as::<Event>(&event_path).await? else {
            return Ok(Attempt::Declined(DeclineReason::EventNotFound));
        };
        if let Some(reason) = event.closed_reason(Utc::now()) {
            return Ok(Attempt::Declined(DeclineReason::EventClosed(reason)));
        }
        if !event.payments_active {
            return Ok(Attempt::Declined(DeclineReason::PaymentsDisabled));
        }

        let organiser_path = paths::organiser(&event.organiser_id);
        let organiser = if event.organiser_id.is_empty() {
            None
        } else {
            tx.get_as::<Organiser>(&organiser_path).await?
        };
        let Some(organiser) = organiser else {
            return Ok(Attempt::Declined(DeclineReason::OrganiserNotFound));
        };
        let Some(account_id) = organiser.account_id().map(str::to_string) else {
            return Ok(Attempt::Declined(DeclineReason::PaymentAccountMissing));
        };
        let activate_account = !organiser.stripe_account_active;
        if activate_account {
            let ready = account_check
                .filter(|check| check.account_id == account_id)
                .is_some_and(|check| check.ready);
            if !ready {
                warn!(event_id = %request.event_id, account = %account_id, "Organiser payment account is not ready");
                return Ok(Attempt::Declined(DeclineReason::PaymentAccountInactive));
            }
        }

        let ticket_type = match request.ticket_type_id() {
            Some(id) => {
                let path = paths::ticket_type(&request.event_id, request.is_private, id);
                tx.get_as::<TicketType>(&path).await?.map(|ticket_type| (id, ticket_type))
            }
            None => None,
        };
        let resolution = match self.resolver.resolve(
            &event,
            ticket_type.as_ref().map(|(id, ticket_type)| (*id, ticket_type)),
            request.quantity,
        ) {
            Ok(resolution) => resolution,
            Err(reason) => return Ok(Attempt::Declined(DeclineReason::Unavailable(reason))),
        };

        match &resolution.source {
            InventorySource::TicketTypePool { ticket_type_id } => {
                let path = paths::ticket_type(&request.event_id, request.is_private, ticket_type_id);
                tx.update(path, vec![FieldOp::increment("soldQuantity", request.quantity)])
                    .await;
            }
            InventorySource::LegacyEventPool => {
                tx.update(event_path, vec![FieldOp::set("vacancy", resolution.remaining_after)])
                    .await;
            }
        }
        if activate_account {
            info!(account = %account_id, "Marking organiser payment account active");
            tx.update(organiser_path, vec![FieldOp::set("stripeAccountActive", true)])
                .await;
        }

        Ok(Attempt::Reserved(Reservation {
            event_name: event.name,
            price: resolution.price,
            source: resolution.source,
            connected_account: account_id,
            surcharge_to_buyer: event.stripe_fee_to_customer,
            allow_promotion_codes: event.promotional_codes_enabled,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surcharge_rounds_percentage_up() {
        assert_eq!(card_surcharge(1000), 47);
        assert_eq!(card_surcharge(4000), 98);
        assert_eq!(card_surcharge(1), 31);
    }

    #[test]
    fn validation_rejects_non_positive_quantity() {
        let request = CheckoutRequest {
            event_id: "evt-1".to_string(),
            is_private: false,
            quantity: 0,
            ticket_type_id: None,
            success_url: "https://app.test/ok".to_string(),
            cancel_url: "https://app.test/cancel".to_string(),
        };
        assert!(matches!(request.validate(), Err(CheckoutError::InvalidRequest(_))));
    }
}
