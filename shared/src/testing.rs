//! In-process fakes for the processor boundary, enabled with `test-utils`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::processor::{
    CheckoutSession, ConnectedAccount, CreateCheckoutSession, CustomField, CustomFieldText,
    CustomerDetails, LineItem, LineItemList, PaymentIntent, PaymentProcessor, Price,
    ProcessorError, TotalDetails, FULL_NAME_FIELD, PHONE_FIELD,
};

#[derive(Default)]
struct FakeState {
    created: Vec<CreateCheckoutSession>,
    sessions: HashMap<String, CheckoutSession>,
    payment_intents: HashMap<String, PaymentIntent>,
    accounts: HashMap<String, ConnectedAccount>,
    account_lookups: usize,
    fail_creation: bool,
}

/// Records created sessions and serves them back on retrieval, the way the
/// hosted checkout would after the buyer fills in the form.
#[derive(Default)]
pub struct FakeProcessor {
    state: Mutex<FakeState>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_account(&self, account: ConnectedAccount) {
        self.state().accounts.insert(account.id.clone(), account);
    }

    pub fn insert_session(&self, session: CheckoutSession) {
        self.state().sessions.insert(session.id.clone(), session);
    }

    pub fn insert_payment_intent(&self, payment_intent: PaymentIntent) {
        self.state()
            .payment_intents
            .insert(payment_intent.id.clone(), payment_intent);
    }

    pub fn fail_session_creation(&self) {
        self.state().fail_creation = true;
    }

    pub fn created_sessions(&self) -> Vec<CreateCheckoutSession> {
        self.state().created.clone()
    }

    pub fn account_lookups(&self) -> usize {
        self.state().account_lookups
    }

    pub fn session(&self, session_id: &str) -> Option<CheckoutSession> {
        self.state().sessions.get(session_id).cloned()
    }

    /// Fills in what the buyer entered on the hosted page and attaches a
    /// payment intent.
    pub fn complete_session(
        &self,
        session_id: &str,
        email: &str,
        full_name: &str,
        phone: &str,
        payment_intent_id: &str,
    ) {
        let mut state = self.state();
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.customer_details = Some(CustomerDetails {
                email: Some(email.to_string()),
                name: None,
                phone: None,
            });
            session.custom_fields = vec![text_field(FULL_NAME_FIELD, full_name), text_field(PHONE_FIELD, phone)];
            session.payment_intent = Some(payment_intent_id.to_string());
        }
        state.payment_intents.insert(
            payment_intent_id.to_string(),
            PaymentIntent {
                id: payment_intent_id.to_string(),
                status: Some("succeeded".to_string()),
                capture_method: Some("automatic".to_string()),
            },
        );
    }
}

fn text_field(key: &str, value: &str) -> CustomField {
    CustomField {
        key: key.to_string(),
        text: Some(CustomFieldText {
            value: Some(value.to_string()),
        }),
    }
}

fn not_found(kind: &str, id: &str) -> ProcessorError {
    ProcessorError::Api {
        status: 404,
        message: format!("No such {}: '{}'", kind, id),
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_checkout_session(
        &self,
        params: &CreateCheckoutSession,
    ) -> Result<CheckoutSession, ProcessorError> {
        let mut state = self.state();
        if state.fail_creation {
            return Err(ProcessorError::Api {
                status: 503,
                message: "processor unavailable".to_string(),
            });
        }
        state.created.push(params.clone());
        let id = format!("cs_test_{}", state.created.len());
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.stripe.test/pay/{}", id)),
            metadata: params.metadata(),
            line_items: Some(LineItemList {
                data: vec![LineItem {
                    quantity: Some(params.quantity),
                    price: Some(Price {
                        unit_amount: Some(params.unit_amount),
                    }),
                }],
            }),
            total_details: Some(TotalDetails {
                amount_discount: 0,
                amount_shipping: params.surcharge.unwrap_or(0),
            }),
            ..CheckoutSession::default()
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
        _connected_account: Option<&str>,
    ) -> Result<CheckoutSession, ProcessorError> {
        self.session(session_id)
            .ok_or_else(|| not_found("checkout.session", session_id))
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
        _connected_account: Option<&str>,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.state()
            .payment_intents
            .get(payment_intent_id)
            .cloned()
            .ok_or_else(|| not_found("payment_intent", payment_intent_id))
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        let mut state = self.state();
        state.account_lookups += 1;
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| not_found("account", account_id))
    }
}
