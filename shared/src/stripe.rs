use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::processor::{
    CheckoutSession, ConnectedAccount, CreateCheckoutSession, PaymentIntent, PaymentProcessor,
    ProcessorError, FULL_NAME_FIELD, PHONE_FIELD, SURCHARGE_LABEL,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Form-encoded client for the subset of the Stripe API the engine uses.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        connected_account: Option<&str>,
    ) -> Result<T, ProcessorError> {
        let mut request = request.bearer_auth(&self.secret_key);
        if let Some(account) = connected_account {
            request = request.header("Stripe-Account", account);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            let message = body.error.message.unwrap_or_else(|| status.to_string());
            warn!("Stripe request failed with {}: {}", status, message);
            return Err(ProcessorError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

/// Flattens session parameters into Stripe's bracketed form encoding.
pub(crate) fn checkout_form(params: &CreateCheckoutSession) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), params.success_url.clone()),
        ("cancel_url".to_string(), params.cancel_url.clone()),
        ("expires_at".to_string(), params.expires_at.timestamp().to_string()),
        ("line_items[0][quantity]".to_string(), params.quantity.to_string()),
        ("line_items[0][price_data][currency]".to_string(), params.currency.clone()),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            params.unit_amount.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            params.product_name.clone(),
        ),
    ];

    let mut metadata: Vec<_> = params.metadata().into_iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        form.push((format!("metadata[{}]", key), value));
    }

    for (index, (key, label)) in [(FULL_NAME_FIELD, "Full name for booking"), (PHONE_FIELD, "Phone number")]
        .into_iter()
        .enumerate()
    {
        form.push((format!("custom_fields[{}][key]", index), key.to_string()));
        form.push((format!("custom_fields[{}][type]", index), "text".to_string()));
        form.push((format!("custom_fields[{}][label][type]", index), "custom".to_string()));
        form.push((format!("custom_fields[{}][label][custom]", index), label.to_string()));
    }

    if params.allow_promotion_codes {
        form.push(("allow_promotion_codes".to_string(), "true".to_string()));
    }

    if let Some(amount) = params.surcharge {
        let prefix = "shipping_options[0][shipping_rate_data]";
        form.push((format!("{}[type]", prefix), "fixed_amount".to_string()));
        form.push((format!("{}[display_name]", prefix), SURCHARGE_LABEL.to_string()));
        form.push((format!("{}[fixed_amount][amount]", prefix), amount.to_string()));
        form.push((format!("{}[fixed_amount][currency]", prefix), params.currency.clone()));
    }

    form
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_checkout_session(
        &self,
        params: &CreateCheckoutSession,
    ) -> Result<CheckoutSession, ProcessorError> {
        let request = self
            .http
            .post(self.url("checkout/sessions"))
            .header("Idempotency-Key", &params.idempotency_key)
            .form(&checkout_form(params));
        self.send(request, Some(&params.connected_account)).await
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
        connected_account: Option<&str>,
    ) -> Result<CheckoutSession, ProcessorError> {
        let request = self
            .http
            .get(self.url(&format!("checkout/sessions/{}", session_id)))
            .query(&[("expand[]", "line_items")]);
        self.send(request, connected_account).await
    }

    async fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
        connected_account: Option<&str>,
    ) -> Result<PaymentIntent, ProcessorError> {
        let request = self
            .http
            .get(self.url(&format!("payment_intents/{}", payment_intent_id)));
        self.send(request, connected_account).await
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        let request = self.http.get(self.url(&format!("accounts/{}", account_id)));
        self.send(request, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn params() -> CreateCheckoutSession {
        CreateCheckoutSession {
            event_id: "evt-1".to_string(),
            is_private: false,
            ticket_type_id: Some("General".to_string()),
            product_name: "Friday Social".to_string(),
            currency: "aud".to_string(),
            unit_amount: 2000,
            quantity: 2,
            success_url: "https://app.test/success".to_string(),
            cancel_url: "https://app.test/cancel".to_string(),
            expires_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            connected_account: "acct_1".to_string(),
            idempotency_key: "idempotency_key_evt-1_abc".to_string(),
            surcharge: None,
            allow_promotion_codes: false,
        }
    }

    fn value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn form_carries_line_item_metadata_and_expiry() {
        let form = checkout_form(&params());
        assert_eq!(value(&form, "mode"), Some("payment"));
        assert_eq!(value(&form, "line_items[0][quantity]"), Some("2"));
        assert_eq!(value(&form, "line_items[0][price_data][unit_amount]"), Some("2000"));
        assert_eq!(value(&form, "metadata[eventId]"), Some("evt-1"));
        assert_eq!(value(&form, "metadata[isPrivate]"), Some("false"));
        assert_eq!(value(&form, "metadata[ticketTypeId]"), Some("General"));
        assert_eq!(value(&form, "expires_at"), Some("1700000000"));
        assert_eq!(value(&form, "custom_fields[0][key]"), Some(FULL_NAME_FIELD));
        assert_eq!(value(&form, "custom_fields[1][key]"), Some(PHONE_FIELD));
        assert_eq!(value(&form, "allow_promotion_codes"), None);
        assert_eq!(value(&form, "shipping_options[0][shipping_rate_data][type]"), None);
    }

    #[test]
    fn form_adds_surcharge_and_promotion_codes_when_enabled() {
        let mut params = params();
        params.surcharge = Some(98);
        params.allow_promotion_codes = true;
        let form = checkout_form(&params);
        assert_eq!(value(&form, "allow_promotion_codes"), Some("true"));
        assert_eq!(
            value(&form, "shipping_options[0][shipping_rate_data][fixed_amount][amount]"),
            Some("98")
        );
        assert_eq!(
            value(&form, "shipping_options[0][shipping_rate_data][display_name]"),
            Some(SURCHARGE_LABEL)
        );
    }
}
