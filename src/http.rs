use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::error::HttpError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("no payment provider key is configured")]
    NotConfigured,
    #[error("payment provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment provider answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<PaymentError> for HttpError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotConfigured => HttpError::new(
                "Online payment is not available at the moment. Please try again later!",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            other => HttpError::internal(other),
        }
    }
}

/// What a Checkout session is opened for.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tour_id: String,
    pub tour_name: String,
    pub tour_summary: Option<String>,
    pub image_url: String,
    pub price: f64,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutRequest {
    /// Stripe's form encoding of a one-item payment session.
    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("mode", "payment".to_string()),
            ("payment_method_types[]", "card".to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("customer_email", self.customer_email.clone()),
            ("client_reference_id", self.tour_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][unit_amount]",
                ((self.price * 100.0).round() as i64).to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                format!("{} Tour", self.tour_name),
            ),
            (
                "line_items[0][price_data][product_data][images][0]",
                self.image_url.clone(),
            ),
        ];
        if let Some(summary) = &self.tour_summary {
            form.push((
                "line_items[0][price_data][product_data][description]",
                summary.clone(),
            ));
        }
        form
    }
}

/// Outbound HTTP to the payment provider.
///
/// Cloning is cheap because reqwest::Client uses Arc internally
#[derive(Clone)]
pub struct HttpClient {
    pub conn: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
}

impl HttpClient {
    pub fn new(conn: reqwest::Client, api_base: impl Into<String>, secret_key: Option<String>) -> Self {
        Self {
            conn,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    /// Open a Stripe Checkout session and return it as Stripe sent it.
    pub async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<Value, PaymentError> {
        let secret_key = self.secret_key.as_deref().ok_or(PaymentError::NotConfigured)?;
        let url = format!("{}/v1/checkout/sessions", self.api_base);

        let response = self
            .conn
            .post(url)
            .bearer_auth(secret_key)
            .form(&request.form())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "checkout session rejected");
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let session: Value = response.json().await?;
        tracing::info!(tour_id = %request.tour_id, session_id = ?session.get("id"), "checkout session created");
        Ok(session)
    }
}
