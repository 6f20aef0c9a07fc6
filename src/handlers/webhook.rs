use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::PaymentMethod;
use crate::error::AppError;
use crate::providers::ProviderRegistry;
use crate::use_cases::{Notification, NotificationChannel, SignatureCheck};
use crate::utils::sanitize::sanitize_json;
use crate::AppState;

/// Keys a notifier may use for the transaction reference. Chapa's redirect
/// callback spells it `trx_ref`.
const REFERENCE_KEYS: [&str; 2] = ["tx_ref", "trx_ref"];

/// Signature headers and the provider that signs with them.
const SIGNATURE_HEADERS: [(&str, PaymentMethod); 1] = [("x-chapa-signature", PaymentMethod::Chapa)];

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub tx_ref: Option<String>,
    pub trx_ref: Option<String>,
    pub source: Option<String>,
    /// Status claimed by the notifier. Logged, never trusted.
    pub status: Option<String>,
}

impl CallbackQuery {
    fn reference(&self) -> Option<String> {
        [self.tx_ref.as_deref(), self.trx_ref.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub verification: &'static str,
}

/// `GET /payments/webhook?tx_ref=...&source=...`
pub async fn webhook_get(
    State(state): State<AppState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Json<WebhookResponse>, AppError> {
    let Query(query) = query?;
    let reference = query.reference().ok_or(AppError::MissingReference)?;

    tracing::debug!(
        reference = %reference,
        claimed_status = ?query.status,
        "Callback received"
    );

    let notification = Notification {
        reference,
        channel: NotificationChannel::Callback,
        source_hint: query.source,
        signature: SignatureCheck::Absent,
    };

    Ok(respond(&state, notification).await)
}

/// `POST /payments/webhook` with a JSON body carrying `tx_ref`.
pub async fn webhook_post(
    State(state): State<AppState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let Query(query) = query?;
    let payload = parse_payload(&body)?;

    let reference = payload
        .as_ref()
        .and_then(reference_from_payload)
        .or_else(|| query.reference())
        .ok_or(AppError::MissingReference)?;

    let signature = check_signature(&state.providers, &headers, &body);
    if signature == SignatureCheck::Invalid {
        tracing::warn!(reference = %reference, "Webhook signature mismatch; verifying with provider anyway");
    }

    if let Some(payload) = payload.as_ref() {
        tracing::debug!(
            reference = %reference,
            payload = %sanitize_json(payload),
            "Webhook received"
        );
    }

    let notification = Notification {
        reference,
        channel: NotificationChannel::Webhook,
        source_hint: query.source,
        signature,
    };

    Ok(respond(&state, notification).await)
}

async fn respond(state: &AppState, notification: Notification) -> Json<WebhookResponse> {
    let outcome = state.reconciler.execute(notification).await;

    Json(WebhookResponse {
        received: true,
        verification: outcome.verification(),
    })
}

/// An empty body is allowed (the reference may be in the query string);
/// anything else must be a JSON object.
fn parse_payload(body: &[u8]) -> Result<Option<Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let payload: Value =
        serde_json::from_slice(body).map_err(|e| AppError::MalformedBody(e.to_string()))?;
    if !payload.is_object() {
        return Err(AppError::MalformedBody("expected a JSON object".to_string()));
    }

    Ok(Some(payload))
}

fn reference_in(object: &Value) -> Option<String> {
    REFERENCE_KEYS
        .iter()
        .filter_map(|key| object.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Top-level reference first, then one nested under `data`.
pub fn reference_from_payload(payload: &Value) -> Option<String> {
    reference_in(payload).or_else(|| payload.get("data").and_then(reference_in))
}

fn check_signature(providers: &ProviderRegistry, headers: &HeaderMap, body: &[u8]) -> SignatureCheck {
    for (header, method) in SIGNATURE_HEADERS {
        let Some(signature) = headers.get(header).and_then(|value| value.to_str().ok()) else {
            continue;
        };

        return match providers
            .get(method)
            .and_then(|provider| provider.validate_webhook_signature(body, signature))
        {
            Some(true) => SignatureCheck::Valid,
            Some(false) => SignatureCheck::Invalid,
            None => SignatureCheck::NotConfigured,
        };
    }

    SignatureCheck::Absent
}
