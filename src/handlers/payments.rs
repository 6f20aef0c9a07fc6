use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;

use crate::error::AppError;
use crate::validation::{validate_deposit, DepositRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub checkout_url: String,
    pub tx_ref: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reconciliation_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `POST /payments/initiate`
pub async fn initiate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InitiateResponse>, AppError> {
    let request: DepositRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedBody(e.to_string()))?;
    let deposit = validate_deposit(&request)?;

    let output = state.initiator.execute(deposit).await?;

    let warning = output.reconciliation_required.then(|| {
        "Checkout was created but the transaction could not be recorded; \
         the payment will need manual reconciliation"
            .to_string()
    });

    Ok(Json(InitiateResponse {
        checkout_url: output.checkout_url,
        tx_ref: output.reference,
        reconciliation_required: output.reconciliation_required,
        warning,
    }))
}
