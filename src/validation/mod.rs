use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::domain::PaymentMethod;
use crate::providers::Customer;

pub const USER_ID_MAX_LEN: usize = 128;
pub const EMAIL_MAX_LEN: usize = 254;
pub const NAME_MAX_LEN: usize = 100;
pub const AMOUNT_INPUT_MAX_LEN: usize = 32;
pub const AMOUNT_MAX_SCALE: i64 = 2;
/// Amounts are stored as `NUMERIC(18,2)`, so the integer part holds at most
/// 16 digits.
pub const AMOUNT_MAX_INTEGER_DIGITS: u32 = 16;

/// Deposit request as it arrives over HTTP. Everything is optional here so
/// that missing fields produce a field-level validation error instead of a
/// generic deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct DepositRequest {
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub user: Option<UserPayload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// A deposit request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDeposit {
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub customer: Customer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_whitespace() { ' ' } else { ch })
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_amount_bound(amount: &BigDecimal) -> ValidationResult {
    let bound = BigDecimal::from(10_i64.pow(AMOUNT_MAX_INTEGER_DIGITS));
    if amount >= &bound {
        return Err(ValidationError::new(
            "amount",
            format!("must be less than 10^{}", AMOUNT_MAX_INTEGER_DIGITS),
        ));
    }

    Ok(())
}

pub fn validate_amount_scale(amount: &BigDecimal) -> ValidationResult {
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > AMOUNT_MAX_SCALE {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", AMOUNT_MAX_SCALE),
        ));
    }

    Ok(())
}

/// Accepts a JSON number or a numeric string.
pub fn parse_amount(value: &serde_json::Value) -> Result<BigDecimal, ValidationError> {
    let raw = match value {
        serde_json::Value::Number(number) => number.to_string(),
        serde_json::Value::String(text) => text.trim().to_string(),
        serde_json::Value::Null => return Err(ValidationError::new("amount", "is required")),
        _ => return Err(ValidationError::new("amount", "must be a number")),
    };

    validate_required("amount", &raw)?;
    validate_max_len("amount", &raw, AMOUNT_INPUT_MAX_LEN)?;

    let amount = BigDecimal::from_str(&raw)
        .map_err(|_| ValidationError::new("amount", "must be a number"))?;
    validate_positive_amount(&amount)?;
    validate_amount_bound(&amount)?;
    validate_amount_scale(&amount)?;

    Ok(amount)
}

pub fn validate_email(email: &str) -> ValidationResult {
    validate_required("user.email", email)?;
    validate_max_len("user.email", email, EMAIL_MAX_LEN)?;

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(ValidationError::new("user.email", "must be a valid email address"));
    }

    Ok(())
}

fn required_text(
    field: &'static str,
    value: Option<&str>,
    max_len: usize,
) -> Result<String, ValidationError> {
    let value = sanitize_string(value.unwrap_or_default());
    validate_required(field, &value)?;
    validate_max_len(field, &value, max_len)?;
    Ok(value)
}

/// Validate a deposit request before any network call is made.
pub fn validate_deposit(request: &DepositRequest) -> Result<ValidDeposit, ValidationError> {
    let amount = parse_amount(request.amount.as_ref().unwrap_or(&serde_json::Value::Null))?;

    let method_raw = required_text("method", request.method.as_deref(), 32)?;
    let method = PaymentMethod::from_str(&method_raw).map_err(|_| {
        let allowed: Vec<&str> = PaymentMethod::ALL.iter().map(|m| m.as_str()).collect();
        ValidationError::new("method", format!("must be one of: {}", allowed.join(", ")))
    })?;

    let user = request
        .user
        .as_ref()
        .ok_or_else(|| ValidationError::new("user", "is required"))?;

    let id = required_text("user.id", user.id.as_deref(), USER_ID_MAX_LEN)?;
    let email = required_text("user.email", user.email.as_deref(), EMAIL_MAX_LEN)?;
    validate_email(&email)?;
    let first_name = required_text("user.first_name", user.first_name.as_deref(), NAME_MAX_LEN)?;
    let last_name = required_text("user.last_name", user.last_name.as_deref(), NAME_MAX_LEN)?;

    Ok(ValidDeposit {
        amount,
        method,
        customer: Customer {
            id,
            email,
            first_name,
            last_name,
        },
    })
}
