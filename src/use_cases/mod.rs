//! Application use cases. Each one orchestrates the store and provider ports
//! and knows nothing about HTTP.

pub mod initiate_payment;
pub mod reconcile_payment;

pub use initiate_payment::{InitiatePayment, InitiationOutput, InitiationSettings};
pub use reconcile_payment::{
    Notification, NotificationChannel, ReconcileOutcome, ReconcilePayment, SignatureCheck,
};
