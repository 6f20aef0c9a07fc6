pub mod transaction;

pub use transaction::{generate_reference, PaymentMethod, Transaction, TransactionStatus};
