use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("allocation exceeds {scope}: requested {requested}, remaining {remaining}")]
    OverApplication {
        scope: &'static str,
        requested: Decimal,
        remaining: Decimal,
    },
    #[error("unknown customer: {0}")]
    UnknownCustomer(Uuid),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("payment {0} is referenced by applied transactions")]
    ReferencedByTransaction(Uuid),
    #[error("concurrent modification of {0}")]
    ConcurrentModification(String),
    #[error("operation cancelled by an event hook")]
    Cancelled,
    #[error("validation failed: {0}")]
    ValidationError(String),
    #[error("all {0} items of the bulk operation failed")]
    BulkFailed(usize),
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        Self::PersistenceFailure(Box::new(err))
    }
}
