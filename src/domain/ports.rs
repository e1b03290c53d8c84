use super::invoice::{Invoice, InvoiceId, InvoiceKey};
use super::payment::{CustomerKey, Payment, PaymentId, PaymentKey};
use super::transaction::{Transaction, TransactionId};
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage for payment records.
///
/// `save` is the conditional update the engine's optimistic concurrency
/// rests on: it succeeds only when the record's version matches the stored
/// one, bumps it, and assigns a surrogate id to new records. A mismatch is
/// `ConcurrentModification`.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn get_by_key(&self, key: PaymentKey) -> Result<Option<Payment>>;
    async fn get_by_ids(&self, ids: &[PaymentId]) -> Result<Vec<Payment>>;
    async fn get_by_customer(&self, customer: CustomerKey) -> Result<Vec<Payment>>;
    async fn save(&self, payment: Payment) -> Result<Payment>;
}

/// Durable storage for invoice records, version-guarded like payments.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>>;
    async fn get_by_key(&self, key: InvoiceKey) -> Result<Option<Invoice>>;
    async fn save(&self, invoice: Invoice) -> Result<Invoice>;
}

/// Append-only storage for the transaction trail.
///
/// `insert` refuses a reversal whose target already has one, atomically with
/// the write. That refusal is the claim concurrent reversers race for.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: Transaction) -> Result<Transaction>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;
    async fn get_by_payment(&self, payment: PaymentKey) -> Result<Vec<Transaction>>;
    async fn get_by_invoice(&self, invoice: InvoiceKey) -> Result<Vec<Transaction>>;
}

/// Resolves customer identities for the payment factory.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn exists(&self, customer: CustomerKey) -> Result<bool>;
}

/// Outcome of a cancellable before-hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Proceed,
    Cancel,
}

impl HookDecision {
    pub fn is_cancel(&self) -> bool {
        *self == HookDecision::Cancel
    }
}

/// Observer for engine operations.
///
/// Before-hooks run ahead of any write and may cancel the operation.
/// After-hooks run once everything has persisted and cannot veto. All hooks
/// default to no-ops so implementors pick what they care about.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn before_save(&self, _payment: &Payment) -> HookDecision {
        HookDecision::Proceed
    }
    async fn after_save(&self, _payment: &Payment) {}

    async fn before_delete(&self, _payment: &Payment) -> HookDecision {
        HookDecision::Proceed
    }
    async fn after_delete(&self, _payment: &Payment) {}

    async fn before_apply(&self, _payment: &Payment, _invoice: &Invoice) -> HookDecision {
        HookDecision::Proceed
    }
    async fn after_apply(&self, _payment: &Payment, _invoice: &Invoice, _tx: &Transaction) {}
}

pub type PaymentStoreBox = Box<dyn PaymentStore>;
pub type InvoiceStoreBox = Box<dyn InvoiceStore>;
pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type CustomerDirectoryBox = Box<dyn CustomerDirectory>;
pub type EventNotifierBox = Box<dyn EventNotifier>;
