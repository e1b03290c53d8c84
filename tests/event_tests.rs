use apportion::application::engine::{ApplyOptions, PaymentEngine};
use apportion::domain::invoice::Invoice;
use apportion::domain::money::Money;
use apportion::domain::payment::{CustomerKey, Payment, PaymentMethod};
use apportion::domain::ports::{
    EventNotifier, EventNotifierBox, HookDecision, PaymentStore, TransactionStore,
};
use apportion::domain::transaction::Transaction;
use apportion::error::PaymentError;
use apportion::infrastructure::in_memory::{InMemoryCustomerDirectory, InMemoryLedger};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Notifier that remembers which hooks fired, in order.
#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Recorder {
    async fn record(&self, hook: &'static str) {
        self.log.lock().await.push(hook);
    }

    async fn names(&self) -> Vec<&'static str> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl EventNotifier for Recorder {
    async fn before_save(&self, _payment: &Payment) -> HookDecision {
        self.record("before_save").await;
        HookDecision::Proceed
    }

    async fn after_save(&self, _payment: &Payment) {
        self.record("after_save").await;
    }

    async fn before_delete(&self, _payment: &Payment) -> HookDecision {
        self.record("before_delete").await;
        HookDecision::Proceed
    }

    async fn after_delete(&self, _payment: &Payment) {
        self.record("after_delete").await;
    }

    async fn before_apply(&self, _payment: &Payment, _invoice: &Invoice) -> HookDecision {
        self.record("before_apply").await;
        HookDecision::Proceed
    }

    async fn after_apply(&self, _payment: &Payment, _invoice: &Invoice, _tx: &Transaction) {
        self.record("after_apply").await;
    }
}

struct VetoSave;

#[async_trait]
impl EventNotifier for VetoSave {
    async fn before_save(&self, _payment: &Payment) -> HookDecision {
        HookDecision::Cancel
    }
}

struct VetoApply;

#[async_trait]
impl EventNotifier for VetoApply {
    async fn before_apply(&self, _payment: &Payment, _invoice: &Invoice) -> HookDecision {
        HookDecision::Cancel
    }
}

async fn observed(
    ledger: &InMemoryLedger,
    customer: CustomerKey,
    notifier: EventNotifierBox,
) -> PaymentEngine {
    let directory = InMemoryCustomerDirectory::new();
    directory.register(customer).await;
    PaymentEngine::new(
        Box::new(ledger.clone()),
        Box::new(ledger.clone()),
        Box::new(ledger.clone()),
        Box::new(directory),
    )
    .with_notifier(notifier)
}

async fn cash_payment(engine: &PaymentEngine, customer: CustomerKey, amount: Decimal) -> Payment {
    engine
        .create_payment(
            customer,
            Uuid::new_v4(),
            PaymentMethod::Cash,
            "cash",
            "REF-1",
            amount,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_save_notifies_around_the_write() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let recorder = Recorder::default();
    let engine = observed(&ledger, customer, Box::new(recorder.clone())).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    engine.save(payment, true).await.unwrap();

    assert_eq!(recorder.names().await, vec!["before_save", "after_save"]);
}

#[tokio::test]
async fn test_apply_notifies_around_the_sequence() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let recorder = Recorder::default();
    let engine = observed(&ledger, customer, Box::new(recorder.clone())).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    engine
        .save_and_apply(
            payment,
            Invoice::new(Money::new(dec!(10))),
            ApplyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(recorder.names().await, vec!["before_apply", "after_apply"]);
}

#[tokio::test]
async fn test_reverse_notifies_like_an_apply() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let recorder = Recorder::default();
    let engine = observed(&ledger, customer, Box::new(recorder.clone())).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    let applied = engine
        .save_and_apply(
            payment,
            Invoice::new(Money::new(dec!(10))),
            ApplyOptions::default().without_events(),
        )
        .await
        .unwrap();
    engine
        .reverse(applied.transaction.id.unwrap(), "undo", true)
        .await
        .unwrap();

    assert_eq!(recorder.names().await, vec!["before_apply", "after_apply"]);
}

#[tokio::test]
async fn test_delete_notifies_around_the_void() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let recorder = Recorder::default();
    let engine = observed(&ledger, customer, Box::new(recorder.clone())).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    let saved = engine.save(payment, false).await.unwrap();
    engine.delete(saved, true).await.unwrap();

    assert_eq!(recorder.names().await, vec!["before_delete", "after_delete"]);
}

#[tokio::test]
async fn test_cancelled_save_keeps_the_payment_out() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let engine = observed(&ledger, customer, Box::new(VetoSave)).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    let key = payment.key;
    let result = engine.save(payment, true).await;

    assert!(matches!(result, Err(PaymentError::Cancelled)));
    let stored = PaymentStore::get_by_key(&ledger, key).await.unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn test_cancelled_apply_writes_nothing() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let engine = observed(&ledger, customer, Box::new(VetoApply)).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    let key = payment.key;
    let result = engine
        .save_and_apply(
            payment,
            Invoice::new(Money::new(dec!(10))),
            ApplyOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(PaymentError::Cancelled)));
    let stored = PaymentStore::get_by_key(&ledger, key).await.unwrap();
    assert!(stored.is_none());
    let trail = TransactionStore::get_by_payment(&ledger, key).await.unwrap();
    assert!(trail.is_empty());
}

#[tokio::test]
async fn test_suppressed_events_skip_every_hook() {
    let ledger = InMemoryLedger::new();
    let customer = Uuid::new_v4();
    let recorder = Recorder::default();
    let engine = observed(&ledger, customer, Box::new(recorder.clone())).await;

    let payment = cash_payment(&engine, customer, dec!(10)).await;
    let saved = engine.save(payment, false).await.unwrap();
    let applied = engine
        .save_and_apply(
            saved,
            Invoice::new(Money::new(dec!(10))),
            ApplyOptions::default().without_events(),
        )
        .await
        .unwrap();
    let reversed = engine
        .reverse(applied.transaction.id.unwrap(), "undo", false)
        .await
        .unwrap();
    engine.delete(reversed.payment, false).await.unwrap();

    assert!(recorder.names().await.is_empty());
}
