use crate::domain::invoice::{Invoice, InvoiceId, InvoiceKey};
use crate::domain::money::Money;
use crate::domain::payment::{CustomerKey, Payment, PaymentId, PaymentKey};
use crate::domain::ports::{CustomerDirectory, InvoiceStore, PaymentStore, TransactionStore};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct PaymentTable {
    rows: HashMap<PaymentId, Payment>,
    by_key: HashMap<PaymentKey, PaymentId>,
    next_id: PaymentId,
}

#[derive(Default)]
struct InvoiceTable {
    rows: HashMap<InvoiceId, Invoice>,
    by_key: HashMap<InvoiceKey, InvoiceId>,
    next_id: InvoiceId,
}

#[derive(Default)]
struct TransactionTable {
    rows: HashMap<TransactionId, Transaction>,
    next_id: TransactionId,
}

/// A materialized total that disagrees with the transaction trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditFinding {
    /// `"payment"` or `"invoice"`.
    pub entity: &'static str,
    pub key: Uuid,
    pub stored: Money,
    pub derived: Money,
}

/// A thread-safe in-memory ledger implementing all three store ports.
///
/// Uses `Arc<RwLock<_>>` tables for shared concurrent access. Version checks
/// run under the table's write lock, which makes `save` the atomic
/// conditional update the engine's optimistic concurrency relies on. Ideal
/// for testing or small datasets where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    payments: Arc<RwLock<PaymentTable>>,
    invoices: Arc<RwLock<InvoiceTable>>,
    transactions: Arc<RwLock<TransactionTable>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes applied/paid totals from the transaction trail and reports
    /// every entity whose materialized figure disagrees with it.
    pub async fn audit(&self) -> Vec<AuditFinding> {
        let trail: Vec<Transaction> = {
            let table = self.transactions.read().await;
            table.rows.values().cloned().collect()
        };
        let mut by_payment: HashMap<PaymentKey, Money> = HashMap::new();
        let mut by_invoice: HashMap<InvoiceKey, Money> = HashMap::new();
        for tx in &trail {
            *by_payment.entry(tx.payment).or_insert(Money::ZERO) += tx.amount;
            *by_invoice.entry(tx.invoice).or_insert(Money::ZERO) += tx.amount;
        }

        let mut findings = Vec::new();
        {
            let table = self.payments.read().await;
            for payment in table.rows.values() {
                let derived = by_payment.get(&payment.key).copied().unwrap_or(Money::ZERO);
                if derived != payment.applied {
                    findings.push(AuditFinding {
                        entity: "payment",
                        key: payment.key,
                        stored: payment.applied,
                        derived,
                    });
                }
            }
        }
        {
            let table = self.invoices.read().await;
            for invoice in table.rows.values() {
                let derived = by_invoice.get(&invoice.key).copied().unwrap_or(Money::ZERO);
                if derived != invoice.paid {
                    findings.push(AuditFinding {
                        entity: "invoice",
                        key: invoice.key,
                        stored: invoice.paid,
                        derived,
                    });
                }
            }
        }
        findings
    }
}

#[async_trait]
impl PaymentStore for InMemoryLedger {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let table = self.payments.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn get_by_key(&self, key: PaymentKey) -> Result<Option<Payment>> {
        let table = self.payments.read().await;
        Ok(table
            .by_key
            .get(&key)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn get_by_ids(&self, ids: &[PaymentId]) -> Result<Vec<Payment>> {
        let table = self.payments.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| table.rows.get(id))
            .cloned()
            .collect())
    }

    async fn get_by_customer(&self, customer: CustomerKey) -> Result<Vec<Payment>> {
        let table = self.payments.read().await;
        let mut payments: Vec<Payment> = table
            .rows
            .values()
            .filter(|p| p.customer == customer)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn save(&self, mut payment: Payment) -> Result<Payment> {
        let mut table = self.payments.write().await;
        match payment.id {
            None => {
                if table.by_key.contains_key(&payment.key) {
                    return Err(PaymentError::ValidationError(format!(
                        "payment key {} is already stored",
                        payment.key
                    )));
                }
                table.next_id += 1;
                let id = table.next_id;
                payment.id = Some(id);
                payment.version = 1;
                table.by_key.insert(payment.key, id);
                table.rows.insert(id, payment.clone());
                Ok(payment)
            }
            Some(id) => {
                let stored = table
                    .rows
                    .get(&id)
                    .ok_or_else(|| PaymentError::NotFound(format!("payment {id}")))?;
                if stored.version != payment.version {
                    return Err(PaymentError::ConcurrentModification(format!(
                        "payment {}",
                        payment.key
                    )));
                }
                payment.version += 1;
                table.rows.insert(id, payment.clone());
                Ok(payment)
            }
        }
    }
}

#[async_trait]
impl InvoiceStore for InMemoryLedger {
    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let table = self.invoices.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn get_by_key(&self, key: InvoiceKey) -> Result<Option<Invoice>> {
        let table = self.invoices.read().await;
        Ok(table
            .by_key
            .get(&key)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn save(&self, mut invoice: Invoice) -> Result<Invoice> {
        let mut table = self.invoices.write().await;
        match invoice.id {
            None => {
                if table.by_key.contains_key(&invoice.key) {
                    return Err(PaymentError::ValidationError(format!(
                        "invoice key {} is already stored",
                        invoice.key
                    )));
                }
                table.next_id += 1;
                let id = table.next_id;
                invoice.id = Some(id);
                invoice.version = 1;
                table.by_key.insert(invoice.key, id);
                table.rows.insert(id, invoice.clone());
                Ok(invoice)
            }
            Some(id) => {
                let stored = table
                    .rows
                    .get(&id)
                    .ok_or_else(|| PaymentError::NotFound(format!("invoice {id}")))?;
                if stored.version != invoice.version {
                    return Err(PaymentError::ConcurrentModification(format!(
                        "invoice {}",
                        invoice.key
                    )));
                }
                invoice.version += 1;
                table.rows.insert(id, invoice.clone());
                Ok(invoice)
            }
        }
    }
}

#[async_trait]
impl TransactionStore for InMemoryLedger {
    async fn insert(&self, mut tx: Transaction) -> Result<Transaction> {
        if tx.id.is_some() {
            return Err(PaymentError::ValidationError(
                "transactions are immutable once stored".to_string(),
            ));
        }
        let mut table = self.transactions.write().await;
        if let Some(original) = tx.reversal_of
            && table.rows.values().any(|t| t.reversal_of == Some(original))
        {
            return Err(PaymentError::ValidationError(format!(
                "transaction {original} was already reversed"
            )));
        }
        table.next_id += 1;
        let id = table.next_id;
        tx.id = Some(id);
        table.rows.insert(id, tx.clone());
        Ok(tx)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let table = self.transactions.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn get_by_payment(&self, payment: PaymentKey) -> Result<Vec<Transaction>> {
        let table = self.transactions.read().await;
        let mut trail: Vec<Transaction> = table
            .rows
            .values()
            .filter(|t| t.payment == payment)
            .cloned()
            .collect();
        trail.sort_by_key(|t| t.id);
        Ok(trail)
    }

    async fn get_by_invoice(&self, invoice: InvoiceKey) -> Result<Vec<Transaction>> {
        let table = self.transactions.read().await;
        let mut trail: Vec<Transaction> = table
            .rows
            .values()
            .filter(|t| t.invoice == invoice)
            .cloned()
            .collect();
        trail.sort_by_key(|t| t.id);
        Ok(trail)
    }
}

/// An in-memory set of known customer keys.
#[derive(Default, Clone)]
pub struct InMemoryCustomerDirectory {
    known: Arc<RwLock<HashSet<CustomerKey>>>,
}

impl InMemoryCustomerDirectory {
    /// Creates a new, empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, customer: CustomerKey) {
        self.known.write().await.insert(customer);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn exists(&self, customer: CustomerKey) -> Result<bool> {
        Ok(self.known.read().await.contains(&customer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::payment::PaymentMethod;
    use rust_decimal_macros::dec;

    fn payment(amount: Money) -> Payment {
        Payment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PaymentMethod::Cash,
            "cash",
            "REF-7",
            amount,
        )
    }

    #[tokio::test]
    async fn test_first_save_assigns_id_and_version() {
        let ledger = InMemoryLedger::new();
        let saved = PaymentStore::save(&ledger, payment(Money::new(dec!(10))))
            .await
            .unwrap();
        assert_eq!(saved.id, Some(1));
        assert_eq!(saved.version, 1);

        let by_id = PaymentStore::get(&ledger, 1).await.unwrap().unwrap();
        assert_eq!(by_id, saved);
        let by_key = PaymentStore::get_by_key(&ledger, saved.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key, saved);
    }

    #[tokio::test]
    async fn test_save_detects_version_conflicts() {
        let ledger = InMemoryLedger::new();
        let saved = PaymentStore::save(&ledger, payment(Money::new(dec!(10))))
            .await
            .unwrap();

        let fresh = PaymentStore::save(&ledger, saved.clone()).await.unwrap();
        assert_eq!(fresh.version, 2);

        // The first copy is now stale.
        let result = PaymentStore::save(&ledger, saved).await;
        assert!(matches!(
            result,
            Err(PaymentError::ConcurrentModification(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_key_insert_is_rejected() {
        let ledger = InMemoryLedger::new();
        let original = payment(Money::new(dec!(10)));
        PaymentStore::save(&ledger, original.clone()).await.unwrap();

        let result = PaymentStore::save(&ledger, original).await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_get_by_ids_skips_unknown() {
        let ledger = InMemoryLedger::new();
        let first = PaymentStore::save(&ledger, payment(Money::new(dec!(10))))
            .await
            .unwrap();
        let second = PaymentStore::save(&ledger, payment(Money::new(dec!(20))))
            .await
            .unwrap();

        let found = ledger
            .get_by_ids(&[first.id.unwrap(), 999, second.id.unwrap()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let none = ledger.get_by_ids(&[]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_customer_filters_and_orders() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let mut first = payment(Money::new(dec!(10)));
        first.customer = customer;
        let mut second = payment(Money::new(dec!(20)));
        second.customer = customer;
        let other = payment(Money::new(dec!(30)));

        PaymentStore::save(&ledger, first).await.unwrap();
        PaymentStore::save(&ledger, other).await.unwrap();
        PaymentStore::save(&ledger, second).await.unwrap();

        let found = ledger.get_by_customer(customer).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].amount, Money::new(dec!(10)));
        assert_eq!(found[1].amount, Money::new(dec!(20)));
    }

    #[tokio::test]
    async fn test_transactions_are_append_only() {
        let ledger = InMemoryLedger::new();
        let amount = Amount::new(dec!(5)).unwrap();
        let tx = Transaction::applied(Uuid::new_v4(), Uuid::new_v4(), amount, "t");

        let stored = ledger.insert(tx).await.unwrap();
        assert_eq!(stored.id, Some(1));

        let result = ledger.insert(stored).await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_one_reversal_per_application() {
        let ledger = InMemoryLedger::new();
        let amount = Amount::new(dec!(5)).unwrap();
        let original = ledger
            .insert(Transaction::applied(
                Uuid::new_v4(),
                Uuid::new_v4(),
                amount,
                "t",
            ))
            .await
            .unwrap();

        let undo = Transaction::reversal(&original, "").unwrap();
        ledger.insert(undo.clone()).await.unwrap();

        let result = ledger.insert(undo).await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_audit_flags_drift() {
        let ledger = InMemoryLedger::new();
        let mut drifted = payment(Money::new(dec!(50)));
        drifted.applied = Money::new(dec!(10));
        let drifted = PaymentStore::save(&ledger, drifted).await.unwrap();

        let findings = ledger.audit().await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].entity, "payment");
        assert_eq!(findings[0].key, drifted.key);
        assert_eq!(findings[0].stored, Money::new(dec!(10)));
        assert_eq!(findings[0].derived, Money::ZERO);
    }

    #[tokio::test]
    async fn test_directory_membership() {
        let directory = InMemoryCustomerDirectory::new();
        let customer = Uuid::new_v4();
        assert!(!directory.exists(customer).await.unwrap());
        directory.register(customer).await;
        assert!(directory.exists(customer).await.unwrap());
    }
}
