use crate::domain::invoice::{Invoice, InvoiceId, InvoiceKey};
use crate::domain::payment::{CustomerKey, Payment, PaymentId, PaymentKey};
use crate::domain::ports::{InvoiceStore, PaymentStore, TransactionStore};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing payment records.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for storing invoice records.
pub const CF_INVOICES: &str = "invoices";
/// Column Family for storing the transaction trail.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for id counters.
pub const CF_META: &str = "meta";

const NEXT_PAYMENT_ID: &str = "next_payment_id";
const NEXT_INVOICE_ID: &str = "next_invoice_id";
const NEXT_TRANSACTION_ID: &str = "next_transaction_id";

/// A persistent ledger implementation using RocksDB.
///
/// Stores payments, invoices, and transactions in separate Column Families,
/// with surrogate id counters in a fourth. Writes take a process-wide gate
/// so the read-check-write of a version-guarded save stays atomic; reads go
/// straight to the database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksLedger {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksLedger {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_INVOICES, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::PersistenceFailure(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    /// Bumps a meta counter and returns the new value. Callers hold the
    /// write gate.
    fn bump_counter(&self, counter: &str) -> Result<u64> {
        let cf = self.cf(CF_META)?;
        let next = match self.db.get_cf(cf, counter)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|e| PaymentError::PersistenceFailure(Box::new(e)))?;
                u64::from_be_bytes(bytes) + 1
            }
            None => 1,
        };
        self.db.put_cf(cf, counter, next.to_be_bytes())?;
        Ok(next)
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &'static str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PaymentError::PersistenceFailure(Box::new(e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| PaymentError::PersistenceFailure(Box::new(e)))
}

#[async_trait]
impl PaymentStore for RocksLedger {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_by_key(&self, key: PaymentKey) -> Result<Option<Payment>> {
        let rows: Vec<Payment> = self.scan(CF_PAYMENTS)?;
        Ok(rows.into_iter().find(|p| p.key == key))
    }

    async fn get_by_ids(&self, ids: &[PaymentId]) -> Result<Vec<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for id in ids {
            if let Some(bytes) = self.db.get_cf(cf, id.to_be_bytes())? {
                payments.push(decode(&bytes)?);
            }
        }
        Ok(payments)
    }

    async fn get_by_customer(&self, customer: CustomerKey) -> Result<Vec<Payment>> {
        let rows: Vec<Payment> = self.scan(CF_PAYMENTS)?;
        let mut payments: Vec<Payment> =
            rows.into_iter().filter(|p| p.customer == customer).collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn save(&self, mut payment: Payment) -> Result<Payment> {
        let _gate = self.write_gate.lock().await;
        let cf = self.cf(CF_PAYMENTS)?;
        match payment.id {
            None => {
                let rows: Vec<Payment> = self.scan(CF_PAYMENTS)?;
                if rows.iter().any(|p| p.key == payment.key) {
                    return Err(PaymentError::ValidationError(format!(
                        "payment key {} is already stored",
                        payment.key
                    )));
                }
                let id = u32::try_from(self.bump_counter(NEXT_PAYMENT_ID)?)
                    .map_err(|e| PaymentError::PersistenceFailure(Box::new(e)))?;
                payment.id = Some(id);
                payment.version = 1;
                self.db.put_cf(cf, id.to_be_bytes(), encode(&payment)?)?;
                Ok(payment)
            }
            Some(id) => {
                let stored: Payment = match self.db.get_cf(cf, id.to_be_bytes())? {
                    Some(bytes) => decode(&bytes)?,
                    None => return Err(PaymentError::NotFound(format!("payment {id}"))),
                };
                if stored.version != payment.version {
                    return Err(PaymentError::ConcurrentModification(format!(
                        "payment {}",
                        payment.key
                    )));
                }
                payment.version += 1;
                self.db.put_cf(cf, id.to_be_bytes(), encode(&payment)?)?;
                Ok(payment)
            }
        }
    }
}

#[async_trait]
impl InvoiceStore for RocksLedger {
    async fn get(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let cf = self.cf(CF_INVOICES)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_by_key(&self, key: InvoiceKey) -> Result<Option<Invoice>> {
        let rows: Vec<Invoice> = self.scan(CF_INVOICES)?;
        Ok(rows.into_iter().find(|i| i.key == key))
    }

    async fn save(&self, mut invoice: Invoice) -> Result<Invoice> {
        let _gate = self.write_gate.lock().await;
        let cf = self.cf(CF_INVOICES)?;
        match invoice.id {
            None => {
                let rows: Vec<Invoice> = self.scan(CF_INVOICES)?;
                if rows.iter().any(|i| i.key == invoice.key) {
                    return Err(PaymentError::ValidationError(format!(
                        "invoice key {} is already stored",
                        invoice.key
                    )));
                }
                let id = u32::try_from(self.bump_counter(NEXT_INVOICE_ID)?)
                    .map_err(|e| PaymentError::PersistenceFailure(Box::new(e)))?;
                invoice.id = Some(id);
                invoice.version = 1;
                self.db.put_cf(cf, id.to_be_bytes(), encode(&invoice)?)?;
                Ok(invoice)
            }
            Some(id) => {
                let stored: Invoice = match self.db.get_cf(cf, id.to_be_bytes())? {
                    Some(bytes) => decode(&bytes)?,
                    None => return Err(PaymentError::NotFound(format!("invoice {id}"))),
                };
                if stored.version != invoice.version {
                    return Err(PaymentError::ConcurrentModification(format!(
                        "invoice {}",
                        invoice.key
                    )));
                }
                invoice.version += 1;
                self.db.put_cf(cf, id.to_be_bytes(), encode(&invoice)?)?;
                Ok(invoice)
            }
        }
    }
}

#[async_trait]
impl TransactionStore for RocksLedger {
    async fn insert(&self, mut tx: Transaction) -> Result<Transaction> {
        if tx.id.is_some() {
            return Err(PaymentError::ValidationError(
                "transactions are immutable once stored".to_string(),
            ));
        }
        let _gate = self.write_gate.lock().await;
        if let Some(original) = tx.reversal_of {
            let rows: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
            if rows.iter().any(|t| t.reversal_of == Some(original)) {
                return Err(PaymentError::ValidationError(format!(
                    "transaction {original} was already reversed"
                )));
            }
        }
        let cf = self.cf(CF_TRANSACTIONS)?;
        let id = self.bump_counter(NEXT_TRANSACTION_ID)?;
        tx.id = Some(id);
        self.db.put_cf(cf, id.to_be_bytes(), encode(&tx)?)?;
        Ok(tx)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_by_payment(&self, payment: PaymentKey) -> Result<Vec<Transaction>> {
        let rows: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        let mut trail: Vec<Transaction> =
            rows.into_iter().filter(|t| t.payment == payment).collect();
        trail.sort_by_key(|t| t.id);
        Ok(trail)
    }

    async fn get_by_invoice(&self, invoice: InvoiceKey) -> Result<Vec<Transaction>> {
        let rows: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        let mut trail: Vec<Transaction> =
            rows.into_iter().filter(|t| t.invoice == invoice).collect();
        trail.sort_by_key(|t| t.id);
        Ok(trail)
    }
}
