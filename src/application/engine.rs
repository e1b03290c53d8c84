use crate::application::strategy::{
    AllocationContext, AllocationStrategy, ApplyMaximum, ApplyRequested,
};
use crate::domain::invoice::{Invoice, InvoiceKey};
use crate::domain::money::{Amount, Money};
use crate::domain::payment::{CustomerKey, Payment, PaymentId, PaymentKey, PaymentMethod, ProviderKey};
use crate::domain::ports::{
    CustomerDirectoryBox, EventNotifierBox, InvoiceStoreBox, PaymentStoreBox, TransactionStoreBox,
};
use crate::domain::transaction::{Transaction, TransactionId, has_live_applications};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Reload-and-revalidate attempts after an optimistic conflict on the first
/// write of an apply sequence.
const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Options accepted by the apply family of operations.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Emit before/after notifications around the operation.
    pub raise_events: bool,
    /// Requested amount: an override for the default strategy, an upper
    /// bound for any other. `None` lets the strategy decide.
    pub amount_to_apply: Option<Decimal>,
    /// Description recorded on the resulting transaction. Empty means the
    /// strategy generates one.
    pub description: String,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            raise_events: true,
            amount_to_apply: None,
            description: String::new(),
        }
    }
}

impl ApplyOptions {
    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount_to_apply = Some(amount);
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn without_events(mut self) -> Self {
        self.raise_events = false;
        self
    }
}

/// Updated ledger state produced by a successful apply or reverse.
#[derive(Debug, Clone)]
pub struct Applied {
    pub payment: Payment,
    pub invoice: Invoice,
    pub transaction: Transaction,
}

/// Per-item outcomes of a bulk save or delete.
///
/// Items are processed independently: one failure neither rolls back nor
/// stops the others.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub outcomes: Vec<(PaymentKey, Result<()>)>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Signals whether an apply attempt failed before or after its first write.
/// Only clean conflicts are safe to retry; once the payment claim has
/// persisted there is nothing to roll back and the error surfaces as-is.
enum ApplyError {
    Clean(PaymentError),
    Persisted(PaymentError),
}

impl ApplyError {
    fn into_inner(self) -> PaymentError {
        match self {
            Self::Clean(err) | Self::Persisted(err) => err,
        }
    }
}

/// The main entry point for allocating customer payments against invoices.
///
/// `PaymentEngine` owns the storage collaborators and is the single
/// enforcement point for the ledger invariants: strategies propose
/// allocations, the engine validates and persists them in a fixed order
/// (payment, invoice, transaction).
pub struct PaymentEngine {
    payments: PaymentStoreBox,
    invoices: InvoiceStoreBox,
    transactions: TransactionStoreBox,
    customers: CustomerDirectoryBox,
    notifier: Option<EventNotifierBox>,
    retry_budget: u32,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine` instance.
    ///
    /// # Arguments
    ///
    /// * `payments` - The store for payment records.
    /// * `invoices` - The store for invoice records.
    /// * `transactions` - The append-only store for the transaction trail.
    /// * `customers` - The directory used to vet customers at creation.
    pub fn new(
        payments: PaymentStoreBox,
        invoices: InvoiceStoreBox,
        transactions: TransactionStoreBox,
        customers: CustomerDirectoryBox,
    ) -> Self {
        Self {
            payments,
            invoices,
            transactions,
            customers,
            notifier: None,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Attaches an observer notified around engine operations.
    pub fn with_notifier(mut self, notifier: EventNotifierBox) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Overrides the optimistic-conflict retry budget.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Creates a payment in an unsaved state.
    ///
    /// The amount must be positive and is rounded half-to-even to minor
    /// units; the customer must be known to the directory. Nothing is
    /// persisted until an explicit save.
    pub async fn create_payment(
        &self,
        customer: CustomerKey,
        provider: ProviderKey,
        method: PaymentMethod,
        method_name: &str,
        reference: &str,
        amount: Decimal,
    ) -> Result<Payment> {
        let amount = Amount::new(amount)?.round_minor()?;
        if !self.customers.exists(customer).await? {
            return Err(PaymentError::UnknownCustomer(customer));
        }
        let payment = Payment::new(
            customer,
            provider,
            method,
            method_name,
            reference,
            amount.into(),
        );
        info!(payment = %payment.key, %customer, amount = %payment.amount, "created payment");
        Ok(payment)
    }

    /// Persists a single payment.
    ///
    /// The record is validated first. A stale version surfaces
    /// `ConcurrentModification` without retrying: the caller's copy is the
    /// authoritative intent and must not silently overwrite a newer one.
    pub async fn save(&self, payment: Payment, raise_events: bool) -> Result<Payment> {
        payment.validate()?;
        if raise_events && let Some(notifier) = &self.notifier {
            if notifier.before_save(&payment).await.is_cancel() {
                return Err(PaymentError::Cancelled);
            }
        }
        let payment = self.payments.save(payment).await?;
        info!(payment = %payment.key, amount = %payment.amount, "saved payment");
        if raise_events && let Some(notifier) = &self.notifier {
            notifier.after_save(&payment).await;
        }
        Ok(payment)
    }

    /// Persists a collection of payments, each validated and saved
    /// independently.
    ///
    /// Fails with `BulkFailed` only when every item failed; any partial
    /// success is reported per item instead.
    pub async fn save_all(&self, payments: Vec<Payment>, raise_events: bool) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        for payment in payments {
            let key = payment.key;
            let outcome = self.save(payment, raise_events).await.map(|_| ());
            if let Err(err) = &outcome {
                warn!(payment = %key, %err, "bulk save item failed");
            }
            report.outcomes.push((key, outcome));
        }
        if !report.outcomes.is_empty() && report.succeeded() == 0 {
            return Err(PaymentError::BulkFailed(report.failed()));
        }
        Ok(report)
    }

    /// Saves the payment and applies it to the invoice.
    ///
    /// Picks the default apply-maximum strategy when no amount is requested
    /// and the exact-amount strategy when one is.
    pub async fn save_and_apply(
        &self,
        payment: Payment,
        invoice: Invoice,
        options: ApplyOptions,
    ) -> Result<Applied> {
        if options.amount_to_apply.is_some() {
            self.save_and_apply_with(&ApplyRequested, payment, invoice, options)
                .await
        } else {
            self.save_and_apply_with(&ApplyMaximum, payment, invoice, options)
                .await
        }
    }

    /// Saves the payment and applies it to the invoice using the supplied
    /// strategy.
    ///
    /// `options.amount_to_apply`, when set, is also an upper bound on the
    /// strategy's result; a result above it is rejected with
    /// `OverApplication`. Writes go payment first, then invoice, then the
    /// transaction, so the version-guarded payment save claims the capacity
    /// before anything else persists. A conflict on that first write is
    /// retried against reloaded state a bounded number of times; conflicts
    /// after it surface immediately, and the trail shows what persisted.
    pub async fn save_and_apply_with(
        &self,
        strategy: &dyn AllocationStrategy,
        mut payment: Payment,
        mut invoice: Invoice,
        options: ApplyOptions,
    ) -> Result<Applied> {
        let requested = match options.amount_to_apply {
            Some(value) => Some(Amount::new(value)?.round_minor()?),
            None => None,
        };
        if options.raise_events && let Some(notifier) = &self.notifier {
            if notifier.before_apply(&payment, &invoice).await.is_cancel() {
                return Err(PaymentError::Cancelled);
            }
        }

        let mut attempts = 0;
        let (payment, invoice, transaction) = loop {
            let attempt = self
                .apply_once(
                    strategy,
                    payment.clone(),
                    invoice.clone(),
                    requested,
                    &options.description,
                )
                .await;
            match attempt {
                Ok(applied) => break applied,
                Err(ApplyError::Clean(PaymentError::ConcurrentModification(entity)))
                    if attempts < self.retry_budget =>
                {
                    attempts += 1;
                    warn!(%entity, attempt = attempts, "apply raced a concurrent writer, reloading");
                    payment = self.reload_payment(payment.key).await?;
                    // A never-saved invoice has no stored state to reload.
                    if invoice.id.is_some() {
                        invoice = self.reload_invoice(invoice.key).await?;
                    }
                }
                Err(err) => return Err(err.into_inner()),
            }
        };

        info!(
            payment = %payment.key,
            invoice = %invoice.key,
            amount = %transaction.amount,
            "applied payment to invoice"
        );
        if options.raise_events && let Some(notifier) = &self.notifier {
            notifier.after_apply(&payment, &invoice, &transaction).await;
        }
        Ok(Applied {
            payment,
            invoice,
            transaction,
        })
    }

    /// One attempt of the apply sequence against the given snapshots.
    async fn apply_once(
        &self,
        strategy: &dyn AllocationStrategy,
        mut payment: Payment,
        mut invoice: Invoice,
        requested: Option<Amount>,
        description: &str,
    ) -> std::result::Result<(Payment, Invoice, Transaction), ApplyError> {
        payment.validate().map_err(ApplyError::Clean)?;
        invoice.validate().map_err(ApplyError::Clean)?;
        if payment.voided {
            return Err(ApplyError::Clean(PaymentError::ValidationError(format!(
                "payment {} is voided",
                payment.key
            ))));
        }
        if invoice.is_voided() {
            return Err(ApplyError::Clean(PaymentError::ValidationError(format!(
                "invoice {} is voided",
                invoice.key
            ))));
        }

        let allocation = {
            let ctx = AllocationContext {
                payment: &payment,
                invoice: &invoice,
                payment_remaining: payment.remaining(),
                invoice_remaining: invoice.remaining(),
                description,
            };
            strategy.allocate(&ctx, requested).map_err(ApplyError::Clean)?
        };
        let amount = allocation.amount.round_minor().map_err(ApplyError::Clean)?;
        let granted: Money = amount.into();

        // Single enforcement point: whatever the strategy answered, the
        // engine re-checks it against the snapshot before writing.
        if let Some(bound) = requested
            && granted > Money::from(bound)
        {
            return Err(ApplyError::Clean(PaymentError::OverApplication {
                scope: "requested amount",
                requested: granted.value(),
                remaining: bound.value(),
            }));
        }
        if granted > payment.remaining() {
            return Err(ApplyError::Clean(PaymentError::OverApplication {
                scope: "payment capacity",
                requested: granted.value(),
                remaining: payment.remaining().value(),
            }));
        }
        if granted > invoice.remaining() {
            return Err(ApplyError::Clean(PaymentError::OverApplication {
                scope: "invoice balance",
                requested: granted.value(),
                remaining: invoice.remaining().value(),
            }));
        }

        payment.applied += granted;
        invoice.paid += granted;
        invoice.recompute_status();

        // Payment first: its version-guarded save claims the capacity.
        let payment = self.payments.save(payment).await.map_err(ApplyError::Clean)?;
        let invoice = self
            .invoices
            .save(invoice)
            .await
            .map_err(ApplyError::Persisted)?;
        let transaction = Transaction::applied(payment.key, invoice.key, amount, allocation.description);
        let transaction = self
            .transactions
            .insert(transaction)
            .await
            .map_err(ApplyError::Persisted)?;
        Ok((payment, invoice, transaction))
    }

    /// Records the reversing transaction for an earlier application,
    /// restoring payment capacity and reducing the invoice's paid total.
    ///
    /// The target must be a stored application that has not been reversed;
    /// reversing a reversal or reversing twice is a `ValidationError`. The
    /// reversal entry is inserted before any balance moves: the store admits
    /// only one reversal per application, so of two racing reversers exactly
    /// one gets past the insert and the other fails with nothing written.
    pub async fn reverse(
        &self,
        transaction: TransactionId,
        description: &str,
        raise_events: bool,
    ) -> Result<Applied> {
        let original = self
            .transactions
            .get(transaction)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {transaction}")))?;
        let trail = self.transactions.get_by_payment(original.payment).await?;
        if trail.iter().any(|t| t.reversal_of == Some(transaction)) {
            return Err(PaymentError::ValidationError(format!(
                "transaction {transaction} was already reversed"
            )));
        }
        let reversal = Transaction::reversal(&original, description)?;

        let mut payment = self.reload_payment(original.payment).await?;
        let mut invoice = self.reload_invoice(original.invoice).await?;
        if raise_events && let Some(notifier) = &self.notifier {
            if notifier.before_apply(&payment, &invoice).await.is_cancel() {
                return Err(PaymentError::Cancelled);
            }
        }

        // The insert claims the reversal. The guard above is a fast path;
        // this is the check that cannot race, because the store runs it
        // atomically with the write.
        let reversal = self.transactions.insert(reversal).await?;

        let mut attempts = 0;
        let (payment, invoice) = loop {
            let mut claimed = payment.clone();
            let mut settled = invoice.clone();
            claimed.applied -= original.amount;
            settled.paid -= original.amount;
            settled.recompute_status();
            if claimed.applied.is_negative() || settled.paid.is_negative() {
                return Err(PaymentError::ValidationError(format!(
                    "reversing transaction {transaction} would overdraw the ledger"
                )));
            }
            // Conflicts here only mean a peer bumped the version; the delta
            // is recomputed from reloaded state, so retrying cannot apply it
            // twice.
            match self.payments.save(claimed).await {
                Ok(saved) => break (saved, self.invoices.save(settled).await?),
                Err(PaymentError::ConcurrentModification(entity))
                    if attempts < self.retry_budget =>
                {
                    attempts += 1;
                    warn!(%entity, attempt = attempts, "reversal raced a concurrent writer, reloading");
                    payment = self.reload_payment(original.payment).await?;
                    invoice = self.reload_invoice(original.invoice).await?;
                }
                Err(err) => return Err(err),
            }
        };

        info!(
            payment = %payment.key,
            invoice = %invoice.key,
            amount = %reversal.amount,
            "reversed application"
        );
        if raise_events && let Some(notifier) = &self.notifier {
            notifier.after_apply(&payment, &invoice, &reversal).await;
        }
        Ok(Applied {
            payment,
            invoice,
            transaction: reversal,
        })
    }

    /// Soft-deletes a payment by setting its voided flag.
    ///
    /// Refused with `ReferencedByTransaction` while any live application
    /// references the payment; recorded money movement is never destroyed.
    /// Deleting an already-voided payment is a no-op.
    pub async fn delete(&self, payment: Payment, raise_events: bool) -> Result<Payment> {
        if payment.voided {
            return Ok(payment);
        }
        let trail = self.transactions.get_by_payment(payment.key).await?;
        if has_live_applications(&trail) {
            return Err(PaymentError::ReferencedByTransaction(payment.key));
        }
        if raise_events && let Some(notifier) = &self.notifier {
            if notifier.before_delete(&payment).await.is_cancel() {
                return Err(PaymentError::Cancelled);
            }
        }
        let mut payment = payment;
        payment.voided = true;
        let payment = self.payments.save(payment).await?;
        info!(payment = %payment.key, "voided payment");
        if raise_events && let Some(notifier) = &self.notifier {
            notifier.after_delete(&payment).await;
        }
        Ok(payment)
    }

    /// Soft-deletes a collection of payments, each handled independently.
    ///
    /// Fails with `BulkFailed` only when every item failed.
    pub async fn delete_all(
        &self,
        payments: Vec<Payment>,
        raise_events: bool,
    ) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        for payment in payments {
            let key = payment.key;
            let outcome = self.delete(payment, raise_events).await.map(|_| ());
            if let Err(err) = &outcome {
                warn!(payment = %key, %err, "bulk delete item failed");
            }
            report.outcomes.push((key, outcome));
        }
        if !report.outcomes.is_empty() && report.succeeded() == 0 {
            return Err(PaymentError::BulkFailed(report.failed()));
        }
        Ok(report)
    }

    /// Fetches a payment by surrogate id. A miss is `Ok(None)`, not an error.
    pub async fn get_by_id(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.payments.get(id).await
    }

    /// Fetches the payments for a set of ids. Unknown ids are skipped, and
    /// an empty set yields an empty result.
    pub async fn get_by_ids(&self, ids: &[PaymentId]) -> Result<Vec<Payment>> {
        self.payments.get_by_ids(ids).await
    }

    /// Fetches every payment received from a customer, voided ones included.
    pub async fn get_payments_by_customer(&self, customer: CustomerKey) -> Result<Vec<Payment>> {
        self.payments.get_by_customer(customer).await
    }

    async fn reload_payment(&self, key: PaymentKey) -> Result<Payment> {
        self.payments
            .get_by_key(key)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {key}")))
    }

    async fn reload_invoice(&self, key: InvoiceKey) -> Result<Invoice> {
        self.invoices
            .get_by_key(key)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("invoice {key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::{InMemoryCustomerDirectory, InMemoryLedger};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn engine_with(ledger: &InMemoryLedger, customer: CustomerKey) -> PaymentEngine {
        let directory = InMemoryCustomerDirectory::new();
        directory.register(customer).await;
        PaymentEngine::new(
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(ledger.clone()),
            Box::new(directory),
        )
    }

    async fn card_payment(
        engine: &PaymentEngine,
        customer: CustomerKey,
        amount: Decimal,
    ) -> Payment {
        engine
            .create_payment(
                customer,
                Uuid::new_v4(),
                PaymentMethod::CreditCard,
                "credit card",
                "REF-1",
                amount,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_factory_rejects_non_positive_amounts() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let engine = engine_with(&ledger, customer).await;

        for bad in [dec!(0), dec!(-10)] {
            let result = engine
                .create_payment(
                    customer,
                    Uuid::new_v4(),
                    PaymentMethod::Cash,
                    "cash",
                    "REF-1",
                    bad,
                )
                .await;
            assert!(matches!(result, Err(PaymentError::InvalidAmount(_))));
        }
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_customer() {
        let ledger = InMemoryLedger::new();
        let engine = engine_with(&ledger, Uuid::new_v4()).await;

        let stranger = Uuid::new_v4();
        let result = engine
            .create_payment(
                stranger,
                Uuid::new_v4(),
                PaymentMethod::Cash,
                "cash",
                "REF-1",
                dec!(10),
            )
            .await;
        assert!(matches!(result, Err(PaymentError::UnknownCustomer(c)) if c == stranger));
    }

    #[tokio::test]
    async fn test_factory_rounds_half_to_even() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let engine = engine_with(&ledger, customer).await;

        let payment = card_payment(&engine, customer, dec!(10.005)).await;
        assert_eq!(payment.amount, Money::new(dec!(10.00)));
    }

    #[tokio::test]
    async fn test_default_apply_takes_what_fits() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let engine = engine_with(&ledger, customer).await;

        let payment = card_payment(&engine, customer, dec!(50)).await;
        let invoice = Invoice::new(Money::new(dec!(80)));

        let applied = engine
            .save_and_apply(payment, invoice, ApplyOptions::default())
            .await
            .unwrap();
        assert_eq!(applied.transaction.amount, Money::new(dec!(50)));
        assert_eq!(applied.payment.remaining(), Money::ZERO);
        assert_eq!(applied.invoice.paid, Money::new(dec!(50)));
        assert_eq!(
            applied.invoice.status,
            crate::domain::invoice::InvoiceStatus::PartiallyPaid
        );
    }

    #[tokio::test]
    async fn test_stale_copy_heals_through_retry() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let engine = engine_with(&ledger, customer).await;

        let payment = card_payment(&engine, customer, dec!(100)).await;
        let payment = engine.save(payment, true).await.unwrap();
        let first = Invoice::new(Money::new(dec!(30)));
        let second = Invoice::new(Money::new(dec!(30)));

        engine
            .save_and_apply(payment.clone(), first, ApplyOptions::default())
            .await
            .unwrap();

        // The caller reuses the stale copy; the conflict is detected on the
        // first write, reloaded, and the apply goes through.
        let applied = engine
            .save_and_apply(payment, second, ApplyOptions::default())
            .await
            .unwrap();
        assert_eq!(applied.payment.applied, Money::new(dec!(60)));
        assert_eq!(applied.transaction.amount, Money::new(dec!(30)));
    }

    #[tokio::test]
    async fn test_plain_save_does_not_retry_stale_copies() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let engine = engine_with(&ledger, customer).await;

        let payment = card_payment(&engine, customer, dec!(10)).await;
        let saved = engine.save(payment, true).await.unwrap();
        let stale = saved.clone();
        engine.save(saved, true).await.unwrap();

        let result = engine.save(stale, true).await;
        assert!(matches!(
            result,
            Err(PaymentError::ConcurrentModification(_))
        ));
    }

    #[tokio::test]
    async fn test_exhausted_payment_cannot_apply_again() {
        let ledger = InMemoryLedger::new();
        let customer = Uuid::new_v4();
        let engine = engine_with(&ledger, customer).await;

        let payment = card_payment(&engine, customer, dec!(50)).await;
        let invoice = Invoice::new(Money::new(dec!(50)));
        let applied = engine
            .save_and_apply(payment, invoice, ApplyOptions::default())
            .await
            .unwrap();

        let next = Invoice::new(Money::new(dec!(30)));
        let result = engine
            .save_and_apply(
                applied.payment,
                next,
                ApplyOptions::default().with_amount(dec!(20)),
            )
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::OverApplication { .. })
        ));
    }
}
