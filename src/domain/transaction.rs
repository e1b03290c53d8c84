use crate::domain::invoice::InvoiceKey;
use crate::domain::money::{Amount, Money};
use crate::domain::payment::PaymentKey;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Surrogate identifier assigned by the transaction store on insert.
pub type TransactionId = u64;

/// One application of a payment against an invoice, or its reversal.
///
/// Transactions are immutable once stored. A mistaken application is
/// superseded by a reversing entry, never edited or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Surrogate id, `None` until stored.
    pub id: Option<TransactionId>,
    /// Payment this entry draws from.
    pub payment: PaymentKey,
    /// Invoice this entry settles against.
    pub invoice: InvoiceKey,
    /// Applied amount. Negative only on reversals.
    pub amount: Money,
    /// Free-form description of the movement.
    pub description: String,
    /// Id of the application this entry reverses, when it is a reversal.
    pub reversal_of: Option<TransactionId>,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds an application entry linking a payment to an invoice.
    pub fn applied(
        payment: PaymentKey,
        invoice: InvoiceKey,
        amount: Amount,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            payment,
            invoice,
            amount: amount.into(),
            description: description.into(),
            reversal_of: None,
            created_at: Utc::now(),
        }
    }

    /// Builds the entry reversing an earlier application.
    ///
    /// The original must be a stored application. An empty description gets
    /// a generated one naming the reversed entry.
    pub fn reversal(original: &Transaction, description: impl Into<String>) -> Result<Self> {
        let id = original.id.ok_or_else(|| {
            PaymentError::ValidationError("cannot reverse an unstored transaction".to_string())
        })?;
        if original.is_reversal() {
            return Err(PaymentError::ValidationError(format!(
                "transaction {id} is itself a reversal"
            )));
        }
        let description = description.into();
        let description = if description.is_empty() {
            format!("reversal of transaction {id}")
        } else {
            description
        };
        Ok(Self {
            id: None,
            payment: original.payment,
            invoice: original.invoice,
            amount: -original.amount,
            description,
            reversal_of: Some(id),
            created_at: Utc::now(),
        })
    }

    pub fn is_reversal(&self) -> bool {
        self.reversal_of.is_some()
    }
}

/// True when any application in the trail has not been reversed.
///
/// A payment with a live application cannot be voided; reversals themselves
/// never block anything.
pub fn has_live_applications(trail: &[Transaction]) -> bool {
    let reversed: HashSet<TransactionId> = trail.iter().filter_map(|t| t.reversal_of).collect();
    trail
        .iter()
        .filter(|t| !t.is_reversal())
        .any(|t| t.id.is_some_and(|id| !reversed.contains(&id)))
}
