use crate::domain::money::Money;
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Surrogate identifier assigned by the invoice store on first save.
pub type InvoiceId = u32;
/// Stable key identifying an invoice record across systems.
pub type InvoiceKey = Uuid;

/// Settlement state of an invoice.
///
/// `Voided` is imposed from outside and terminal; the other three are a pure
/// function of the paid/due pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Voided,
}

impl InvoiceStatus {
    /// Derives the status from the paid/due pair.
    pub fn of(paid: Money, due: Money) -> Self {
        if paid.is_zero() {
            InvoiceStatus::Unpaid
        } else if paid == due {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Voided => "voided",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An amount owed by a customer, settled by payment applications.
///
/// `paid` is the materialized sum of the transactions settling this invoice,
/// version-guarded together with the rest of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Surrogate id, `None` until first saved.
    pub id: Option<InvoiceId>,
    /// Stable key, assigned at construction.
    pub key: InvoiceKey,
    /// Total owed. Always positive.
    pub due: Money,
    /// Sum of the transaction amounts settling this invoice.
    pub paid: Money,
    /// Settlement state, kept consistent with paid/due unless voided.
    pub status: InvoiceStatus,
    /// Version counter, bumped by every successful save.
    pub version: u64,
}

impl Invoice {
    pub fn new(due: Money) -> Self {
        Self {
            id: None,
            key: Uuid::new_v4(),
            due,
            paid: Money::ZERO,
            status: InvoiceStatus::Unpaid,
            version: 0,
        }
    }

    /// Balance left to collect.
    pub fn remaining(&self) -> Money {
        self.due - self.paid
    }

    pub fn is_voided(&self) -> bool {
        self.status == InvoiceStatus::Voided
    }

    /// Re-derives the status from the current paid/due pair. A voided
    /// invoice stays voided.
    pub fn recompute_status(&mut self) {
        if self.status != InvoiceStatus::Voided {
            self.status = InvoiceStatus::of(self.paid, self.due);
        }
    }

    /// Checks the record invariants: a positive total due, a paid sum inside
    /// `[0, due]`, and a status matching the figures.
    pub fn validate(&self) -> Result<()> {
        if !self.due.is_positive() {
            return Err(PaymentError::ValidationError(format!(
                "invoice {} due must be positive, got {}",
                self.key, self.due
            )));
        }
        if self.paid.is_negative() || self.paid > self.due {
            return Err(PaymentError::ValidationError(format!(
                "invoice {} has {} paid against a due of {}",
                self.key, self.paid, self.due
            )));
        }
        if !self.is_voided() && self.status != InvoiceStatus::of(self.paid, self.due) {
            return Err(PaymentError::ValidationError(format!(
                "invoice {} status {} does not match paid {} of due {}",
                self.key, self.status, self.paid, self.due
            )));
        }
        Ok(())
    }
}
