use crate::domain::money::Money;
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Surrogate identifier assigned by the payment store on first save.
pub type PaymentId = u32;
/// Stable key identifying a payment record across systems.
pub type PaymentKey = Uuid;
/// Stable key identifying a customer.
pub type CustomerKey = Uuid;
/// Stable key identifying the provider that collected a payment.
pub type ProviderKey = Uuid;

/// How a payment was collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CreditCard,
    PurchaseOrder,
    GiftCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::PurchaseOrder => "purchase_order",
            PaymentMethod::GiftCard => "gift_card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record of money received from a customer.
///
/// `applied` is the materialized sum of the transactions drawing on this
/// payment. Keeping it on the record puts the remaining-capacity check under
/// the same version guard as the save, so two concurrent appliers cannot
/// both pass it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Surrogate id, `None` until first saved.
    pub id: Option<PaymentId>,
    /// Stable key, assigned at construction.
    pub key: PaymentKey,
    /// Customer the money was received from.
    pub customer: CustomerKey,
    /// Provider that collected the payment.
    pub provider: ProviderKey,
    /// Collection method.
    pub method: PaymentMethod,
    /// Human-readable name of the collection method.
    pub method_name: String,
    /// External reference (gateway id, cheque number, ...).
    pub reference: String,
    /// Total collected amount. Always positive.
    pub amount: Money,
    /// Sum of the transaction amounts referencing this payment.
    pub applied: Money,
    /// Soft-delete flag. Voided payments take no further part in allocation.
    pub voided: bool,
    /// Version counter, bumped by every successful save.
    pub version: u64,
}

impl Payment {
    pub fn new(
        customer: CustomerKey,
        provider: ProviderKey,
        method: PaymentMethod,
        method_name: impl Into<String>,
        reference: impl Into<String>,
        amount: Money,
    ) -> Self {
        Self {
            id: None,
            key: Uuid::new_v4(),
            customer,
            provider,
            method,
            method_name: method_name.into(),
            reference: reference.into(),
            amount,
            applied: Money::ZERO,
            voided: false,
            version: 0,
        }
    }

    /// Capacity still available for application to invoices.
    pub fn remaining(&self) -> Money {
        self.amount - self.applied
    }

    /// Checks the record invariants: a positive total and an applied sum
    /// inside `[0, amount]`.
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(PaymentError::ValidationError(format!(
                "payment {} amount must be positive, got {}",
                self.key, self.amount
            )));
        }
        if self.applied.is_negative() || self.applied > self.amount {
            return Err(PaymentError::ValidationError(format!(
                "payment {} has {} applied against a total of {}",
                self.key, self.applied, self.amount
            )));
        }
        Ok(())
    }
}
