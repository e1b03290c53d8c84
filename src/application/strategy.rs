use crate::domain::invoice::Invoice;
use crate::domain::money::{Amount, Money};
use crate::domain::payment::Payment;
use crate::error::{PaymentError, Result};

/// Point-in-time snapshot an allocation is computed against.
///
/// Strategies only ever see this view, never the stores, so they stay pure
/// functions of ledger state and can be unit-tested in isolation.
pub struct AllocationContext<'a> {
    pub payment: &'a Payment,
    pub invoice: &'a Invoice,
    /// `payment.amount - payment.applied` at snapshot time.
    pub payment_remaining: Money,
    /// `invoice.due - invoice.paid` at snapshot time.
    pub invoice_remaining: Money,
    /// Caller-supplied transaction description, possibly empty.
    pub description: &'a str,
}

impl AllocationContext<'_> {
    /// Description to record on the resulting transaction: the caller's
    /// text, or a generated one when the caller supplied none.
    pub fn describe(&self) -> String {
        if self.description.is_empty() {
            format!(
                "{} payment {} applied to invoice {}",
                self.payment.method_name, self.payment.reference, self.invoice.key
            )
        } else {
            self.description.to_string()
        }
    }

    fn exceeds(&self, requested: Money) -> PaymentError {
        if self.payment_remaining <= self.invoice_remaining {
            PaymentError::OverApplication {
                scope: "payment capacity",
                requested: requested.value(),
                remaining: self.payment_remaining.value(),
            }
        } else {
            PaymentError::OverApplication {
                scope: "invoice balance",
                requested: requested.value(),
                remaining: self.invoice_remaining.value(),
            }
        }
    }
}

/// A computed allocation: how much of the payment goes on the invoice and
/// the description for the resulting transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub amount: Amount,
    pub description: String,
}

/// Computes how much of a payment to apply to an invoice.
///
/// Implementations must keep the result inside both remaining balances. The
/// engine re-checks every result before persisting anything, so a
/// misbehaving strategy cannot over-apply; it just fails late.
pub trait AllocationStrategy: Send + Sync {
    fn allocate(&self, ctx: &AllocationContext<'_>, requested: Option<Amount>)
    -> Result<Allocation>;
}

/// Default policy: apply as much of the payment as the invoice can absorb.
///
/// A requested amount, when present, acts as a further cap rather than a
/// demand, so callers can limit how far a payment stretches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyMaximum;

impl AllocationStrategy for ApplyMaximum {
    fn allocate(
        &self,
        ctx: &AllocationContext<'_>,
        requested: Option<Amount>,
    ) -> Result<Allocation> {
        let mut cap = ctx.payment_remaining.min(ctx.invoice_remaining);
        if let Some(requested) = requested {
            cap = cap.min(requested.into());
        }
        let amount = Amount::new(cap.value()).map_err(|_| ctx.exceeds(cap))?;
        Ok(Allocation {
            amount,
            description: ctx.describe(),
        })
    }
}

/// Caller-directed policy: apply exactly the requested amount, rejecting
/// requests beyond either remaining balance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyRequested;

impl AllocationStrategy for ApplyRequested {
    fn allocate(
        &self,
        ctx: &AllocationContext<'_>,
        requested: Option<Amount>,
    ) -> Result<Allocation> {
        let requested = requested.ok_or_else(|| {
            PaymentError::ValidationError(
                "caller-specified allocation requires a requested amount".to_string(),
            )
        })?;
        let wanted: Money = requested.into();
        if wanted > ctx.payment_remaining || wanted > ctx.invoice_remaining {
            return Err(ctx.exceeds(wanted));
        }
        Ok(Allocation {
            amount: requested,
            description: ctx.describe(),
        })
    }
}
