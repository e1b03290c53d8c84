use crate::domain::invoice::Invoice;
use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct InvoiceRow<'a> {
    invoice: &'a str,
    due: String,
    paid: String,
    status: &'static str,
}

#[derive(Serialize)]
struct PaymentRow<'a> {
    reference: &'a str,
    method: &'static str,
    amount: String,
    applied: String,
    voided: bool,
}

/// Writes the final ledger state as CSV.
///
/// Monetary columns are normalized, so the output is deterministic for a
/// given ledger state no matter how the figures were accumulated.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    /// Creates a new `ReportWriter` targeting any `Write` sink (e.g., Stdout).
    pub fn new(target: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(target),
        }
    }

    /// Writes one row per invoice, labelled as given.
    pub fn write_invoices<'a, I>(&mut self, invoices: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Invoice)>,
    {
        for (label, invoice) in invoices {
            self.writer.serialize(InvoiceRow {
                invoice: label,
                due: invoice.due.to_string(),
                paid: invoice.paid.to_string(),
                status: invoice.status.as_str(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes one row per payment, keyed by its external reference.
    pub fn write_payments<'a, I>(&mut self, payments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        for payment in payments {
            self.writer.serialize(PaymentRow {
                reference: &payment.reference,
                method: payment.method.as_str(),
                amount: payment.amount.to_string(),
                applied: payment.applied.to_string(),
                voided: payment.voided,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
