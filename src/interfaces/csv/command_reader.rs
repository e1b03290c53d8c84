use crate::domain::payment::PaymentMethod;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use uuid::Uuid;

/// Kind of ledger command carried by a CSV row.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Invoice,
    Payment,
    Apply,
    Reverse,
    Delete,
}

/// One row of a command file.
///
/// Which columns matter depends on the kind: `invoice` rows need a label and
/// an amount (the total due), `payment` rows a customer, method, reference
/// and amount, `apply` rows a reference and an invoice label with the amount
/// optional (absent means the default strategy decides), `reverse` rows a
/// reference, and `delete` rows a reference.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub customer: Option<Uuid>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub invoice: Option<String>,
    pub amount: Option<Decimal>,
    pub description: Option<String>,
}

/// Reads ledger commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<Command>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes commands.
    ///
    /// This allows for processing large files in a streaming fashion without
    /// loading the entire dataset into memory.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
