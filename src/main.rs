use apportion::application::engine::{ApplyOptions, PaymentEngine};
use apportion::domain::invoice::Invoice;
use apportion::domain::money::Money;
use apportion::domain::payment::{Payment, ProviderKey};
use apportion::domain::transaction::TransactionId;
use apportion::error::PaymentError;
use apportion::infrastructure::in_memory::{InMemoryCustomerDirectory, InMemoryLedger};
#[cfg(feature = "storage-rocksdb")]
use apportion::infrastructure::rocksdb::RocksLedger;
use apportion::interfaces::csv::command_reader::{Command, CommandKind, CommandReader};
use apportion::interfaces::csv::report_writer::ReportWriter;
use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    Invoices,
    Payments,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Ledger table to print once all commands have run
    #[arg(long, value_enum, default_value = "invoices")]
    report: Report,
}

/// Labels assigned by the command file, resolved to ledger state.
struct Session {
    provider: ProviderKey,
    payments: BTreeMap<String, Payment>,
    invoices: BTreeMap<String, Invoice>,
    applications: BTreeMap<String, Vec<TransactionId>>,
}

impl Session {
    fn new() -> Self {
        Self {
            provider: Uuid::new_v4(),
            payments: BTreeMap::new(),
            invoices: BTreeMap::new(),
            applications: BTreeMap::new(),
        }
    }
}

fn missing(what: &str) -> PaymentError {
    PaymentError::ValidationError(format!("command row is missing the {what} column"))
}

async fn run_command(
    engine: &PaymentEngine,
    directory: &InMemoryCustomerDirectory,
    session: &mut Session,
    command: Command,
) -> apportion::error::Result<()> {
    match command.kind {
        CommandKind::Invoice => {
            let label = command.invoice.ok_or_else(|| missing("invoice"))?;
            let due = command.amount.ok_or_else(|| missing("amount"))?;
            if session.invoices.contains_key(&label) {
                return Err(PaymentError::ValidationError(format!(
                    "invoice {label} was already declared"
                )));
            }
            let invoice = Invoice::new(Money::new(due));
            invoice.validate()?;
            session.invoices.insert(label, invoice);
        }
        CommandKind::Payment => {
            let customer = command.customer.ok_or_else(|| missing("customer"))?;
            let method = command.method.ok_or_else(|| missing("method"))?;
            let reference = command.reference.ok_or_else(|| missing("reference"))?;
            let amount = command.amount.ok_or_else(|| missing("amount"))?;
            if session.payments.contains_key(&reference) {
                return Err(PaymentError::ValidationError(format!(
                    "payment {reference} was already declared"
                )));
            }
            directory.register(customer).await;
            let payment = engine
                .create_payment(
                    customer,
                    session.provider,
                    method,
                    method.as_str(),
                    &reference,
                    amount,
                )
                .await?;
            let payment = engine.save(payment, true).await?;
            session.payments.insert(reference, payment);
        }
        CommandKind::Apply => {
            let reference = command.reference.ok_or_else(|| missing("reference"))?;
            let label = command.invoice.ok_or_else(|| missing("invoice"))?;
            let payment = session
                .payments
                .get(&reference)
                .cloned()
                .ok_or_else(|| PaymentError::NotFound(format!("payment {reference}")))?;
            let invoice = session
                .invoices
                .get(&label)
                .cloned()
                .ok_or_else(|| PaymentError::NotFound(format!("invoice {label}")))?;

            let mut options = ApplyOptions::default();
            if let Some(amount) = command.amount {
                options = options.with_amount(amount);
            }
            if let Some(text) = command.description {
                options = options.with_description(text);
            }
            let applied = engine.save_and_apply(payment, invoice, options).await?;
            if let Some(id) = applied.transaction.id {
                session.applications.entry(reference.clone()).or_default().push(id);
            }
            session.payments.insert(reference, applied.payment);
            session.invoices.insert(label, applied.invoice);
        }
        CommandKind::Reverse => {
            let reference = command.reference.ok_or_else(|| missing("reference"))?;
            let id = session
                .applications
                .get_mut(&reference)
                .and_then(|ids| ids.pop())
                .ok_or_else(|| {
                    PaymentError::ValidationError(format!(
                        "payment {reference} has no applications to reverse"
                    ))
                })?;
            let description = command.description.unwrap_or_default();
            let reversed = engine.reverse(id, &description, true).await?;
            let invoice_key = reversed.invoice.key;
            session.payments.insert(reference, reversed.payment);
            if let Some(label) = session
                .invoices
                .iter()
                .find(|(_, i)| i.key == invoice_key)
                .map(|(label, _)| label.clone())
            {
                session.invoices.insert(label, reversed.invoice);
            }
        }
        CommandKind::Delete => {
            let reference = command.reference.ok_or_else(|| missing("reference"))?;
            let payment = session
                .payments
                .get(&reference)
                .cloned()
                .ok_or_else(|| PaymentError::NotFound(format!("payment {reference}")))?;
            let payment = engine.delete(payment, true).await?;
            session.payments.insert(reference, payment);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let directory = InMemoryCustomerDirectory::new();
    let engine = match cli.db_path {
        Some(db_path) => {
            // Persistent storage (RocksDB)
            #[cfg(feature = "storage-rocksdb")]
            {
                let ledger = RocksLedger::open(db_path).into_diagnostic()?;
                PaymentEngine::new(
                    Box::new(ledger.clone()),
                    Box::new(ledger.clone()),
                    Box::new(ledger),
                    Box::new(directory.clone()),
                )
            }
            #[cfg(not(feature = "storage-rocksdb"))]
            {
                let _ = db_path;
                eprintln!(
                    "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
                );
                let ledger = InMemoryLedger::new();
                PaymentEngine::new(
                    Box::new(ledger.clone()),
                    Box::new(ledger.clone()),
                    Box::new(ledger),
                    Box::new(directory.clone()),
                )
            }
        }
        None => {
            // In-memory storage
            let ledger = InMemoryLedger::new();
            PaymentEngine::new(
                Box::new(ledger.clone()),
                Box::new(ledger.clone()),
                Box::new(ledger),
                Box::new(directory.clone()),
            )
        }
    };

    // Run the command file
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let mut session = Session::new();
    for command_result in reader.commands() {
        match command_result {
            Ok(command) => {
                if let Err(e) = run_command(&engine, &directory, &mut session, command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    // Output final state
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    match cli.report {
        Report::Invoices => writer
            .write_invoices(
                session
                    .invoices
                    .iter()
                    .map(|(label, invoice)| (label.as_str(), invoice)),
            )
            .into_diagnostic()?,
        Report::Payments => writer
            .write_payments(session.payments.values())
            .into_diagnostic()?,
    }

    Ok(())
}
