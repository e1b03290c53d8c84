use apportion::application::engine::PaymentEngine;
use apportion::domain::invoice::Invoice;
use apportion::domain::money::Money;
use apportion::domain::payment::{CustomerKey, Payment, PaymentMethod};
use apportion::infrastructure::in_memory::{InMemoryCustomerDirectory, InMemoryLedger};
use rust_decimal::Decimal;
use uuid::Uuid;

pub struct Harness {
    pub engine: PaymentEngine,
    pub ledger: InMemoryLedger,
    pub customer: CustomerKey,
}

/// Engine wired to a shared in-memory ledger with one registered customer.
pub async fn harness() -> Harness {
    let ledger = InMemoryLedger::new();
    let directory = InMemoryCustomerDirectory::new();
    let customer = Uuid::new_v4();
    directory.register(customer).await;
    let engine = PaymentEngine::new(
        Box::new(ledger.clone()),
        Box::new(ledger.clone()),
        Box::new(ledger.clone()),
        Box::new(directory),
    );
    Harness {
        engine,
        ledger,
        customer,
    }
}

pub async fn card_payment(h: &Harness, reference: &str, amount: Decimal) -> Payment {
    h.engine
        .create_payment(
            h.customer,
            Uuid::new_v4(),
            PaymentMethod::CreditCard,
            "credit card",
            reference,
            amount,
        )
        .await
        .unwrap()
}

pub fn invoice(due: Decimal) -> Invoice {
    Invoice::new(Money::new(due))
}
