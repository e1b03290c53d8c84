//! Core domain model for the payment ledger.
//!
//! Everything here is persistence-agnostic: entities, value objects, and the
//! ports the application layer drives.

pub mod invoice;
pub mod money;
pub mod payment;
pub mod ports;
pub mod transaction;
