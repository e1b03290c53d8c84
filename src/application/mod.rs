//! Application layer containing the core business logic orchestration.
//!
//! This module defines the `PaymentEngine`, the primary entry point for
//! allocating payments against invoices, and the allocation strategies it
//! drives. The engine owns the storage ports and enforces the ledger
//! invariants regardless of which strategy computed an allocation.

pub mod engine;
pub mod strategy;
