//! Inbound and outbound adapters: the CSV command format and reports.

pub mod csv;
