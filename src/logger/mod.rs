//! Activity logging: bounded-channel logger thread writing append-only JSONL.

pub mod activity;
pub mod jsonl;
