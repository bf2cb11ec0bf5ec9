//! SQLite-backed persistence for strategies and everything they own.
//!
//! - `models` defines the stored types and their status enums
//! - `db` wraps a single `rusqlite` connection with migrations and all
//!   queries, plus an async `DbHandle` for use from request handlers

pub mod db;
pub mod models;

pub use db::{DbHandle, StrategyDb};
