//! Persistence: PostgreSQL repositories over a borrowed connection.
//!
//! Every repository takes `&mut PgConnection`, so the same code runs against a pooled
//! connection or inside a caller-owned transaction. Multi-step writes open their own
//! transaction with `begin()`, which nests as a savepoint when the caller already holds one.

pub mod embedded;
pub mod errors;
pub mod handlers;
pub mod models;
