//! Database record models.
//!
//! Request structs (`*CreateDBRequest`, `*UpdateDBRequest`) carry validated input into the
//! repositories in [`crate::db::handlers`]; response structs (`*DBResponse`) mirror table rows
//! and are converted into API models with `From` impls.

pub mod courses;
pub mod enrollments;
pub mod ledger;
pub mod payment_methods;
pub mod tokens;
pub mod transactions;
pub mod users;
pub mod vouchers;
pub mod wallets;
