//! HTTP handlers, one module per resource. Every handler is annotated with `#[utoipa::path]`
//! and listed in [`crate::openapi::ApiDoc`].

pub mod courses;
pub mod enrollments;
pub mod payment_methods;
pub mod transactions;
pub mod users;
pub mod vouchers;
pub mod wallets;
pub mod withdrawals;
