//! Request and response bodies of the HTTP API.

pub mod courses;
pub mod enrollments;
pub mod payment_methods;
pub mod transactions;
pub mod users;
pub mod vouchers;
pub mod wallets;
pub mod withdrawals;
