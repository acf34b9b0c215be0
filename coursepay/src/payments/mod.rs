//! Course commerce: pricing, the invoice gateway, checkout and payment reconciliation.

pub mod checkout;
pub mod gateway;
pub mod pricing;
pub mod reconcile;
