//! Authentication (bearer JWTs) and role-based authorization.

pub mod current_user;
pub mod permissions;
pub mod session;
