pub mod courses;
pub mod enrollments;
pub mod ledger;
pub mod payment_methods;
pub mod repository;
pub mod tokens;
pub mod transactions;
pub mod users;
pub mod vouchers;
pub mod wallets;

pub use courses::Courses;
pub use enrollments::Enrollments;
pub use ledger::Ledger;
pub use payment_methods::PaymentMethods;
pub use repository::Repository;
pub use tokens::Tokens;
pub use transactions::Transactions;
pub use users::Users;
pub use vouchers::Vouchers;
pub use wallets::Wallets;
