pub mod balance;
pub mod orders;

pub use balance::BalanceService;
pub use orders::{OrderService, SubmitOutcome};
