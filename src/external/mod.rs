pub mod directory;
pub mod holidays;
pub mod leave_balance;
pub mod notify;
