pub mod daily;
pub mod punch;
pub mod request;
pub mod role;
pub mod shift;
