pub mod auth;
pub mod device;
pub mod jwt;
pub mod middleware;
