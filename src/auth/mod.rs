pub mod connect;
pub mod session;
