pub mod fix;
pub mod message;
pub mod session;
