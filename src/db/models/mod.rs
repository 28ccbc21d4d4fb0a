//! Database models split into domain-specific modules.

pub mod order;
pub mod user;

pub use order::*;
pub use user::*;
