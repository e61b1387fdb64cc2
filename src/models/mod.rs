//! Wire data models

mod frame;
mod message;
mod user;

pub use frame::*;
pub use message::*;
pub use user::*;
