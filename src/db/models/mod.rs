//! Database models split into separate files.

pub mod event;
pub mod push_subscription;
pub mod user;

pub use self::event::*;
pub use self::push_subscription::*;
pub use self::user::*;
