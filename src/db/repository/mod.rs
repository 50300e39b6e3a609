pub mod event;
pub mod push_subscription;
pub mod user;

pub use event::EventRepository;
pub use push_subscription::PushSubscriptionRepository;
pub use user::UserRepository;
