pub mod events;
pub mod notification;
pub mod ops;
pub mod skin;
pub mod watch;
