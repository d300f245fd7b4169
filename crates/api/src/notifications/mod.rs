//! Notification Fan-out
//!
//! Persists notifications and pushes them, with a refreshed unread count, to
//! the recipient's user channel.

mod fanout;

pub use fanout::NotificationService;
