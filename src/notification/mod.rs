pub mod dispatcher;

pub use dispatcher::NotificationDispatcher;
