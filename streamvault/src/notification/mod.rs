//! Notifications to external endpoints.

pub mod channels;
pub mod message;
pub mod service;

pub use channels::{NotificationSink, SinkAddress, build_sink, parse_sink_address};
pub use message::{Notification, render};
pub use service::{NotificationDispatcher, NotificationTarget};
