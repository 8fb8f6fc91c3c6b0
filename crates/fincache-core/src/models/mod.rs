//! Data models exchanged with the host platform and the foreground.
//!
//! This module contains:
//!
//! - `Request`, `RequestMode`: intercepted request identity
//! - `Response`: stored/returned response snapshot, incl. the synthesized 503
//! - `Envelope`, `Command`, `CacheStatus`, `ServerMessage`: foreground messaging
//! - `Notification`: push notification description

pub mod message;
pub mod notification;
pub mod request;
pub mod response;

pub use message::{CacheStatus, Command, Envelope, ServerMessage, StatusReply};
pub use notification::{Notification, NotificationAction};
pub use request::{Request, RequestMode};
pub use response::Response;
