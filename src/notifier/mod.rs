//! Turns an inbound alert group into an outbound robot notification and
//! delivers it.
//!
//! `builder` renders the title and text for one target; `dispatcher` signs
//! the request when the target has a secret, posts it and interprets the
//! robot's acknowledgment.

pub mod builder;
pub mod dispatcher;

pub use builder::{BuildError, Mention, NotificationBuilder, RenderedNotification};
pub use dispatcher::{sign, signed_url, Dispatch, DispatchError, SignedDispatcher};
