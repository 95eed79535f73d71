//! HTTP API layer for mediashelf.
//!
//! - **Endpoints**: following, users, notifications, one-time codes
//! - **Extractors**: bearer-token authentication
//! - **Stream**: notification delivery over Server-Sent Events
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod stream;

pub use endpoints::router;
pub use middleware::{AppState, auth_middleware};
pub use stream::{DeliveryEvent, NotificationPoller, delivery_stream};
