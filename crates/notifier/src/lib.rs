//! Webhook delivery.
//!
//! - [`HttpWebhookSender`]: HTTP delivery with exponential backoff, per-attempt
//!   timeouts, HMAC-SHA256 signing and caller cancellation
//! - [`LoggingWebhookSender`]: logs instead of sending, for local runs
//!
//! Both implement [`WebhookSender`], the seam the worker dispatches through.

pub mod backoff;
pub mod console;
pub mod http;
pub mod sender;
pub mod signing;

pub use backoff::Backoff;
pub use console::LoggingWebhookSender;
pub use http::HttpWebhookSender;
pub use sender::{DeliveryError, WebhookSender};
