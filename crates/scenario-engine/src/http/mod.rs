//! HTTP flavour of the step converter.
//!
//! [`HttpStepConverter`] turns Visit/Click/Reload/Follow steps into
//! [`HttpRequest`]s. The engine never sends them; the caller does.

mod converter;
mod types;

pub use converter::{HttpStepConverter, DEFAULT_STRIP_HEADERS};
pub use types::{HttpRequest, HttpResponse};
