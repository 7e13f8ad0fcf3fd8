//! HTTP layer for the remote auth API.
//!
//! This module provides the `Transport` seam (with a `reqwest`
//! implementation), the `ApiClient` that speaks the `/auth/*` endpoints,
//! and the `ApiError` type every HTTP failure is mapped to.
//!
//! Authenticated endpoints take the bearer token explicitly; attaching the
//! current session token and refreshing it is the job of `auth`.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ApiClient, LoginResponse, ProfileResponse, RefreshResponse, RetryPolicy};
pub use error::{ApiError, ErrorBody, FieldErrors};
pub use transport::{ApiRequest, HttpResponse, ReqwestTransport, Transport};
