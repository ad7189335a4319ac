//! Thin HTTP/SSE adapter (§6 "HTTP/REST layer... referenced only through
//! the contracts it must satisfy"). No business logic lives here beyond
//! deserializing requests, calling into [`govrail_runtime::GovrailRuntime`],
//! and serializing the result.

mod http;

pub use http::{app_router, serve, AppState};
