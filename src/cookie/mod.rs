//! Cookie storage and `Set-Cookie` parsing.
//!
//! The jar mirrors what a browser would hold for the gated service: named
//! cookies with optional expiry, last write wins per name, and a refresh
//! margin that treats nearly-expired cookies as already gone.

mod jar;

pub use jar::{Cookie, CookieJar};
