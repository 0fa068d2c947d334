//! # Cache Proxy
//!
//! Local HTTP server between the player and the origin.
//!
//! ```text
//! player ──GET /stream/{session}──> CacheProxyServer
//!                                     │
//!                                     ├──> CacheStore (cached sub-ranges)
//!                                     ├──> FetchRegistry (one fetch per gap)
//!                                     └──> OriginClient ──> HttpClient ──> origin
//! ```
//!
//! Only one session is live at a time. Starting a new session refuses
//! requests for the old one with `410 Gone` and ends its open responses.

pub mod coalesce;
pub mod origin;
pub mod range;
pub mod server;

pub use coalesce::{Claim, FetchProgress, FetchRegistry};
pub use origin::{OriginClient, OriginInfo};
pub use range::{parse_range_header, RangeRequest};
pub use server::{cache_key, CacheProxyServer, ProxyConfig, ProxySession};
