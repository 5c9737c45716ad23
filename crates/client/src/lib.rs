//! Questline Game-Server Client
//!
//! The request layer between the delivery core and the remote game
//! engine. Wraps the three logical operations (authenticate, fetch
//! level state, submit answer) with:
//!
//! - per-domain request pacing ([`RateLimiter`], 1200 ms between starts)
//! - a process-wide 30 s level cache ([`LevelCache`])
//! - single-flight re-authentication ([`AuthCoordinator`])
//! - a double level read around every answer post, so an answer is
//!   never delivered to a level the player has already left
//!
//! The HTTP seam is the [`Transport`] trait; production uses
//! [`HttpTransport`] (reqwest), tests substitute scripted transports.

pub mod auth;
pub mod cache;
pub mod client;
pub mod protocol;
pub mod rate_limit;
pub mod transport;

pub use auth::{AuthCoordinator, AuthKey};
pub use cache::{CachedLevel, LevelCache, LEVEL_CACHE_TTL_MS};
pub use client::GameClient;
pub use rate_limit::{RateLimiter, MIN_REQUEST_GAP};
pub use transport::{HttpTransport, RawResponse, Transport};
