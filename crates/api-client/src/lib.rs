//! Rate-limited, credential-rotating client for the media platform API
//!
//! Request flow for every call:
//! 1. `RateLimiter::acquire()` waits until the 60s window has room
//! 2. The gateway uses its pinned credential, or selects one from the pool
//! 3. The credential is attached as the `client_id` query parameter
//! 4. 401/403 → credential reported as failed, unpinned, one retry with a
//!    freshly selected credential
//! 5. 2xx → credential reported as successful, JSON payload returned
//!
//! `Resolver` sits on top of the gateway and turns public links into track
//! and playlist metadata and stream URLs.

pub mod constants;
pub mod error;
pub mod gateway;
pub mod rate_limit;
pub mod resolve;

pub use constants::*;
pub use error::{Error, ErrorKind, Result};
pub use gateway::{Gateway, MAX_ATTEMPTS};
pub use rate_limit::{RateLimiter, WINDOW};
pub use resolve::{
    LinkParts, PlaylistInfo, Resolved, Resolver, TrackInfo, Transcoding, parse_link,
    validate_url,
};
