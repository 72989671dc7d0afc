//! Stratus: an HTTP caching edge gateway. Requests are routed through a
//! URL-pattern router to local handlers or upstream origins, and answered
//! from a byte-budgeted in-memory cache with a stale-while-revalidate
//! freshness policy and content-encoding negotiation.

pub mod cache;
pub mod codec;
pub mod config;
pub mod cors;
pub mod errors;
pub mod keys;
pub mod mem;
pub mod memo;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod router;
pub mod server;
pub mod swr;
pub mod telemetry;

pub use cache::entry::{CachedEntry, HeaderList};
pub use cache::store::{CacheConfig, CacheStore};
pub use codec::{Encoding, EncodingPolicy};
pub use errors::GatewayError;
pub use pipeline::Gateway;
pub use router::{GatewayRequest, Handler, HandlerResult, Params, RouteSpec, Router};
pub use swr::{CacheStatus, SwrEngine};
