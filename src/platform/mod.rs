pub mod auth;
pub mod client;
pub mod endpoints;
pub mod envelope;
pub mod pager;
pub mod types;

pub use auth::{AuthProvider, StaticToken, TokenCell};
pub use client::{ListingApi, PlatformClient};
pub use endpoints::Endpoint;
pub use pager::{PageWalk, Pager};
