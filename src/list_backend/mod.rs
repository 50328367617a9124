//! List backend adapter (spec §4.5, C5): the remote REST/OData side of the
//! bridge. `http` is the production adapter; `odata` holds its wire shapes;
//! `token_cache` is the shared single-flight OAuth2 token cache.

mod http;
mod odata;
mod token_cache;

pub use http::HttpListBackend;
pub use token_cache::TokenCache;
