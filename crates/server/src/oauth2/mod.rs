//! OAuth2 Authorization Server protocol engine.
//!
//! ## Supported Flows
//!
//! - Authorization Code, with optional PKCE
//! - Implicit (`response_type=token`)
//!
//! Direct grants are denied by default and refresh tokens are never issued.
//!
//! ## Endpoints (relative to the API prefix)
//!
//! - `GET|POST /authorize` - Authorization endpoint
//! - `POST /token` - Token endpoint
//! - `GET /info` - Token information

pub mod endpoints;
pub mod pkce;
pub mod request;
pub mod server;
pub mod storage;

pub use endpoints::router;
pub use server::{OAuthServer, ServerConfig};
pub use storage::RegistryStorage;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
