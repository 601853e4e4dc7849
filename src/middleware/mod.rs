pub mod auth;

pub use auth::{extract_token, resolve_identity, AnonymousPolicy, JwtVerifier, TokenVerifier};
