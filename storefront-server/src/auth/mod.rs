//! Actor authentication
//!
//! - [`JwtService`] - HS256 token validation
//! - [`CurrentUser`] - authenticated caller, also an axum extractor
//! - [`require_auth`] / [`require_admin`] - route-group middleware

pub mod extractor;
pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, CurrentUser, DEV_JWT_SECRET, JwtConfig, JwtError, JwtService, Role};
pub use middleware::{require_admin, require_auth};
