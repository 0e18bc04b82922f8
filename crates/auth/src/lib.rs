//! `bursar-auth`: bearer tokens, roles and operator credentials.
//!
//! Decoupled from HTTP and storage; the API layer extracts the bearer token
//! and asks this crate who the caller is and what they may do.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod password;
pub mod roles;
pub mod user;

pub use authorize::{AuthzError, Principal, require_role};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256Jwt, JwtValidator, TokenError};
pub use password::PasswordHash;
pub use roles::Role;
pub use user::{AuthError, User, UserDirectory, UserId};
