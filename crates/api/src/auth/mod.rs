//! Authentication and authorization

pub mod jwt;
pub mod middleware;
pub mod policy;
pub mod token;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_auth, AuthState, AuthUser};
pub use policy::{authorize, is_allowed, Action};
pub use token::extract_token;
