//! Authentication: end-user JWT sessions, password hashing, and opaque
//! admin bearer tokens (spec section 6).

pub mod admin_token;
pub mod jwt;
pub mod password;

pub use admin_token::AdminTokenIssuer;
pub use jwt::{Claims, JwtIssuer};
pub use password::{hash_password, verify_password};

/// The fixed response body for signup and password-reset requests,
/// returned whether or not the email is registered, so the endpoint
/// cannot be used to enumerate accounts (spec section 6).
pub const GENERIC_ACCOUNT_RESPONSE: &str = "if an account exists for this email, instructions have been sent";
