//! Credential validation backed by signed tokens.

pub mod jwt;

pub use jwt::{IssuedToken, JwtCredentialValidator};
