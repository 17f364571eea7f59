//! HTTP handlers for the identity service.

pub mod auth;
pub mod authz;
pub mod metrics;
pub mod role;
pub mod user;

pub use auth::*;
pub use authz::*;
pub use role::*;
pub use user::*;
