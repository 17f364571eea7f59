pub mod credential;
pub mod one_time_token;
pub mod role;
pub mod user;

pub use credential::Credential;
pub use one_time_token::{OneTimeToken, TokenPurpose};
pub use role::{Role, TENANT_ADMIN_ROLE};
pub use user::{User, UserResponse, UserStatus};
