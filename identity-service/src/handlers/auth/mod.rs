pub mod onboarding;
pub mod password;
pub mod session;

pub use onboarding::{register_invited, request_email_verification, set_initial_password, verify_email};
pub use password::{change_password, confirm_password, forgot_password, reset_password};
pub use session::{login, logout, refresh, validate};
