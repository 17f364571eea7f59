//! Services layer for identity-service.
//!
//! Business logic for authentication, one-time token lifecycle,
//! authorization and tenant onboarding. Storage, messaging and the policy
//! engine are reached through the traits in [`store`], [`crate::events`]
//! and [`policy`].

pub mod authn;
pub mod authz;
pub mod choreographer;
pub mod credentials;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod policy;
pub mod roles;
mod session;
pub mod store;
mod token_codec;
pub mod users;

pub use authn::{AuthnService, LoginOutcome};
pub use authz::{AccessDecision, PermissionEvaluator};
pub use choreographer::{Choreographer, OnboardingStage};
pub use credentials::{CredentialLifecycle, RedeemIntent};
pub use error::ServiceError;
pub use policy::{OpaPolicyEngine, PolicyEngine};
pub use roles::{RoleChanges, RoleService};
pub use session::{SessionClaims, SessionIssuer, TokenResponse, TokenUse};
pub use token_codec::{GeneratedToken, TokenCodec, TokenDigest};
pub use users::{UserChanges, UserService};
