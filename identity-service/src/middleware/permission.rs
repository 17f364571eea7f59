use service_core::error::AppError;

use crate::{middleware::AuthUser, AppState};

/// Requires the caller to hold `resource:action`, directly or by wildcard.
///
/// Goes through the permission evaluator, so a configured policy engine has
/// the final say.
pub async fn require_permission(
    state: &AppState,
    user: &AuthUser,
    resource: &str,
    action: &str,
) -> Result<(), AppError> {
    let decision = state.authz.decide(&user.0, action, resource).await?;

    if !decision.allowed {
        tracing::warn!(
            user_id = %user.0.user_id,
            tenant_id = %user.0.tenant_id,
            resource,
            action,
            reason = %decision.reason,
            "Permission denied"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Missing permission {}:{}",
            resource,
            action
        )));
    }

    Ok(())
}
