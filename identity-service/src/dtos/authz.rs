use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckAccessRequest {
    #[validate(length(min = 1, message = "Session token is required"))]
    #[schema(example = "eyJhbGciOiJIUzI1NiJ9...")]
    pub token: String,

    #[validate(length(min = 1, message = "Action is required"))]
    #[schema(example = "read")]
    pub action: String,

    #[validate(length(min = 1, message = "Resource is required"))]
    #[schema(example = "users")]
    pub resource: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserPermissionsResponse {
    pub user_id: Uuid,
    #[schema(example = json!(["users:read", "roles:*"]))]
    pub permissions: Vec<String>,
}
