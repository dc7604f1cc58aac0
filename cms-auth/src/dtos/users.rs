use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RoleChangeRequest {
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
}
