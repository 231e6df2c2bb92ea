use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::OwnerId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
    Viewer,
}

/// The resolved identity behind a bearer token. Every public hub entry
/// point takes this explicitly; there is no ambient "current user".
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, ToSchema)]
pub struct AuthContext {
    pub user: OwnerId,
    pub organization: Option<String>,
    pub role: Role,
}

impl AuthContext {
    pub fn new(user: OwnerId, organization: Option<String>, role: Role) -> Self {
        Self {
            user,
            organization,
            role,
        }
    }

    /// Read access: owners see their own entities, admins see everything.
    pub fn can_read(&self, owner: &OwnerId) -> bool {
        self.user == *owner || matches!(self.role, Role::Admin)
    }

    /// Write access: strictly the owner. Admin visibility does not grant
    /// mutation on someone else's entities.
    pub fn can_write(&self, owner: &OwnerId) -> bool {
        self.user == *owner && !matches!(self.role, Role::Viewer)
    }

    /// Whether this identity may create new entities at all.
    pub fn can_create(&self) -> bool {
        !matches!(self.role, Role::Viewer)
    }
}
