//! Back-office role assignments

use serde::{Deserialize, Serialize};

use super::row::{require_non_empty, Record, RowId, TableRecord};
use crate::error::RemoteResult;

/// Role that grants every permission
pub const ADMIN_ROLE: &str = "admin";

/// One role held by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    /// Row identifier
    pub id: RowId,

    /// User holding the role
    pub user_id: String,

    /// Role name, e.g. `admin`, `pharmacist`
    pub role: String,
}

impl UserRole {
    /// Whether this assignment satisfies a required role
    pub fn grants(&self, required: &str) -> bool {
        self.role == ADMIN_ROLE || self.role == required
    }
}

impl Record for UserRole {
    fn id(&self) -> &RowId {
        &self.id
    }

    fn validate(&self) -> RemoteResult<()> {
        require_non_empty("user_id", &self.user_id)?;
        require_non_empty("role", &self.role)
    }
}

impl TableRecord for UserRole {
    const TABLE: &'static str = "user_roles";
}
