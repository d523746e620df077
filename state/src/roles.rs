//! Back-office role checks

use std::sync::Arc;

use log::warn;
use onemedi_core::models::UserRole;
use onemedi_core::{IdentityProvider, RemoteError, RemoteResult, SharedBackend, TableClient, TypedTable};

/// Checks the signed-in user's roles against the `user_roles` table
#[derive(Clone)]
pub struct RoleGuard {
    roles: TypedTable<UserRole>,
    identity: Arc<dyn IdentityProvider>,
}

impl RoleGuard {
    /// Role guard over `backend`
    pub fn new(backend: SharedBackend, identity: Arc<dyn IdentityProvider>) -> Self {
        RoleGuard {
            roles: TableClient::typed::<UserRole>(backend),
            identity,
        }
    }

    /// Role assignments of the signed-in user
    pub async fn roles(&self) -> RemoteResult<Vec<UserRole>> {
        let user_id = self.identity.require_user()?;
        let query = self.roles.query().filter_eq("user_id", user_id);
        self.roles.get_all(&query).await
    }

    /// Whether the signed-in user holds `role`; admins hold every role
    pub async fn has_role(&self, role: &str) -> RemoteResult<bool> {
        Ok(self.roles().await?.iter().any(|assignment| assignment.grants(role)))
    }

    /// Fail unless the signed-in user holds `role`
    pub async fn require(&self, role: &str) -> RemoteResult<()> {
        if self.has_role(role).await? {
            return Ok(());
        }
        warn!("Access requiring role '{}' denied", role);
        Err(RemoteError::Rejected {
            status: Some(403),
            message: format!("Permission denied: the '{}' role is required", role),
        })
    }
}
