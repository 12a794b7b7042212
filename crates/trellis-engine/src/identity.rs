//! The identity collaborator: who is acting, and may they edit.

use std::collections::HashSet;

use async_trait::async_trait;

use trellis_core::{Document, OrganizationId, User, UserId};

/// Authentication and authorization decisions made outside the engine.
#[async_trait]
pub trait Identity: Send + Sync {
    /// The user on whose behalf the engine is acting, if any.
    async fn current_user(&self) -> Option<User>;

    async fn organization_of(&self, user: UserId) -> Option<OrganizationId>;

    /// Yes/no capability to edit the document's structure.
    async fn may_edit(&self, user: &User, document: &Document) -> bool;
}

/// Fixed identity for CLIs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    current: Option<User>,
    users: Vec<User>,
    denied: HashSet<UserId>,
}

impl StaticIdentity {
    /// No current user; every known user may edit.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(current: User) -> Self {
        Self {
            users: vec![current.clone()],
            current: Some(current),
            denied: HashSet::new(),
        }
    }

    /// Make another user known, e.g. for `organization_of` lookups.
    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Refuse edits by this user.
    pub fn deny(mut self, user: UserId) -> Self {
        self.denied.insert(user);
        self
    }
}

#[async_trait]
impl Identity for StaticIdentity {
    async fn current_user(&self) -> Option<User> {
        self.current.clone()
    }

    async fn organization_of(&self, user: UserId) -> Option<OrganizationId> {
        self.users
            .iter()
            .find(|u| u.id == user)
            .and_then(|u| u.organization)
    }

    async fn may_edit(&self, user: &User, _document: &Document) -> bool {
        !self.denied.contains(&user.id)
    }
}
