//! Operator accounts and credential checks.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{PasswordHash, Role};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("a user with email '{0}' already exists")]
    DuplicateUser(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("user directory unavailable")]
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    email: String,
    password_hash: PasswordHash,
    role: Role,
    created_at: DateTime<Utc>,
}

impl User {
    pub fn create(email: &str, password: &str, role: Role) -> Result<Self, AuthError> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation(format!("'{email}' is not an email address")));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("password must not be empty".into()));
        }
        Ok(Self {
            id: UserId::new(),
            email,
            password_hash: PasswordHash::new(password),
            role,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// In-process user store keyed by normalized email.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) -> Result<(), AuthError> {
        let mut users = self.users.write().map_err(|_| AuthError::Unavailable)?;
        if users.contains_key(user.email()) {
            return Err(AuthError::DuplicateUser(user.email().to_string()));
        }
        users.insert(user.email().to_string(), user);
        Ok(())
    }

    /// Look up `email` and check `password`; unknown users and wrong passwords
    /// are indistinguishable to the caller.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let users = self.users.read().map_err(|_| AuthError::Unavailable)?;
        match users.get(&normalize_email(email)) {
            Some(user) if user.password_hash.verify(password) => Ok(user.clone()),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticates_case_insensitively_by_email() {
        let dir = UserDirectory::new();
        dir.insert(User::create("Admin@School.test", "s3cret", Role::Admin).unwrap())
            .unwrap();

        let user = dir.authenticate("  admin@school.TEST", "s3cret").unwrap();
        assert_eq!(user.email(), "admin@school.test");
        assert_eq!(user.role(), Role::Admin);
    }

    #[test]
    fn wrong_password_and_unknown_user_look_the_same() {
        let dir = UserDirectory::new();
        dir.insert(User::create("a@school.test", "right", Role::Student).unwrap())
            .unwrap();
        assert!(matches!(
            dir.authenticate("a@school.test", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            dir.authenticate("b@school.test", "right"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn duplicate_emails_are_rejected() {
        let dir = UserDirectory::new();
        dir.insert(User::create("a@school.test", "x", Role::Admin).unwrap())
            .unwrap();
        let err = dir
            .insert(User::create("A@school.test", "y", Role::School).unwrap())
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUser(_)));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn malformed_accounts_are_rejected() {
        assert!(matches!(
            User::create("not-an-email", "pw", Role::Admin),
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            User::create("a@school.test", "", Role::Admin),
            Err(AuthError::Validation(_))
        ));
    }
}
