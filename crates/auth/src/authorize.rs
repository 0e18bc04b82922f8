use thiserror::Error;

use crate::{JwtClaims, Role};

/// Authenticated caller, as established from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
}

impl From<JwtClaims> for Principal {
    fn from(claims: JwtClaims) -> Self {
        Self {
            subject: claims.sub,
            role: claims.role,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("role '{actual}' may not perform this operation (requires '{required}')")]
    Forbidden { required: Role, actual: Role },
}

pub fn require_role(principal: &Principal, required: Role) -> Result<(), AuthzError> {
    if principal.role == required {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            required,
            actual: principal.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_required_role_passes() {
        let admin = Principal {
            subject: "a@school.test".into(),
            role: Role::Admin,
        };
        let student = Principal {
            subject: "s@school.test".into(),
            role: Role::Student,
        };
        assert_eq!(require_role(&admin, Role::Admin), Ok(()));
        assert_eq!(
            require_role(&student, Role::Admin),
            Err(AuthzError::Forbidden {
                required: Role::Admin,
                actual: Role::Student
            })
        );
    }
}
