use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{DomainResult, Entity, SchoolId};

use crate::normalize_name;

/// A school: groups students and owns the school-level account statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
    id: SchoolId,
    name: String,
    created_at: DateTime<Utc>,
}

impl School {
    pub fn create(name: &str) -> DomainResult<Self> {
        Ok(Self {
            id: SchoolId::new(),
            name: normalize_name("school", name)?,
            created_at: Utc::now(),
        })
    }

    /// Rehydrate from storage.
    pub fn restore(id: SchoolId, name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            created_at,
        }
    }

    pub fn rename(&mut self, name: &str) -> DomainResult<()> {
        self.name = normalize_name("school", name)?;
        Ok(())
    }

    pub fn id_typed(&self) -> SchoolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for School {
    type Id = SchoolId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bursar_core::DomainError;

    #[test]
    fn create_trims_name() {
        let school = School::create("  Springfield Elementary ").unwrap();
        assert_eq!(school.name(), "Springfield Elementary");
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = School::create("   ").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut school = School::create("Shelbyville High").unwrap();
        assert!(school.rename("").is_err());
        assert_eq!(school.name(), "Shelbyville High");
    }
}
