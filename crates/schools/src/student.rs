use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bursar_core::{DomainResult, Entity, SchoolId, StudentId};

use crate::normalize_name;

/// A student enrolled at exactly one school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    id: StudentId,
    school_id: SchoolId,
    name: String,
    created_at: DateTime<Utc>,
}

impl Student {
    pub fn enroll(name: &str, school_id: SchoolId) -> DomainResult<Self> {
        Ok(Self {
            id: StudentId::new(),
            school_id,
            name: normalize_name("student", name)?,
            created_at: Utc::now(),
        })
    }

    /// Rehydrate from storage.
    pub fn restore(
        id: StudentId,
        school_id: SchoolId,
        name: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            school_id,
            name,
            created_at,
        }
    }

    pub fn rename(&mut self, name: &str) -> DomainResult<()> {
        self.name = normalize_name("student", name)?;
        Ok(())
    }

    pub fn id_typed(&self) -> StudentId {
        self.id
    }

    pub fn school_id(&self) -> SchoolId {
        self.school_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for Student {
    type Id = StudentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_links_student_to_school() {
        let school_id = SchoolId::new();
        let mut student = Student::enroll("Bart", school_id).unwrap();
        assert_eq!(student.school_id(), school_id);

        student.rename(" Lisa ").unwrap();
        assert_eq!(student.name(), "Lisa");
    }
}
