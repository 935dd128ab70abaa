//! Caller identity supplied by the upstream gateway.

use serde::{Deserialize, Serialize};

use crate::error::{CourseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }

    /// Unknown roles are treated as the least privileged one.
    pub fn from_string(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Student
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn student(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Student,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self, action: &str) -> Result<()> {
        if !self.is_admin() {
            return Err(CourseError::forbidden(format!("{} requires the admin role", action)));
        }
        Ok(())
    }

    /// Owner-only operations: the caller must be the user the record belongs to.
    pub fn require_owner(&self, owner_id: &str, action: &str) -> Result<()> {
        if self.user_id != owner_id {
            return Err(CourseError::forbidden(format!(
                "only the owner may {}",
                action
            )));
        }
        Ok(())
    }

    pub fn require_owner_or_admin(&self, owner_id: &str, action: &str) -> Result<()> {
        if self.is_admin() {
            return Ok(());
        }
        self.require_owner(owner_id, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_may_read_but_not_act_as_owner() {
        let admin = Actor::admin("admin-1");
        assert!(admin.require_owner_or_admin("user-1", "read order").is_ok());
        assert!(admin.require_owner("user-1", "confirm deposit").is_err());
    }

    #[test]
    fn students_are_limited_to_their_own_records() {
        let student = Actor::student("user-1");
        assert!(student.require_admin("approve order").is_err());
        assert!(student.require_owner("user-1", "start course").is_ok());
        assert!(student.require_owner_or_admin("user-2", "read order").is_err());
    }

    #[test]
    fn role_parsing_defaults_to_student() {
        assert_eq!(Role::from_string("ADMIN"), Role::Admin);
        assert_eq!(Role::from_string("teacher"), Role::Student);
    }
}
