//! User entity: students, lecturers and administrators

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single role every account carries
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[sea_orm(string_value = "student")]
    Student,

    #[sea_orm(string_value = "lecturer")]
    Lecturer,

    #[sea_orm(string_value = "admin")]
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Lecturer => "lecturer",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_student(&self) -> bool {
        matches!(self, UserRole::Student)
    }

    pub fn is_lecturer(&self) -> bool {
        matches!(self, UserRole::Lecturer)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    /// Login identifier, unique across all roles
    #[sea_orm(column_type = "Text", unique)]
    pub email: String,

    /// Institutional ID (NIM for students, NIP for staff), unique across all roles
    #[sea_orm(column_type = "Text", unique)]
    pub nim_nip: String,

    pub role: UserRole,

    #[sea_orm(column_type = "Text", nullable)]
    pub phone: Option<String>,

    /// Argon2 PHC string
    #[sea_orm(column_type = "Text")]
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_student(&self) -> bool {
        self.role.is_student()
    }

    pub fn is_lecturer(&self) -> bool {
        self.role.is_lecturer()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::access_token::Entity")]
    AccessTokens,
}

impl Related<super::access_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccessTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_predicates() {
        assert!(UserRole::Student.is_student());
        assert!(!UserRole::Student.is_admin());
        assert!(UserRole::Lecturer.is_lecturer());
        assert!(UserRole::Admin.is_admin());
        assert_eq!(UserRole::Lecturer.to_string(), "lecturer");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let now = chrono::Utc::now().fixed_offset();
        let user = Model {
            id: Uuid::new_v4(),
            name: "Andi Pratama".into(),
            email: "andi@student.example.com".into(),
            nim_nip: "2021110001".into(),
            role: UserRole::Student,
            phone: None,
            password_hash: "$argon2id$secret".into(),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "student");
    }
}
