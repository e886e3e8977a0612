//! Role and ownership rules shared by the HTTP handlers.
//!
//! Admins may do anything. Teachers publish only inside their assigned subject
//! and edit only what they authored. Students read.

use serde::Serialize;

use crate::db::{Content, Role, User};

/// The authenticated caller, as loaded from the database for this request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub assigned_subject_id: Option<i64>,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            assigned_subject_id: user.assigned_subject_id,
        }
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied(pub &'static str);

pub fn require_admin(user: &AuthUser) -> Result<(), Denied> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(Denied("admin role required"))
    }
}

pub fn require_author(user: &AuthUser) -> Result<(), Denied> {
    match user.role {
        Role::Admin | Role::Teacher => Ok(()),
        Role::Student => Err(Denied("students cannot publish content")),
    }
}

/// Decides the subject a new post lands in. Teachers default to, and are
/// confined to, their assigned subject.
pub fn subject_for_new_content(
    user: &AuthUser,
    requested: Option<i64>,
) -> Result<Option<i64>, Denied> {
    require_author(user)?;
    if user.is_admin() {
        return Ok(requested);
    }

    let assigned = user
        .assigned_subject_id
        .ok_or(Denied("teachers need an assigned subject to publish"))?;
    match requested {
        None => Ok(Some(assigned)),
        Some(subject) if subject == assigned => Ok(Some(subject)),
        Some(_) => Err(Denied(
            "teachers may only publish in their assigned subject",
        )),
    }
}

pub fn can_edit_content(user: &AuthUser, content: &Content) -> Result<(), Denied> {
    match user.role {
        Role::Admin => Ok(()),
        Role::Teacher if content.author_id == Some(user.id) => Ok(()),
        Role::Teacher => Err(Denied("you can only modify your own content")),
        Role::Student => Err(Denied("students cannot modify content")),
    }
}

pub fn can_move_content(user: &AuthUser, target_subject: Option<i64>) -> Result<(), Denied> {
    if user.is_admin() {
        return Ok(());
    }
    match (user.assigned_subject_id, target_subject) {
        (Some(assigned), Some(target)) if assigned == target => Ok(()),
        _ => Err(Denied(
            "teachers may only publish in their assigned subject",
        )),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use test_case::test_case;

    use super::*;
    use crate::db::ContentType;

    fn user(id: i64, role: Role, subject: Option<i64>) -> AuthUser {
        AuthUser {
            id,
            username: format!("user{id}"),
            role,
            assigned_subject_id: subject,
        }
    }

    fn post(author_id: Option<i64>, subject_id: Option<i64>) -> Content {
        Content {
            id: 1,
            title: "Homework".to_string(),
            body: String::new(),
            kind: ContentType::Preparation,
            subject_id,
            subject_name: None,
            author_id,
            author_username: None,
            media_urls: Vec::new(),
            files: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test_case(Role::Admin, true)]
    #[test_case(Role::Teacher, false)]
    #[test_case(Role::Student, false)]
    fn only_admins_pass_require_admin(role: Role, allowed: bool) {
        assert_eq!(require_admin(&user(1, role, None)).is_ok(), allowed);
    }

    #[test]
    fn admin_publishes_anywhere() {
        let admin = user(1, Role::Admin, None);
        assert_eq!(subject_for_new_content(&admin, Some(9)), Ok(Some(9)));
        assert_eq!(subject_for_new_content(&admin, None), Ok(None));
    }

    #[test]
    fn teacher_defaults_to_assigned_subject() {
        let teacher = user(2, Role::Teacher, Some(4));
        assert_eq!(subject_for_new_content(&teacher, None), Ok(Some(4)));
        assert_eq!(subject_for_new_content(&teacher, Some(4)), Ok(Some(4)));
        assert!(subject_for_new_content(&teacher, Some(5)).is_err());
    }

    #[test]
    fn unassigned_teacher_cannot_publish() {
        let teacher = user(2, Role::Teacher, None);
        assert_eq!(
            subject_for_new_content(&teacher, None),
            Err(Denied("teachers need an assigned subject to publish"))
        );
    }

    #[test]
    fn student_cannot_publish() {
        let student = user(3, Role::Student, Some(4));
        assert!(subject_for_new_content(&student, Some(4)).is_err());
    }

    #[test]
    fn teacher_edits_only_own_content() {
        let teacher = user(2, Role::Teacher, Some(4));
        assert!(can_edit_content(&teacher, &post(Some(2), Some(4))).is_ok());
        assert!(can_edit_content(&teacher, &post(Some(3), Some(4))).is_err());
        assert!(can_edit_content(&teacher, &post(None, Some(4))).is_err());
        assert!(can_edit_content(&user(1, Role::Admin, None), &post(None, None)).is_ok());
    }

    #[test]
    fn teacher_cannot_move_content_out_of_subject() {
        let teacher = user(2, Role::Teacher, Some(4));
        assert!(can_move_content(&teacher, Some(4)).is_ok());
        assert!(can_move_content(&teacher, Some(5)).is_err());
        assert!(can_move_content(&teacher, None).is_err());
        assert!(can_move_content(&user(1, Role::Admin, None), None).is_ok());
    }
}
