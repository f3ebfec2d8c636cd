use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Instructor,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "instructor" => Some(Role::Instructor),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Instructor => "instructor",
            Role::Student => "student",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

/// Authorization outcome carrying the wire error code. Callers map this
/// straight onto an error response.
#[derive(Debug, Clone)]
pub struct AccessError {
    pub code: &'static str,
    pub message: String,
}

impl AccessError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// Resolves a caller-supplied user id to a known identity. The daemon never
/// authenticates; it only authorizes from the id/role it is given.
pub fn resolve_actor(conn: &Connection, user_id: &str) -> Result<Actor, AccessError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, role FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(AccessError::db)?;

    let Some((id, role)) = row else {
        return Err(AccessError::new("not_found", "user not found"));
    };
    let Some(role) = Role::parse(&role) else {
        return Err(AccessError::new(
            "db_query_failed",
            format!("unknown role '{}' for user {}", role, id),
        ));
    };
    Ok(Actor { id, role })
}

pub fn course_instructor(conn: &Connection, course_id: &str) -> Result<String, AccessError> {
    let instructor: Option<String> = conn
        .query_row(
            "SELECT instructor_id FROM courses WHERE id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(AccessError::db)?;

    instructor.ok_or_else(|| AccessError::new("not_found", "course not found"))
}

pub fn is_enrolled(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<bool, AccessError> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE course_id = ? AND student_id = ?",
        (course_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(AccessError::db)
}

/// Granted if the user owns the course or is enrolled in it.
pub fn check_course_access(
    conn: &Connection,
    course_id: &str,
    user_id: &str,
) -> Result<(), AccessError> {
    if course_instructor(conn, course_id)? == user_id {
        return Ok(());
    }
    if is_enrolled(conn, course_id, user_id)? {
        return Ok(());
    }
    Err(AccessError::new(
        "forbidden",
        "you don't have access to this course",
    ))
}

/// Granted only on an enrollment row. Instructors are never enrolled, so
/// this deliberately denies them: they have no "progress" as a student.
pub fn ensure_enrolled(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<(), AccessError> {
    if is_enrolled(conn, course_id, student_id)? {
        Ok(())
    } else {
        Err(AccessError::new(
            "forbidden",
            "you are not enrolled in this course",
        ))
    }
}
