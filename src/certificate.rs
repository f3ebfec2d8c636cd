use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::progress::{self, CalcError};

pub const COMPLETION_THRESHOLD: f64 = 90.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub course_id: String,
    pub student_id: String,
    pub certificate_number: String,
    pub score: f64,
    pub issued_at: String,
}

pub fn find_certificate(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Option<Certificate>, CalcError> {
    conn.query_row(
        "SELECT id, course_id, student_id, certificate_number, score, issued_at
         FROM certificates WHERE course_id = ? AND student_id = ?",
        (course_id, student_id),
        |r| {
            Ok(Certificate {
                id: r.get(0)?,
                course_id: r.get(1)?,
                student_id: r.get(2)?,
                certificate_number: r.get(3)?,
                score: r.get(4)?,
                issued_at: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

fn new_certificate_number() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("CERT-{}", hex[..12].to_ascii_uppercase())
}

/// Issues a certificate once overall course progress crosses the threshold.
/// Idempotent: an existing certificate is returned unchanged, its score
/// frozen at the progress recorded when it was first issued. A concurrent
/// issuer losing the insert race falls back to the winner's row via the
/// (course, student) uniqueness constraint.
pub fn issue_if_completed(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Option<Certificate>, CalcError> {
    let overall = progress::course_progress(conn, course_id, student_id)?.overall;
    if overall < COMPLETION_THRESHOLD {
        return Ok(None);
    }

    if let Some(existing) = find_certificate(conn, course_id, student_id)? {
        return Ok(Some(existing));
    }

    let id = Uuid::new_v4().to_string();
    let number = new_certificate_number();
    let issued_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO certificates(id, course_id, student_id, certificate_number, score, issued_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id, student_id) DO NOTHING",
        (&id, course_id, student_id, &number, overall, &issued_at),
    )
    .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;

    // Re-select rather than trusting our insert: if a racer won, this
    // returns their row.
    let cert = find_certificate(conn, course_id, student_id)?;
    cert.map(Some).ok_or_else(|| {
        CalcError::new("db_insert_failed", "certificate row missing after insert")
    })
}
