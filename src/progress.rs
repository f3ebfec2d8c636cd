use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Per-category completion for one student in one course. `None` means
/// Absent: the course has no data in that category, which is distinct
/// from 0% progress.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub media: Option<f64>,
    pub assignment: Option<f64>,
    pub quiz: Option<f64>,
    pub overall: f64,
}

/// Percentage of course video time watched, or Absent when the course has
/// no video media (or only zero-length videos).
pub fn media_progress(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Option<f64>, CalcError> {
    let total: Option<i64> = conn
        .query_row(
            "SELECT SUM(duration_seconds) FROM media
             WHERE course_id = ? AND media_type = 'video'",
            [course_id],
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;

    let total = match total {
        Some(t) if t > 0 => t,
        _ => return Ok(None),
    };

    let watched: Option<i64> = conn
        .query_row(
            "SELECT SUM(mp.watched_seconds)
             FROM media_progress mp
             JOIN media m ON m.id = mp.media_id
             WHERE m.course_id = ? AND m.media_type = 'video' AND mp.student_id = ?",
            (course_id, student_id),
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;
    let watched = watched.unwrap_or(0);

    Ok(Some(round2(watched as f64 / total as f64 * 100.0)))
}

/// Fraction of course assignments the student has submitted. Grading
/// status is irrelevant; only submission existence counts.
pub fn assignment_progress(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Option<f64>, CalcError> {
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM assignments WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;
    if total == 0 {
        return Ok(None);
    }

    let submitted: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM assignment_submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE a.course_id = ? AND s.student_id = ?",
            (course_id, student_id),
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;

    Ok(Some(round2(submitted as f64 / total as f64 * 100.0)))
}

pub fn quiz_progress(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<Option<f64>, CalcError> {
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM quizzes WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;
    if total == 0 {
        return Ok(None);
    }

    let submitted: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM quiz_submissions s
             JOIN quizzes q ON q.id = s.quiz_id
             WHERE q.course_id = ? AND s.student_id = ?",
            (course_id, student_id),
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;

    Ok(Some(round2(submitted as f64 / total as f64 * 100.0)))
}

/// Blends the non-Absent categories into an overall mean. When every
/// category is Absent the overall is 0, not Absent; downstream consumers
/// rely on that default for "nothing to measure yet".
pub fn course_progress(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<CourseProgress, CalcError> {
    let media = media_progress(conn, course_id, student_id)?;
    let assignment = assignment_progress(conn, course_id, student_id)?;
    let quiz = quiz_progress(conn, course_id, student_id)?;

    let present: Vec<f64> = [media, assignment, quiz].iter().filter_map(|v| *v).collect();
    let overall = if present.is_empty() {
        0.0
    } else {
        round2(present.iter().sum::<f64>() / present.len() as f64)
    };

    Ok(CourseProgress {
        media,
        assignment,
        quiz,
        overall,
    })
}

/// Grade-weighted marks summary: what the student scored out of what the
/// course offers. Ungraded submissions contribute 0 to `obtained`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub obtained: i64,
    pub total: i64,
    pub percentage: f64,
}

impl PerformanceSummary {
    fn empty() -> Self {
        Self {
            obtained: 0,
            total: 0,
            percentage: 0.0,
        }
    }

    fn from_marks(obtained: i64, total: i64) -> Self {
        let percentage = if total > 0 {
            round2(obtained as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        Self {
            obtained,
            total,
            percentage,
        }
    }
}

pub fn assignment_performance(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<PerformanceSummary, CalcError> {
    let (count, total): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_marks), 0)
             FROM assignments WHERE course_id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(CalcError::db)?;
    if count == 0 {
        return Ok(PerformanceSummary::empty());
    }

    let obtained: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(s.marks_obtained), 0)
             FROM assignment_submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE a.course_id = ? AND s.student_id = ?",
            (course_id, student_id),
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;

    Ok(PerformanceSummary::from_marks(obtained, total))
}

pub fn quiz_performance(
    conn: &Connection,
    course_id: &str,
    student_id: &str,
) -> Result<PerformanceSummary, CalcError> {
    let (count, total): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_marks), 0)
             FROM quizzes WHERE course_id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(CalcError::db)?;
    if count == 0 {
        return Ok(PerformanceSummary::empty());
    }

    let obtained: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(s.total_score), 0)
             FROM quiz_submissions s
             JOIN quizzes q ON q.id = s.quiz_id
             WHERE q.course_id = ? AND s.student_id = ?",
            (course_id, student_id),
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;

    Ok(PerformanceSummary::from_marks(obtained, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::init_schema(&conn).expect("init schema");
        conn
    }

    fn seed_course(conn: &Connection) {
        conn.execute(
            "INSERT INTO users(id, role, name, created_at) VALUES
             ('inst', 'instructor', 'Pat', '2026-01-01T00:00:00Z'),
             ('stud', 'student', 'Sam', '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("seed users");
        conn.execute(
            "INSERT INTO courses(id, code, name, instructor_id, created_at, updated_at)
             VALUES('c1', 'CS101', 'Intro', 'inst',
                    '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("seed course");
    }

    fn add_video(conn: &Connection, id: &str, duration: i64) {
        conn.execute(
            "INSERT INTO media(id, course_id, uploaded_by, title, file_url, media_type,
                               duration_seconds, created_at, updated_at)
             VALUES(?, 'c1', 'inst', 'clip', '/m', 'video', ?,
                    '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            (id, duration),
        )
        .expect("seed media");
    }

    fn add_watch(conn: &Connection, media_id: &str, seconds: i64) {
        conn.execute(
            "INSERT INTO media_progress(id, media_id, student_id, watched_seconds,
                                        is_completed, updated_at)
             VALUES(?, ?, 'stud', ?, 0, '2026-01-02T00:00:00Z')",
            (format!("p-{}", media_id), media_id, seconds),
        )
        .expect("seed progress");
    }

    #[test]
    fn media_progress_absent_without_videos() {
        let conn = test_conn();
        seed_course(&conn);
        assert_eq!(media_progress(&conn, "c1", "stud").unwrap(), None);

        // A non-video item still yields Absent.
        conn.execute(
            "INSERT INTO media(id, course_id, uploaded_by, title, file_url, media_type,
                               created_at, updated_at)
             VALUES('m-doc', 'c1', 'inst', 'notes', '/d', 'pdf',
                    '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        assert_eq!(media_progress(&conn, "c1", "stud").unwrap(), None);
    }

    #[test]
    fn media_progress_reaches_exactly_100() {
        let conn = test_conn();
        seed_course(&conn);
        add_video(&conn, "m1", 120);
        add_video(&conn, "m2", 80);
        add_watch(&conn, "m1", 120);
        add_watch(&conn, "m2", 80);
        assert_eq!(media_progress(&conn, "c1", "stud").unwrap(), Some(100.0));
    }

    #[test]
    fn media_with_no_progress_row_counts_as_zero_watched() {
        let conn = test_conn();
        seed_course(&conn);
        add_video(&conn, "m1", 100);
        add_video(&conn, "m2", 100);
        add_watch(&conn, "m1", 50);
        assert_eq!(media_progress(&conn, "c1", "stud").unwrap(), Some(25.0));
    }

    #[test]
    fn overall_is_zero_when_all_categories_absent() {
        let conn = test_conn();
        seed_course(&conn);
        let p = course_progress(&conn, "c1", "stud").unwrap();
        assert_eq!(p.media, None);
        assert_eq!(p.assignment, None);
        assert_eq!(p.quiz, None);
        assert_eq!(p.overall, 0.0);
    }

    #[test]
    fn overall_averages_only_present_categories() {
        let conn = test_conn();
        seed_course(&conn);
        add_video(&conn, "m1", 100);
        add_watch(&conn, "m1", 50);
        conn.execute(
            "INSERT INTO assignments(id, course_id, instructor_id, title, total_marks,
                                     deadline, created_at, updated_at)
             VALUES('a1', 'c1', 'inst', 'hw', 50, '2026-12-01T00:00:00Z',
                    '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO assignment_submissions(id, assignment_id, student_id, file_url,
                                                submitted_at)
             VALUES('s1', 'a1', 'stud', '/f', '2026-01-03T00:00:00Z')",
            [],
        )
        .unwrap();

        let p = course_progress(&conn, "c1", "stud").unwrap();
        assert_eq!(p.media, Some(50.0));
        assert_eq!(p.assignment, Some(100.0));
        assert_eq!(p.quiz, None);
        assert_eq!(p.overall, 75.0);
    }

    #[test]
    fn assignment_performance_treats_ungraded_as_zero() {
        let conn = test_conn();
        seed_course(&conn);
        conn.execute(
            "INSERT INTO assignments(id, course_id, instructor_id, title, total_marks,
                                     deadline, created_at, updated_at)
             VALUES
             ('a1', 'c1', 'inst', 'hw1', 50, '2026-12-01T00:00:00Z',
              '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z'),
             ('a2', 'c1', 'inst', 'hw2', 50, '2026-12-01T00:00:00Z',
              '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO assignment_submissions(id, assignment_id, student_id, file_url,
                                                submitted_at, marks_obtained)
             VALUES
             ('s1', 'a1', 'stud', '/f1', '2026-01-03T00:00:00Z', 40),
             ('s2', 'a2', 'stud', '/f2', '2026-01-03T00:00:00Z', NULL)",
            [],
        )
        .unwrap();

        let perf = assignment_performance(&conn, "c1", "stud").unwrap();
        assert_eq!(perf.obtained, 40);
        assert_eq!(perf.total, 100);
        assert_eq!(perf.percentage, 40.0);
    }

    #[test]
    fn empty_course_performance_is_all_zero() {
        let conn = test_conn();
        seed_course(&conn);
        let perf = quiz_performance(&conn, "c1", "stud").unwrap();
        assert_eq!(perf.obtained, 0);
        assert_eq!(perf.total, 0);
        assert_eq!(perf.percentage, 0.0);
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(89.994), 89.99);
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert_eq!(round2(100.0 / 3.0), 33.33);
    }
}
