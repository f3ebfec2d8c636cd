use crate::access::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, now_rfc3339, param_str, require_actor, require_role};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let course_id = match param_str(req, "courseId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let title = match param_str(req, "title") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let deadline_raw = match param_str(req, "deadline") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing deadline", None),
    };
    let deadline = match DateTime::parse_from_rfc3339(&deadline_raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            return err(
                &req.id,
                "bad_params",
                "deadline must be an RFC 3339 timestamp",
                Some(json!({ "deadline": deadline_raw })),
            )
        }
    };
    let description = param_str(req, "description");
    let total_marks = req
        .params
        .get("totalMarks")
        .and_then(|v| v.as_i64())
        .unwrap_or(100);
    if total_marks < 1 {
        return err(&req.id, "bad_params", "totalMarks must be positive", None);
    }
    let week_id = param_str(req, "weekId");

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can create assignments",
            None,
        );
    }

    if let Some(week_id) = week_id.as_deref() {
        let week_course: Option<String> = match conn
            .query_row(
                "SELECT course_id FROM course_weeks WHERE id = ?",
                [week_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match week_course {
            None => return err(&req.id, "not_found", "week not found", None),
            Some(wc) if wc != course_id => {
                return err(
                    &req.id,
                    "validation_failed",
                    "week does not belong to this course",
                    None,
                )
            }
            Some(_) => {}
        }
    }

    let assignment_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(id, course_id, instructor_id, week_id, title,
                                 description, total_marks, deadline, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &course_id,
            &actor.id,
            &week_id,
            &title,
            &description,
            total_marks,
            deadline.to_rfc3339(),
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(
        &req.id,
        json!({
            "assignmentId": assignment_id,
            "title": title,
            "totalMarks": total_marks,
            "deadline": deadline.to_rfc3339()
        }),
    )
}

fn handle_assignments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let assignment_id = match param_str(req, "assignmentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };

    let course_id: Option<String> = match conn
        .query_row(
            "SELECT course_id FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "assignment not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can delete assignments",
            None,
        );
    }

    let removed_files = {
        let mut stmt = match conn
            .prepare("SELECT file_url FROM assignment_submissions WHERE assignment_id = ?")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&assignment_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM assignment_submissions WHERE assignment_id = ?",
        [&assignment_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignment_submissions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "removedFiles": removed_files }))
}

fn handle_assignments_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(
        &actor,
        Role::Student,
        req,
        "only students can submit assignments",
    ) {
        return resp;
    }
    let assignment_id = match param_str(req, "assignmentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let file_url = match param_str(req, "fileUrl") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing fileUrl", None),
    };
    if file_url.is_empty() {
        return err(&req.id, "bad_params", "fileUrl must not be empty", None);
    }

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT course_id, deadline FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((course_id, deadline_raw)) = row else {
        return err(&req.id, "not_found", "assignment not found", None);
    };

    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    match DateTime::parse_from_rfc3339(&deadline_raw) {
        Ok(deadline) => {
            if Utc::now() > deadline.with_timezone(&Utc) {
                return err(
                    &req.id,
                    "validation_failed",
                    "the submission deadline has passed",
                    Some(json!({ "deadline": deadline_raw })),
                );
            }
        }
        Err(e) => {
            return err(
                &req.id,
                "db_query_failed",
                format!("stored deadline is unreadable: {e}"),
                None,
            )
        }
    }

    let already: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM assignment_submissions WHERE assignment_id = ? AND student_id = ?",
            (&assignment_id, &actor.id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already.is_some() {
        return err(
            &req.id,
            "conflict",
            "assignment already submitted",
            None,
        );
    }

    let submission_id = Uuid::new_v4().to_string();
    let submitted_at = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO assignment_submissions(id, assignment_id, student_id, file_url, submitted_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &submission_id,
            &assignment_id,
            &actor.id,
            &file_url,
            &submitted_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignment_submissions" })),
        );
    }

    ok(
        &req.id,
        json!({ "submissionId": submission_id, "submittedAt": submitted_at }),
    )
}

fn handle_assignments_mine(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    // courseId narrows the view; without it the listing spans every
    // course the student is enrolled in.
    let course_id = param_str(req, "courseId");
    if let Some(course_id) = course_id.as_deref() {
        if let Err(e) = access::ensure_enrolled(conn, course_id, &actor.id) {
            return access_err(&req.id, e);
        }
    }

    let sql = if course_id.is_some() {
        "SELECT a.id, a.course_id, a.title, a.total_marks, a.deadline,
                s.id, s.submitted_at, s.marks_obtained, s.feedback
         FROM assignments a
         LEFT JOIN assignment_submissions s
           ON s.assignment_id = a.id AND s.student_id = ?1
         WHERE a.course_id = ?2
         ORDER BY a.created_at"
    } else {
        "SELECT a.id, a.course_id, a.title, a.total_marks, a.deadline,
                s.id, s.submitted_at, s.marks_obtained, s.feedback
         FROM assignments a
         JOIN enrollments e
           ON e.course_id = a.course_id AND e.student_id = ?1
         LEFT JOIN assignment_submissions s
           ON s.assignment_id = a.id AND s.student_id = ?1
         ORDER BY a.created_at"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| {
        let submission_id: Option<String> = r.get(5)?;
        let submission = match submission_id {
            Some(id) => json!({
                "id": id,
                "submittedAt": r.get::<_, Option<String>>(6)?,
                "marksObtained": r.get::<_, Option<i64>>(7)?,
                "feedback": r.get::<_, Option<String>>(8)?
            }),
            None => serde_json::Value::Null,
        };
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "courseId": r.get::<_, String>(1)?,
            "title": r.get::<_, String>(2)?,
            "totalMarks": r.get::<_, i64>(3)?,
            "deadline": r.get::<_, String>(4)?,
            "submission": submission
        }))
    };
    let rows = match course_id {
        Some(course_id) => stmt
            .query_map((&actor.id, &course_id), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([&actor.id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_list_submissions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let assignment_id = match param_str(req, "assignmentId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };

    let course_id: Option<String> = match conn
        .query_row(
            "SELECT course_id FROM assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "assignment not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can list submissions",
            None,
        );
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.student_id, u.name, u.roll_number, s.file_url,
                s.submitted_at, s.marks_obtained, s.feedback
         FROM assignment_submissions s
         JOIN users u ON u.id = s.student_id
         WHERE s.assignment_id = ?
         ORDER BY s.submitted_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&assignment_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "rollNumber": r.get::<_, Option<String>>(3)?,
                "fileUrl": r.get::<_, String>(4)?,
                "submittedAt": r.get::<_, String>(5)?,
                "marksObtained": r.get::<_, Option<i64>>(6)?,
                "feedback": r.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let submission_id = match param_str(req, "submissionId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing submissionId", None),
    };
    let Some(marks_obtained) = req.params.get("marksObtained").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing/invalid marksObtained", None);
    };
    let feedback = param_str(req, "feedback");

    let row: Option<(String, i64)> = match conn
        .query_row(
            "SELECT a.course_id, a.total_marks
             FROM assignment_submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE s.id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((course_id, total_marks)) = row else {
        return err(&req.id, "not_found", "submission not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can grade submissions",
            None,
        );
    }

    if marks_obtained < 0 || marks_obtained > total_marks {
        return err(
            &req.id,
            "validation_failed",
            "marksObtained must be between 0 and the assignment total",
            Some(json!({ "totalMarks": total_marks })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE assignment_submissions SET marks_obtained = ?, feedback = ? WHERE id = ?",
        (marks_obtained, &feedback, &submission_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "assignment_submissions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "marksObtained": marks_obtained,
            "feedback": feedback
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.delete" => Some(handle_assignments_delete(state, req)),
        "assignments.submit" => Some(handle_assignments_submit(state, req)),
        "assignments.mine" => Some(handle_assignments_mine(state, req)),
        "assignments.listSubmissions" => Some(handle_assignments_list_submissions(state, req)),
        "assignments.grade" => Some(handle_assignments_grade(state, req)),
        _ => None,
    }
}
