use crate::access::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, now_rfc3339, param_str, require_actor, require_role};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const COURSES_LIST_MAX_LIMIT: i64 = 100;
const COURSES_LIST_DEFAULT_LIMIT: i64 = 10;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(
        &actor,
        Role::Instructor,
        req,
        "only instructors can create courses",
    ) {
        return resp;
    }

    let code = match param_str(req, "code") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    let name = match param_str(req, "name") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if code.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "code and name must not be empty", None);
    }
    let description = param_str(req, "description");
    let credits = req.params.get("credits").and_then(|v| v.as_i64());
    let thumbnail = param_str(req, "thumbnail");

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE code = ?", [&code], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(
            &req.id,
            "conflict",
            "course code already in use",
            Some(json!({ "code": code })),
        );
    }

    let course_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, name, description, credits, thumbnail,
                             instructor_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &name,
            &description,
            credits,
            &thumbnail,
            &actor.id,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "code": code, "name": name }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can update this course",
            None,
        );
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("description") {
        if v.is_null() {
            set_parts.push("description = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            set_parts.push("description = ?".into());
            bind_values.push(Value::Text(s.to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.description must be a string or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("credits") {
        if v.is_null() {
            set_parts.push("credits = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(n) = v.as_i64() {
            set_parts.push("credits = ?".into());
            bind_values.push(Value::Integer(n));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.credits must be an integer or null",
                None,
            );
        }
    }
    if let Some(v) = patch.get("thumbnail") {
        if v.is_null() {
            set_parts.push("thumbnail = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            set_parts.push("thumbnail = ?".into());
            bind_values.push(Value::Text(s.to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.thumbnail must be a string or null",
                None,
            );
        }
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    set_parts.push("updated_at = ?".into());
    bind_values.push(Value::Text(now_rfc3339()));

    let sql = format!("UPDATE courses SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(course_id.clone()));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can delete this course",
            None,
        );
    }

    // Collect orphaned file references up front; the external file store
    // reclaims them after the rows are gone.
    let mut removed_files: Vec<String> = Vec::new();
    {
        let thumb: Option<Option<String>> = match conn
            .query_row(
                "SELECT thumbnail FROM courses WHERE id = ?",
                [&course_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if let Some(Some(t)) = thumb {
            removed_files.push(t);
        }

        let mut stmt = match conn.prepare("SELECT file_url FROM media WHERE course_id = ?") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let media_files = stmt
            .query_map([&course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match media_files {
            Ok(mut v) => removed_files.append(&mut v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }

        let mut stmt = match conn.prepare(
            "SELECT s.file_url FROM assignment_submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE a.course_id = ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let submission_files = stmt
            .query_map([&course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match submission_files {
            Ok(mut v) => removed_files.append(&mut v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency-ordered deletes (no ON DELETE CASCADE).
    let steps: [(&str, &str); 13] = [
        (
            "quiz_answers",
            "DELETE FROM quiz_answers WHERE submission_id IN (
               SELECT s.id FROM quiz_submissions s
               JOIN quizzes q ON q.id = s.quiz_id
               WHERE q.course_id = ?1
             )",
        ),
        (
            "quiz_submissions",
            "DELETE FROM quiz_submissions WHERE quiz_id IN (
               SELECT id FROM quizzes WHERE course_id = ?1
             )",
        ),
        (
            "quiz_options",
            "DELETE FROM quiz_options WHERE question_id IN (
               SELECT qq.id FROM quiz_questions qq
               JOIN quizzes q ON q.id = qq.quiz_id
               WHERE q.course_id = ?1
             )",
        ),
        (
            "quiz_questions",
            "DELETE FROM quiz_questions WHERE quiz_id IN (
               SELECT id FROM quizzes WHERE course_id = ?1
             )",
        ),
        ("quizzes", "DELETE FROM quizzes WHERE course_id = ?1"),
        (
            "assignment_submissions",
            "DELETE FROM assignment_submissions WHERE assignment_id IN (
               SELECT id FROM assignments WHERE course_id = ?1
             )",
        ),
        ("assignments", "DELETE FROM assignments WHERE course_id = ?1"),
        (
            "media_progress",
            "DELETE FROM media_progress WHERE media_id IN (
               SELECT id FROM media WHERE course_id = ?1
             )",
        ),
        ("media", "DELETE FROM media WHERE course_id = ?1"),
        ("course_weeks", "DELETE FROM course_weeks WHERE course_id = ?1"),
        ("certificates", "DELETE FROM certificates WHERE course_id = ?1"),
        ("enrollments", "DELETE FROM enrollments WHERE course_id = ?1"),
        ("courses", "DELETE FROM courses WHERE id = ?1"),
    ];

    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&course_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "removedFiles": removed_files }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(COURSES_LIST_DEFAULT_LIMIT)
        .clamp(1, COURSES_LIST_MAX_LIMIT);
    let cursor = param_str(req, "cursor");

    // Cursor pagination on created_at descending; weekCount via correlated
    // subquery to avoid double-counting from joins.
    let sql = if cursor.is_some() {
        "SELECT c.id, c.code, c.name, c.description, c.credits, c.thumbnail,
                c.created_at, u.name,
                (SELECT COUNT(*) FROM course_weeks w WHERE w.course_id = c.id)
         FROM courses c
         JOIN users u ON u.id = c.instructor_id
         WHERE c.created_at < ?
         ORDER BY c.created_at DESC
         LIMIT ?"
    } else {
        "SELECT c.id, c.code, c.name, c.description, c.credits, c.thumbnail,
                c.created_at, u.name,
                (SELECT COUNT(*) FROM course_weeks w WHERE w.course_id = c.id)
         FROM courses c
         JOIN users u ON u.id = c.instructor_id
         ORDER BY c.created_at DESC
         LIMIT ?"
    };

    let mut bind_values: Vec<Value> = Vec::new();
    if let Some(cur) = &cursor {
        bind_values.push(Value::Text(cur.clone()));
    }
    bind_values.push(Value::Integer(limit + 1));

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind_values), |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let description: Option<String> = row.get(3)?;
            let credits: Option<i64> = row.get(4)?;
            let thumbnail: Option<String> = row.get(5)?;
            let created_at: String = row.get(6)?;
            let instructor_name: String = row.get(7)?;
            let week_count: i64 = row.get(8)?;
            Ok((
                created_at.clone(),
                json!({
                    "id": id,
                    "code": code,
                    "name": name,
                    "description": description,
                    "credits": credits,
                    "thumbnail": thumbnail,
                    "instructorName": instructor_name,
                    "weekCount": week_count,
                    "createdAt": created_at
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let mut rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let next_cursor = if rows.len() as i64 > limit {
        rows.truncate(limit as usize);
        rows.last().map(|(created_at, _)| created_at.clone())
    } else {
        None
    };
    let courses: Vec<serde_json::Value> = rows.into_iter().map(|(_, v)| v).collect();

    ok(&req.id, json!({ "courses": courses, "nextCursor": next_cursor }))
}

fn handle_courses_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let course_row: Option<(
        String,
        String,
        Option<String>,
        Option<i64>,
        Option<String>,
        String,
        String,
        String,
    )> = match conn
        .query_row(
            "SELECT c.code, c.name, c.description, c.credits, c.thumbnail,
                    c.instructor_id, c.created_at, c.updated_at
             FROM courses c WHERE c.id = ?",
            [&course_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((code, name, description, credits, thumbnail, instructor_id, created_at, updated_at)) =
        course_row
    else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let instructor_name: Option<String> = match conn
        .query_row("SELECT name FROM users WHERE id = ?", [&instructor_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let enrolled_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let week_ids = {
        let mut stmt = match conn.prepare(
            "SELECT id FROM course_weeks WHERE course_id = ? ORDER BY week_number",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let has_full_access =
        access::check_course_access(conn, &course_id, &actor.id).is_ok();

    let mut detail = json!({
        "id": course_id,
        "code": code,
        "name": name,
        "description": description,
        "credits": credits,
        "thumbnail": thumbnail,
        "instructorId": instructor_id,
        "instructorName": instructor_name,
        "enrolledCount": enrolled_count,
        "weeks": week_ids,
        "mediaItems": [],
        "assignments": [],
        "quizzes": [],
        "createdAt": created_at,
        "updatedAt": updated_at
    });

    if !has_full_access {
        // Basic view: metadata only, no content listings.
        return ok(&req.id, detail);
    }

    // Full view adds the course-global items (week_id IS NULL); week-scoped
    // content is served by weeks.detail.
    let media_items = {
        let mut stmt = match conn.prepare(
            "SELECT id, title, file_url, media_type, duration_seconds
             FROM media WHERE course_id = ? AND week_id IS NULL
             ORDER BY created_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&course_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "fileUrl": r.get::<_, String>(2)?,
                    "mediaType": r.get::<_, String>(3)?,
                    "durationSeconds": r.get::<_, Option<i64>>(4)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let assignments = {
        let mut stmt = match conn.prepare(
            "SELECT id, title, description, total_marks, deadline
             FROM assignments WHERE course_id = ? AND week_id IS NULL
             ORDER BY created_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&course_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "description": r.get::<_, Option<String>>(2)?,
                    "totalMarks": r.get::<_, i64>(3)?,
                    "deadline": r.get::<_, String>(4)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let quizzes = {
        let mut stmt = match conn.prepare(
            "SELECT q.id, q.title, q.description, q.total_marks, q.time_limit_minutes,
                    (SELECT COUNT(*) FROM quiz_questions qq WHERE qq.quiz_id = q.id)
             FROM quizzes q WHERE q.course_id = ? AND q.week_id IS NULL
             ORDER BY q.created_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&course_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "title": r.get::<_, String>(1)?,
                    "description": r.get::<_, Option<String>>(2)?,
                    "totalMarks": r.get::<_, i64>(3)?,
                    "timeLimitMinutes": r.get::<_, Option<i64>>(4)?,
                    "questionCount": r.get::<_, i64>(5)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    detail["mediaItems"] = json!(media_items);
    detail["assignments"] = json!(assignments);
    detail["quizzes"] = json!(quizzes);

    ok(&req.id, detail)
}

fn handle_courses_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_role(&actor, Role::Student, req, "only students can enroll") {
        return resp;
    }
    let course_id = match param_str(req, "courseId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    if let Err(e) = access::course_instructor(conn, &course_id) {
        return access_err(&req.id, e);
    }

    match access::is_enrolled(conn, &course_id, &actor.id) {
        Ok(true) => {
            return err(&req.id, "conflict", "already enrolled in this course", None)
        }
        Ok(false) => {}
        Err(e) => return access_err(&req.id, e),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(course_id, student_id, enrolled_at) VALUES(?, ?, ?)",
        (&course_id, &actor.id, now_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(
        &req.id,
        json!({ "courseId": course_id, "studentId": actor.id }),
    )
}

fn handle_courses_mine(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "only students have enrolled courses",
    ) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.code, c.name, c.description, c.credits, c.thumbnail, u.name
         FROM courses c
         JOIN enrollments e ON e.course_id = c.id
         JOIN users u ON u.id = c.instructor_id
         WHERE e.student_id = ?
         ORDER BY c.created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&actor.id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "credits": r.get::<_, Option<i64>>(4)?,
                "thumbnail": r.get::<_, Option<String>>(5)?,
                "instructorName": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.detail" => Some(handle_courses_detail(state, req)),
        "courses.enroll" => Some(handle_courses_enroll(state, req)),
        "courses.mine" => Some(handle_courses_mine(state, req)),
        _ => None,
    }
}
