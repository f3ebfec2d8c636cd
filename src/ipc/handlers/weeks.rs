use crate::access;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, now_rfc3339, param_str, require_actor};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_weeks_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(week_number) = req.params.get("weekNumber").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing/invalid weekNumber", None);
    };
    if week_number < 1 {
        return err(&req.id, "bad_params", "weekNumber must be positive", None);
    }
    let title = match param_str(req, "title") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let description = param_str(req, "description");

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can add weeks",
            None,
        );
    }

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM course_weeks WHERE course_id = ? AND week_number = ?",
            (&course_id, week_number),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(
            &req.id,
            "conflict",
            "week number already exists for this course",
            Some(json!({ "weekNumber": week_number })),
        );
    }

    let week_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_weeks(id, course_id, week_number, title, description, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &week_id,
            &course_id,
            week_number,
            &title,
            &description,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_weeks" })),
        );
    }

    ok(
        &req.id,
        json!({ "weekId": week_id, "weekNumber": week_number, "title": title }),
    )
}

fn handle_weeks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = access::check_course_access(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    let mut stmt = match conn.prepare(
        "SELECT id, week_number, title, description
         FROM course_weeks WHERE course_id = ?
         ORDER BY week_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "weekNumber": r.get::<_, i64>(1)?,
                "title": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(weeks) => ok(&req.id, json!({ "weeks": weeks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_weeks_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let week_id = match param_str(req, "weekId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing weekId", None),
    };

    let week_row: Option<(String, i64, String, Option<String>)> = match conn
        .query_row(
            "SELECT course_id, week_number, title, description
             FROM course_weeks WHERE id = ?",
            [&week_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((course_id, week_number, title, description)) = week_row else {
        return err(&req.id, "not_found", "week not found", None);
    };

    if let Err(e) = access::check_course_access(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    let media_items = {
        let mut stmt = match conn.prepare(
            "SELECT id, title, file_url, media_type, duration_seconds
             FROM media WHERE week_id = ?
             ORDER BY created_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&week_id], |r| {
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
             FROM assignments WHERE week_id = ?
             ORDER BY created_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&week_id], |r| {
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
             FROM quizzes q WHERE q.week_id = ?
             ORDER BY q.created_at",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&week_id], |r| {
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

    ok(
        &req.id,
        json!({
            "id": week_id,
            "courseId": course_id,
            "weekNumber": week_number,
            "title": title,
            "description": description,
            "mediaItems": media_items,
            "assignments": assignments,
            "quizzes": quizzes
        }),
    )
}

fn handle_weeks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let week_id = match param_str(req, "weekId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing weekId", None),
    };

    let course_id: Option<String> = match conn
        .query_row(
            "SELECT course_id FROM course_weeks WHERE id = ?",
            [&week_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "week not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can delete weeks",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Week content survives week deletion; it detaches back to the course
    // level rather than disappearing.
    let detach: [(&str, &str); 3] = [
        ("media", "UPDATE media SET week_id = NULL WHERE week_id = ?"),
        (
            "assignments",
            "UPDATE assignments SET week_id = NULL WHERE week_id = ?",
        ),
        ("quizzes", "UPDATE quizzes SET week_id = NULL WHERE week_id = ?"),
    ];
    for (table, sql) in detach {
        if let Err(e) = tx.execute(sql, [&week_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.execute("DELETE FROM course_weeks WHERE id = ?", [&week_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "course_weeks" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weeks.create" => Some(handle_weeks_create(state, req)),
        "weeks.list" => Some(handle_weeks_list(state, req)),
        "weeks.detail" => Some(handle_weeks_detail(state, req)),
        "weeks.delete" => Some(handle_weeks_delete(state, req)),
        _ => None,
    }
}
