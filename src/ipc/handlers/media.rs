use crate::access::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, now_rfc3339, param_str, require_actor, require_role};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const MEDIA_TYPES: [&str; 3] = ["video", "document", "image"];

// Watching 90% of a video counts as completing it.
const COMPLETION_FRACTION: f64 = 0.9;

fn handle_media_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let file_url = match param_str(req, "fileUrl") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing fileUrl", None),
    };
    let media_type = match param_str(req, "mediaType") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing mediaType", None),
    };
    if title.is_empty() || file_url.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "title and fileUrl must not be empty",
            None,
        );
    }
    if !MEDIA_TYPES.contains(&media_type.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "mediaType must be one of: video, document, image",
            Some(json!({ "mediaType": media_type })),
        );
    }
    let week_id = param_str(req, "weekId");
    let duration_seconds = req.params.get("durationSeconds").and_then(|v| v.as_i64());

    // Duration is the denominator of watch progress, so videos must carry
    // one and nothing else may.
    if media_type == "video" {
        match duration_seconds {
            Some(d) if d > 0 => {}
            _ => {
                return err(
                    &req.id,
                    "validation_failed",
                    "video media requires a positive durationSeconds",
                    None,
                )
            }
        }
    } else if duration_seconds.is_some() {
        return err(
            &req.id,
            "validation_failed",
            "durationSeconds only applies to video media",
            None,
        );
    }

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can add media",
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

    let media_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO media(id, course_id, week_id, uploaded_by, title, file_url,
                           media_type, duration_seconds, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &media_id,
            &course_id,
            &week_id,
            &actor.id,
            &title,
            &file_url,
            &media_type,
            duration_seconds,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "media" })),
        );
    }

    ok(
        &req.id,
        json!({ "mediaId": media_id, "title": title, "mediaType": media_type }),
    )
}

fn handle_media_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let media_id = match param_str(req, "mediaId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing mediaId", None),
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT course_id, file_url FROM media WHERE id = ?",
            [&media_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((course_id, file_url)) = row else {
        return err(&req.id, "not_found", "media not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can delete media",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM media_progress WHERE media_id = ?", [&media_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "media_progress" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM media WHERE id = ?", [&media_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "media" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "removedFiles": [file_url] }))
}

fn handle_media_progress_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "only students track watch progress",
    ) {
        return resp;
    }
    let media_id = match param_str(req, "mediaId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing mediaId", None),
    };
    let Some(watched_seconds) = req.params.get("watchedSeconds").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing/invalid watchedSeconds", None);
    };
    if watched_seconds < 0 {
        return err(
            &req.id,
            "bad_params",
            "watchedSeconds must not be negative",
            None,
        );
    }

    let row: Option<(String, String, Option<i64>)> = match conn
        .query_row(
            "SELECT course_id, media_type, duration_seconds FROM media WHERE id = ?",
            [&media_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((course_id, media_type, duration_seconds)) = row else {
        return err(&req.id, "not_found", "media not found", None);
    };
    if media_type != "video" {
        return err(
            &req.id,
            "validation_failed",
            "watch progress only applies to video media",
            None,
        );
    }
    let Some(duration) = duration_seconds else {
        return err(
            &req.id,
            "validation_failed",
            "video has no duration recorded",
            None,
        );
    };

    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    let watched = watched_seconds.min(duration);
    let completed = (watched as f64) >= (duration as f64) * COMPLETION_FRACTION;

    // Progress never regresses: MAX keeps the high-water mark even when a
    // replay reports fewer seconds.
    if let Err(e) = conn.execute(
        "INSERT INTO media_progress(id, media_id, student_id, watched_seconds,
                                    is_completed, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(media_id, student_id) DO UPDATE SET
            watched_seconds = MAX(watched_seconds, excluded.watched_seconds),
            is_completed = MAX(is_completed, excluded.is_completed),
            updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &media_id,
            &actor.id,
            watched,
            completed as i64,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "media_progress" })),
        );
    }

    let (stored_watched, stored_completed): (i64, i64) = match conn.query_row(
        "SELECT watched_seconds, is_completed FROM media_progress
         WHERE media_id = ? AND student_id = ?",
        (&media_id, &actor.id),
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "mediaId": media_id,
            "watchedSeconds": stored_watched,
            "isCompleted": stored_completed != 0
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "media.create" => Some(handle_media_create(state, req)),
        "media.delete" => Some(handle_media_delete(state, req)),
        "mediaProgress.update" => Some(handle_media_progress_update(state, req)),
        _ => None,
    }
}
