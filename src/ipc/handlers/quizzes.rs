use crate::access::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, now_rfc3339, param_str, require_actor};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde_json::json;
use uuid::Uuid;

struct QuestionInput {
    question_text: String,
    marks: i64,
    options: Vec<OptionInput>,
}

struct OptionInput {
    option_text: String,
    is_correct: bool,
}

/// Parses and validates the full question payload before anything touches
/// the database. Returns the error response on the first bad question so a
/// partially valid payload writes no rows at all.
fn parse_questions(req: &Request) -> Result<Vec<QuestionInput>, serde_json::Value> {
    let Some(raw) = req.params.get("questions").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing/invalid questions", None));
    };
    if raw.is_empty() {
        return Err(err(
            &req.id,
            "validation_failed",
            "a quiz needs at least one question",
            None,
        ));
    }

    let mut questions = Vec::with_capacity(raw.len());
    for (qi, q) in raw.iter().enumerate() {
        let detail = Some(json!({ "questionIndex": qi }));
        let Some(q) = q.as_object() else {
            return Err(err(
                &req.id,
                "validation_failed",
                "each question must be an object",
                detail,
            ));
        };
        let question_text = q
            .get("questionText")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if question_text.is_empty() {
            return Err(err(
                &req.id,
                "validation_failed",
                "questionText must not be empty",
                detail,
            ));
        }
        let marks = q.get("marks").and_then(|v| v.as_i64()).unwrap_or(1);
        if marks < 1 {
            return Err(err(
                &req.id,
                "validation_failed",
                "question marks must be positive",
                detail,
            ));
        }
        let Some(raw_options) = q.get("options").and_then(|v| v.as_array()) else {
            return Err(err(
                &req.id,
                "validation_failed",
                "each question needs an options array",
                detail,
            ));
        };
        if raw_options.is_empty() {
            return Err(err(
                &req.id,
                "validation_failed",
                "each question needs at least one option",
                detail,
            ));
        }

        let mut options = Vec::with_capacity(raw_options.len());
        let mut correct_count = 0;
        for o in raw_options {
            let option_text = o
                .get("optionText")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            if option_text.is_empty() {
                return Err(err(
                    &req.id,
                    "validation_failed",
                    "optionText must not be empty",
                    detail,
                ));
            }
            let is_correct = o.get("isCorrect").and_then(|v| v.as_bool()).unwrap_or(false);
            if is_correct {
                correct_count += 1;
            }
            options.push(OptionInput {
                option_text,
                is_correct,
            });
        }
        if correct_count != 1 {
            return Err(err(
                &req.id,
                "validation_failed",
                "each question must have exactly one correct option",
                detail,
            ));
        }

        questions.push(QuestionInput {
            question_text,
            marks,
            options,
        });
    }

    Ok(questions)
}

fn insert_questions(
    tx: &Transaction,
    quiz_id: &str,
    questions: &[QuestionInput],
) -> Result<(), rusqlite::Error> {
    for (qi, q) in questions.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO quiz_questions(id, quiz_id, question_text, marks, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (&question_id, quiz_id, &q.question_text, q.marks, qi as i64),
        )?;
        for (oi, o) in q.options.iter().enumerate() {
            tx.execute(
                "INSERT INTO quiz_options(id, question_id, option_text, is_correct, sort_order)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &question_id,
                    &o.option_text,
                    o.is_correct as i64,
                    oi as i64,
                ),
            )?;
        }
    }
    Ok(())
}

fn quiz_submission_count(conn: &Connection, quiz_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM quiz_submissions WHERE quiz_id = ?",
        [quiz_id],
        |r| r.get(0),
    )
}

fn handle_quizzes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let description = param_str(req, "description");
    let time_limit_minutes = req.params.get("timeLimitMinutes").and_then(|v| v.as_i64());
    let week_id = param_str(req, "weekId");

    let questions = match parse_questions(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Score totals default to the sum of question marks.
    let total_marks = req
        .params
        .get("totalMarks")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| questions.iter().map(|q| q.marks).sum());

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can create quizzes",
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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let quiz_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO quizzes(id, course_id, instructor_id, week_id, title, description,
                             total_marks, time_limit_minutes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &quiz_id,
            &course_id,
            &actor.id,
            &week_id,
            &title,
            &description,
            total_marks,
            time_limit_minutes,
            now_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "quizzes" })),
        );
    }

    if let Err(e) = insert_questions(&tx, &quiz_id, &questions) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_questions" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "quizId": quiz_id,
            "title": title,
            "totalMarks": total_marks,
            "questionCount": questions.len()
        }),
    )
}

fn handle_quizzes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let quiz_id = match param_str(req, "quizId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing quizId", None),
    };
    let title = match param_str(req, "title") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let description = param_str(req, "description");
    let time_limit_minutes = req.params.get("timeLimitMinutes").and_then(|v| v.as_i64());
    let week_id = param_str(req, "weekId");

    // The whole replacement payload is validated before any existing
    // question row is touched.
    let questions = match parse_questions(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let total_marks = req
        .params
        .get("totalMarks")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| questions.iter().map(|q| q.marks).sum());

    let course_id: Option<String> = match conn
        .query_row("SELECT course_id FROM quizzes WHERE id = ?", [&quiz_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "quiz not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can update quizzes",
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

    // Recreating questions would orphan recorded answers, so edits stop once
    // anyone has taken the quiz.
    match quiz_submission_count(conn, &quiz_id) {
        Ok(0) => {}
        Ok(_) => {
            return err(
                &req.id,
                "conflict",
                "quiz already has submissions and can no longer be edited",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM quiz_options WHERE question_id IN (
           SELECT id FROM quiz_questions WHERE quiz_id = ?
         )",
        [&quiz_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_options" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM quiz_questions WHERE quiz_id = ?", [&quiz_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_questions" })),
        );
    }
    if let Err(e) = tx.execute(
        "UPDATE quizzes SET title = ?, description = ?, total_marks = ?,
                            time_limit_minutes = ?, week_id = ?
         WHERE id = ?",
        (
            &title,
            &description,
            total_marks,
            time_limit_minutes,
            &week_id,
            &quiz_id,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "quizzes" })),
        );
    }
    if let Err(e) = insert_questions(&tx, &quiz_id, &questions) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_questions" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "quizId": quiz_id,
            "title": title,
            "totalMarks": total_marks,
            "questionCount": questions.len()
        }),
    )
}

fn handle_quizzes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let quiz_id = match param_str(req, "quizId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing quizId", None),
    };

    let course_id: Option<String> = match conn
        .query_row("SELECT course_id FROM quizzes WHERE id = ?", [&quiz_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "quiz not found", None);
    };

    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    if instructor_id != actor.id {
        return err(
            &req.id,
            "forbidden",
            "only the course instructor can delete quizzes",
            None,
        );
    }

    match quiz_submission_count(conn, &quiz_id) {
        Ok(0) => {}
        Ok(_) => {
            return err(
                &req.id,
                "conflict",
                "quiz already has submissions and cannot be deleted",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps: [(&str, &str); 3] = [
        (
            "quiz_options",
            "DELETE FROM quiz_options WHERE question_id IN (
               SELECT id FROM quiz_questions WHERE quiz_id = ?1
             )",
        ),
        (
            "quiz_questions",
            "DELETE FROM quiz_questions WHERE quiz_id = ?1",
        ),
        ("quizzes", "DELETE FROM quizzes WHERE id = ?1"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&quiz_id]) {
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

    ok(&req.id, json!({ "ok": true }))
}

fn handle_quizzes_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let actor = match require_actor(conn, req) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let quiz_id = match param_str(req, "quizId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing quizId", None),
    };

    let quiz_row: Option<(String, String, Option<String>, i64, Option<i64>, Option<String>)> =
        match conn
            .query_row(
                "SELECT course_id, title, description, total_marks, time_limit_minutes, week_id
                 FROM quizzes WHERE id = ?",
                [&quiz_id],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ))
                },
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let Some((course_id, title, description, total_marks, time_limit_minutes, week_id)) = quiz_row
    else {
        return err(&req.id, "not_found", "quiz not found", None);
    };

    if let Err(e) = access::check_course_access(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }
    let instructor_id = match access::course_instructor(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, e),
    };
    // Students see the same shape with answer keys stripped.
    let reveal_answers = actor.role != Role::Student && instructor_id == actor.id;

    let mut questions: Vec<serde_json::Value> = Vec::new();
    {
        let mut q_stmt = match conn.prepare(
            "SELECT id, question_text, marks FROM quiz_questions
             WHERE quiz_id = ? ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let q_rows = q_stmt
            .query_map([&quiz_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let q_rows = match q_rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let mut o_stmt = match conn.prepare(
            "SELECT id, option_text, is_correct FROM quiz_options
             WHERE question_id = ? ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        for (question_id, question_text, marks) in q_rows {
            let options = o_stmt
                .query_map([&question_id], |r| {
                    let mut o = json!({
                        "id": r.get::<_, String>(0)?,
                        "optionText": r.get::<_, String>(1)?
                    });
                    if reveal_answers {
                        o["isCorrect"] = json!(r.get::<_, i64>(2)? != 0);
                    }
                    Ok(o)
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            let options = match options {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            questions.push(json!({
                "id": question_id,
                "questionText": question_text,
                "marks": marks,
                "options": options
            }));
        }
    }

    ok(
        &req.id,
        json!({
            "id": quiz_id,
            "courseId": course_id,
            "weekId": week_id,
            "title": title,
            "description": description,
            "totalMarks": total_marks,
            "timeLimitMinutes": time_limit_minutes,
            "questions": questions
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quizzes.create" => Some(handle_quizzes_create(state, req)),
        "quizzes.update" => Some(handle_quizzes_update(state, req)),
        "quizzes.delete" => Some(handle_quizzes_delete(state, req)),
        "quizzes.detail" => Some(handle_quizzes_detail(state, req)),
        _ => None,
    }
}
