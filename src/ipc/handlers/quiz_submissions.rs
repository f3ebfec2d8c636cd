use crate::access::{self, Role};
use crate::grading::{self, AnswerInput, OptionKey, QuestionKey};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, now_rfc3339, param_str, require_actor, require_role};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_answer_key(
    conn: &Connection,
    quiz_id: &str,
) -> Result<Vec<QuestionKey>, rusqlite::Error> {
    let mut q_stmt = conn.prepare(
        "SELECT id, marks FROM quiz_questions WHERE quiz_id = ? ORDER BY sort_order",
    )?;
    let q_rows = q_stmt
        .query_map([quiz_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut o_stmt = conn.prepare(
        "SELECT id, is_correct FROM quiz_options WHERE question_id = ? ORDER BY sort_order",
    )?;
    let mut questions = Vec::with_capacity(q_rows.len());
    for (id, marks) in q_rows {
        let options = o_stmt
            .query_map([&id], |r| {
                Ok(OptionKey {
                    id: r.get(0)?,
                    is_correct: r.get::<_, i64>(1)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        questions.push(QuestionKey { id, marks, options });
    }
    Ok(questions)
}

/// Per-question breakdown of a stored submission: what was picked, what was
/// right, and the marks earned. Shared by the student and instructor views.
fn submission_breakdown(
    conn: &Connection,
    quiz_id: &str,
    submission_id: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT q.id, q.question_text, q.marks,
                a.selected_option_id,
                (SELECT id FROM quiz_options o
                 WHERE o.question_id = q.id AND o.is_correct = 1)
         FROM quiz_questions q
         LEFT JOIN quiz_answers a
           ON a.question_id = q.id AND a.submission_id = ?
         WHERE q.quiz_id = ?
         ORDER BY q.sort_order",
    )?;
    let rows = stmt
        .query_map((submission_id, quiz_id), |r| {
            let question_id: String = r.get(0)?;
            let question_text: String = r.get(1)?;
            let marks: i64 = r.get(2)?;
            let selected: Option<String> = r.get(3)?;
            let correct: Option<String> = r.get(4)?;
            let is_correct = selected.is_some() && selected == correct;
            Ok(json!({
                "questionId": question_id,
                "questionText": question_text,
                "marks": marks,
                "selectedOptionId": selected,
                "correctOptionId": correct,
                "isCorrect": is_correct,
                "marksAwarded": if is_correct { marks } else { 0 }
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_quizzes_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "only students can submit quizzes",
    ) {
        return resp;
    }
    let quiz_id = match param_str(req, "quizId") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing quizId", None),
    };
    let Some(raw_answers) = req.params.get("answers").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing/invalid answers", None);
    };

    let mut answers: Vec<AnswerInput> = Vec::with_capacity(raw_answers.len());
    for a in raw_answers {
        let Some(question_id) = a.get("questionId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                "each answer needs a questionId",
                None,
            );
        };
        let selected_option_id = a
            .get("selectedOptionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        answers.push(AnswerInput {
            question_id: question_id.to_string(),
            selected_option_id,
        });
    }

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

    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    let already: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM quiz_submissions WHERE quiz_id = ? AND student_id = ?",
            (&quiz_id, &actor.id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already.is_some() {
        return err(&req.id, "conflict", "quiz already submitted", None);
    }

    let key = match load_answer_key(conn, &quiz_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let submission_id = Uuid::new_v4().to_string();
    let (total_score, records) = grading::evaluate(&key, &submission_id, &answers);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let submitted_at = now_rfc3339();
    if let Err(e) = tx.execute(
        "INSERT INTO quiz_submissions(id, quiz_id, student_id, submitted_at, total_score)
         VALUES(?, ?, ?, ?, ?)",
        (&submission_id, &quiz_id, &actor.id, &submitted_at, total_score),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_submissions" })),
        );
    }
    for rec in &records {
        if let Err(e) = tx.execute(
            "INSERT INTO quiz_answers(id, submission_id, question_id, selected_option_id)
             VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &rec.submission_id,
                &rec.question_id,
                &rec.selected_option_id,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_answers" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "totalScore": total_score,
            "submittedAt": submitted_at
        }),
    )
}

fn handle_quizzes_my_result(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    let submission: Option<(String, String, Option<i64>)> = match conn
        .query_row(
            "SELECT id, submitted_at, total_score FROM quiz_submissions
             WHERE quiz_id = ? AND student_id = ?",
            (&quiz_id, &actor.id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((submission_id, submitted_at, total_score)) = submission else {
        return err(&req.id, "not_found", "no submission for this quiz", None);
    };

    let questions = match submission_breakdown(conn, &quiz_id, &submission_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "quizId": quiz_id,
            "submittedAt": submitted_at,
            "totalScore": total_score,
            "questions": questions
        }),
    )
}

fn handle_quizzes_list_submissions(state: &mut AppState, req: &Request) -> serde_json::Value {
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
            "only the course instructor can list quiz submissions",
            None,
        );
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.student_id, u.name, u.roll_number, s.submitted_at, s.total_score
         FROM quiz_submissions s
         JOIN users u ON u.id = s.student_id
         WHERE s.quiz_id = ?
         ORDER BY s.submitted_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&quiz_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "rollNumber": r.get::<_, Option<String>>(3)?,
                "submittedAt": r.get::<_, String>(4)?,
                "totalScore": r.get::<_, Option<i64>>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_quizzes_submission_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let row: Option<(String, String, String, String, Option<i64>)> = match conn
        .query_row(
            "SELECT s.quiz_id, q.course_id, s.student_id, s.submitted_at, s.total_score
             FROM quiz_submissions s
             JOIN quizzes q ON q.id = s.quiz_id
             WHERE s.id = ?",
            [&submission_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((quiz_id, course_id, student_id, submitted_at, total_score)) = row else {
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
            "only the course instructor can view this submission",
            None,
        );
    }

    let student_name: Option<String> = match conn
        .query_row("SELECT name FROM users WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let questions = match submission_breakdown(conn, &quiz_id, &submission_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "quizId": quiz_id,
            "studentId": student_id,
            "studentName": student_name,
            "submittedAt": submitted_at,
            "totalScore": total_score,
            "questions": questions
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quizzes.submit" => Some(handle_quizzes_submit(state, req)),
        "quizzes.myResult" => Some(handle_quizzes_my_result(state, req)),
        "quizzes.listSubmissions" => Some(handle_quizzes_list_submissions(state, req)),
        "quizzes.submissionDetail" => Some(handle_quizzes_submission_detail(state, req)),
        _ => None,
    }
}
