use crate::access;
use crate::certificate;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{access_err, calc_err, param_str, require_actor};
use crate::ipc::types::{AppState, Request};
use crate::progress;
use serde_json::json;

fn handle_progress_course(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    match progress::course_progress(conn, &course_id, &actor.id) {
        Ok(p) => ok(&req.id, json!(p)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_performance_course(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    let assignment = match progress::assignment_performance(conn, &course_id, &actor.id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    let quiz = match progress::quiz_performance(conn, &course_id, &actor.id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };

    ok(&req.id, json!({ "assignment": assignment, "quiz": quiz }))
}

fn handle_certificates_issue(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    // Below the threshold is a normal outcome, not an error: the caller
    // polls this until the certificate materializes.
    match certificate::issue_if_completed(conn, &course_id, &actor.id) {
        Ok(cert) => ok(&req.id, json!({ "certificate": cert })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_certificates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = access::ensure_enrolled(conn, &course_id, &actor.id) {
        return access_err(&req.id, e);
    }

    match certificate::find_certificate(conn, &course_id, &actor.id) {
        Ok(Some(cert)) => ok(&req.id, json!(cert)),
        Ok(None) => err(&req.id, "not_found", "no certificate for this course", None),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.course" => Some(handle_progress_course(state, req)),
        "performance.course" => Some(handle_performance_course(state, req)),
        "certificates.issue" => Some(handle_certificates_issue(state, req)),
        "certificates.get" => Some(handle_certificates_get(state, req)),
        _ => None,
    }
}
