use chrono::Utc;
use rusqlite::Connection;

use crate::access::{self, AccessError, Actor, Role};
use crate::ipc::error::err;
use crate::ipc::types::Request;
use crate::progress::CalcError;

pub fn param_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn access_err(id: &str, e: AccessError) -> serde_json::Value {
    err(id, e.code, e.message, None)
}

pub fn calc_err(id: &str, e: CalcError) -> serde_json::Value {
    err(id, &e.code, e.message, None)
}

/// Resolves the request's `actorId` to a known user, or builds the error
/// response. Nearly every method starts here.
pub fn require_actor(
    conn: &Connection,
    req: &Request,
) -> Result<Actor, serde_json::Value> {
    let Some(actor_id) = param_str(req, "actorId") else {
        return Err(err(&req.id, "bad_params", "missing actorId", None));
    };
    access::resolve_actor(conn, &actor_id).map_err(|e| access_err(&req.id, e))
}

pub fn require_role(
    actor: &Actor,
    role: Role,
    req: &Request,
    message: &str,
) -> Result<(), serde_json::Value> {
    if actor.role == role {
        Ok(())
    } else {
        Err(err(&req.id, "forbidden", message, None))
    }
}
