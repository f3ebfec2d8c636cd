use crate::access::Role;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{now_rfc3339, param_str, require_actor};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let role_raw = match param_str(req, "role") {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing role", None),
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: admin, instructor, student",
            Some(json!({ "role": role_raw })),
        );
    };
    let name = match param_str(req, "name") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let email = param_str(req, "email");
    let roll_number = param_str(req, "rollNumber");

    let user_count: i64 = match conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Bootstrap: the first user of an empty workspace needs no actor but
    // must be an admin. Everyone after that is created by an admin.
    if user_count == 0 {
        if role != Role::Admin {
            return err(
                &req.id,
                "forbidden",
                "the first user of a workspace must be an admin",
                None,
            );
        }
    } else {
        let actor = match require_actor(conn, req) {
            Ok(a) => a,
            Err(resp) => return resp,
        };
        if actor.role != Role::Admin {
            return err(&req.id, "forbidden", "only admins can create users", None);
        }
    }

    // Students and instructors are addressed by roll number; admins by email.
    match role {
        Role::Student | Role::Instructor => {
            if roll_number.as_deref().map_or(true, |r| r.trim().is_empty()) {
                return err(
                    &req.id,
                    "bad_params",
                    "rollNumber is required for students and instructors",
                    None,
                );
            }
        }
        Role::Admin => {
            if email.as_deref().map_or(true, |e| e.trim().is_empty()) {
                return err(&req.id, "bad_params", "email is required for admins", None);
            }
        }
    }

    if let Some(email) = email.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM users WHERE email = ?", [email], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_some() {
            return err(&req.id, "conflict", "email already in use", None);
        }
    }
    if let Some(roll) = roll_number.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM users WHERE roll_number = ?", [roll], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_some() {
            return err(&req.id, "conflict", "roll number already in use", None);
        }
    }

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, role, name, email, roll_number, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            role.as_str(),
            &name,
            &email,
            &roll_number,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({
            "userId": user_id,
            "role": role.as_str(),
            "name": name
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        _ => None,
    }
}
