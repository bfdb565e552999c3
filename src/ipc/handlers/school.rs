use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn handle_school_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.str_param("name") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    match store::create_school(conn, &name) {
        Ok(school_id) => ok(&req.id, json!({ "schoolId": school_id, "name": name })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_school_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };

    match store::get_school(conn, school_id) {
        Ok(Some((name, created_at))) => ok(
            &req.id,
            json!({ "schoolId": school_id, "name": name, "createdAt": created_at }),
        ),
        Ok(None) => err(&req.id, "not_found", "school not found", None),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "school.register" => Some(handle_school_register(state, req)),
        "school.get" => Some(handle_school_get(state, req)),
        _ => None,
    }
}
