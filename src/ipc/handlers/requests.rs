use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ProfileRequestRow};
use serde_json::json;

fn request_json(r: &ProfileRequestRow) -> serde_json::Value {
    json!({
        "id": r.id,
        "studentId": r.student_id,
        "field": r.field,
        "newValue": r.new_value,
        "status": r.status,
        "createdAt": r.created_at
    })
}

fn handle_requests_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(field) = req.str_param("field") else {
        return err(&req.id, "bad_params", "missing field", None);
    };
    if store::identity_column(field).is_none() {
        return err(
            &req.id,
            "bad_params",
            "field is not an editable identity field",
            Some(json!({ "field": field, "allowed": store::REQUEST_FIELDS })),
        );
    }
    let new_value = match req.str_param("newValue") {
        Some(v) if !v.trim().is_empty() => v,
        _ => return err(&req.id, "bad_params", "newValue must not be empty", None),
    };

    match store::get_student(conn, school_id, student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return HandlerErr::from(e).response(&req.id),
    }

    // One open request per field at a time; a second submission would
    // otherwise sit in the teacher queue as an ambiguous duplicate.
    match store::has_pending_request(conn, student_id, field) {
        Ok(true) => {
            return err(
                &req.id,
                "state_conflict",
                "a pending request for this field already exists",
                Some(json!({ "field": field })),
            )
        }
        Ok(false) => {}
        Err(e) => return HandlerErr::from(e).response(&req.id),
    }

    match store::create_change_request(conn, school_id, student_id, field, new_value) {
        Ok(row) => ok(&req.id, json!({ "request": request_json(&row) })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_requests_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    match store::list_requests(conn, school_id, student_id) {
        Ok(rows) => ok(
            &req.id,
            json!({ "requests": rows.iter().map(request_json).collect::<Vec<_>>() }),
        ),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_requests_pending_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    match store::list_pending_requests(conn, school_id, class_id) {
        Ok(rows) => {
            let requests: Vec<serde_json::Value> = rows
                .iter()
                .map(|r| {
                    let mut v = request_json(&r.request);
                    if let Some(obj) = v.as_object_mut() {
                        obj.insert("studentName".into(), json!(r.student_name));
                        obj.insert("regNo".into(), json!(r.reg_no));
                    }
                    v
                })
                .collect();
            ok(&req.id, json!({ "requests": requests }))
        }
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

/// Teacher adjudication. The classId parameter is the caller's own class;
/// requests from students outside it are refused here, not in the UI.
fn handle_requests_adjudicate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(request_id) = req.str_param("requestId") else {
        return err(&req.id, "bad_params", "missing requestId", None);
    };
    let decision = match req.str_param("decision") {
        Some("APPROVED") => "APPROVED",
        Some("REJECTED") => "REJECTED",
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                "decision must be APPROVED or REJECTED",
                Some(json!({ "decision": other })),
            )
        }
        None => return err(&req.id, "bad_params", "missing decision", None),
    };

    let (request, student_class) = match store::get_request(conn, school_id, request_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "request not found", None),
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };

    if student_class != class_id {
        return err(
            &req.id,
            "forbidden",
            "request belongs to a student outside this class",
            None,
        );
    }
    if request.status != "PENDING" {
        return err(
            &req.id,
            "state_conflict",
            "request was already adjudicated",
            Some(json!({ "status": request.status })),
        );
    }

    // Approval applies the new value verbatim; the status flip and the
    // identity overwrite commit or roll back together.
    let identity = if decision == "APPROVED" {
        let column = match store::identity_column(&request.field) {
            Some(c) => c,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "request carries an unknown field",
                    Some(json!({ "field": request.field })),
                )
            }
        };
        Some((request.student_id.as_str(), column, request.new_value.as_str()))
    } else {
        None
    };

    if let Err(e) = store::adjudicate_request(conn, request_id, decision, identity) {
        return HandlerErr::from(e).response(&req.id);
    }

    ok(
        &req.id,
        json!({ "requestId": request_id, "status": decision }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "requests.create" => Some(handle_requests_create(state, req)),
        "requests.listForStudent" => Some(handle_requests_for_student(state, req)),
        "requests.pendingForClass" => Some(handle_requests_pending_for_class(state, req)),
        "requests.adjudicate" => Some(handle_requests_adjudicate(state, req)),
        _ => None,
    }
}
