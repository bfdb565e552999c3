use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::classes::parse_subjects_param;
use crate::ipc::types::{AppState, Request};
use crate::schema::{self, SubjectDefinition};
use crate::store;
use serde_json::json;

fn handle_subjects_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    match store::get_schema(conn, school_id, class_id) {
        Ok(Some(subjects)) => ok(&req.id, json!({ "subjects": subjects })),
        Ok(None) => err(&req.id, "not_found", "class not found", None),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

/// Commit of the staged edit: the caller holds the working copy and sends
/// the whole replacement array in one save. Stored score sheets are left
/// untouched; marks for removed subjects become orphans but keep counting
/// toward totals.
fn handle_subjects_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(raw) = req.params.get("subjects") else {
        return err(&req.id, "bad_params", "missing subjects", None);
    };

    let subjects = match parse_subjects_param(raw) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    match store::save_schema(conn, school_id, class_id, &subjects) {
        Ok(true) => ok(&req.id, json!({ "subjects": subjects })),
        Ok(false) => err(&req.id, "not_found", "class not found", None),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

/// Destructive replace with a named preset. Not a merge.
fn handle_subjects_apply_template(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(template) = req.str_param("template") else {
        return err(&req.id, "bad_params", "missing template", None);
    };

    let Some(subjects) = schema::template_schema(template) else {
        return err(
            &req.id,
            "not_found",
            "unknown template",
            Some(json!({ "template": template })),
        );
    };

    match store::save_schema(conn, school_id, class_id, &subjects) {
        Ok(true) => ok(
            &req.id,
            json!({ "template": template, "subjects": subjects }),
        ),
        Ok(false) => err(&req.id, "not_found", "class not found", None),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn handle_subjects_templates(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let templates: Vec<serde_json::Value> = schema::SUBJECT_TEMPLATES
        .iter()
        .map(|(key, names)| json!({ "key": key, "subjects": names }))
        .collect();
    ok(&req.id, json!({ "templates": templates }))
}

/// Entry-form staging rows: echo the submitted rows plus one trailing
/// blank row inheriting the previous row's marks configuration.
fn handle_subjects_entry_rows(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let rows: Vec<SubjectDefinition> = match req.params.get("rows") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(r) => r,
            Err(e) => return err(&req.id, "bad_params", format!("invalid rows: {}", e), None),
        },
        None => Vec::new(),
    };

    ok(&req.id, json!({ "rows": schema::with_blank_row(rows) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.get" => Some(handle_subjects_get(state, req)),
        "subjects.save" => Some(handle_subjects_save(state, req)),
        "subjects.applyTemplate" => Some(handle_subjects_apply_template(state, req)),
        "subjects.templates" => Some(handle_subjects_templates(state, req)),
        "subjects.entryRows" => Some(handle_subjects_entry_rows(state, req)),
        _ => None,
    }
}
