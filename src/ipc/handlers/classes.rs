use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schema::{self, SubjectDefinition};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Subjects arrive either as the canonical definition array or as the
/// legacy plain string list; both normalize to definitions here.
pub fn parse_subjects_param(
    value: &serde_json::Value,
) -> Result<Vec<SubjectDefinition>, HandlerErr> {
    let Some(items) = value.as_array() else {
        return Err(HandlerErr::new("bad_params", "subjects must be an array"));
    };

    let raw: Vec<SubjectDefinition> = if items.iter().all(|v| v.is_string()) {
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| SubjectDefinition {
                name: s.to_string(),
                max_marks: schema::TEMPLATE_DEFAULT_MAX,
                pass_marks: 0,
            })
            .collect()
    } else {
        serde_json::from_value(value.clone())
            .map_err(|e| HandlerErr::new("bad_params", format!("invalid subjects: {}", e)))?
    };

    schema::prepare_for_save(raw).map_err(|e| HandlerErr::new("bad_params", e.message))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let name = match req.str_param("name") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let teacher_name = req.str_param("teacherName").map(|v| v.trim().to_string());

    let subjects = match req.params.get("subjects") {
        Some(v) => match parse_subjects_param(v) {
            Ok(s) => s,
            Err(e) => return e.response(&req.id),
        },
        None => Vec::new(),
    };
    let subjects_json = match serde_json::to_string(&subjects) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, name, teacher_name, subjects)
         VALUES(?, ?, ?, ?, ?)",
        (&class_id, school_id, &name, &teacher_name, &subjects_json),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "subjects": subjects }),
    )
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };

    // Correlated subquery for the count to avoid double-counting via joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.teacher_name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         WHERE c.school_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let teacher_name: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "teacherName": teacher_name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ? AND school_id = ?",
            (class_id, school_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (table, sql) in [
        (
            "score_sheets",
            "DELETE FROM score_sheets WHERE student_id IN
               (SELECT id FROM students WHERE class_id = ?)",
        ),
        (
            "profile_requests",
            "DELETE FROM profile_requests WHERE student_id IN
               (SELECT id FROM students WHERE class_id = ?)",
        ),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    match tx.commit() {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_tx_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
