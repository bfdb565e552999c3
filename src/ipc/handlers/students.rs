use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, NewStudent};
use rusqlite::OptionalExtension;
use serde_json::json;

fn student_json(s: &store::StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "classId": s.class_id,
        "regNo": s.reg_no,
        "name": s.name,
        "dob": s.dob,
        "fatherName": s.father_name,
        "motherName": s.mother_name
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    match store::list_students(conn, school_id, class_id) {
        Ok(students) => ok(
            &req.id,
            json!({ "students": students.iter().map(student_json).collect::<Vec<_>>() }),
        ),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

/// Bulk roster insert. Rows are inserted one by one; a bad row (blank
/// fields, duplicate regNo) is reported and skipped, the rest still land.
fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let Some(entries) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing students[]", None);
    };

    let class_exists: Option<i64> = match conn
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
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let mut added: Vec<serde_json::Value> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let reg_no = entry.get("regNo").and_then(|v| v.as_str()).unwrap_or("");
        let name = entry.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if reg_no.trim().is_empty() || name.trim().is_empty() {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "regNo and name are required"
            }));
            continue;
        }

        let student = NewStudent {
            reg_no: reg_no.trim().to_string(),
            name: name.trim().to_string(),
            dob: entry
                .get("dob")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            father_name: entry
                .get("fatherName")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            mother_name: entry
                .get("motherName")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
        };

        match store::insert_student(conn, school_id, class_id, &student) {
            Ok(id) => added.push(json!({ "index": i, "studentId": id, "regNo": student.reg_no })),
            Err(e) => errors.push(json!({
                "index": i,
                "regNo": student.reg_no,
                "code": e.code,
                "message": e.message
            })),
        }
    }

    let mut result = json!({ "added": added.len(), "students": added });
    if !errors.is_empty() {
        if let Some(obj) = result.as_object_mut() {
            obj.insert("failed".into(), json!(errors.len()));
            obj.insert("errors".into(), json!(errors));
        }
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.add" => Some(handle_students_add(state, req)),
        _ => None,
    }
}
