use crate::grading::{self, MarkMap, RankSource, ResultState, Term};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schema::SubjectDefinition;
use crate::store::{self, ScoreSheetRow};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

/// Mark maps arrive loosely typed; anything non-numeric coerces to 0 so
/// the grading functions can never hit a numeric error.
fn parse_mark_map(value: &serde_json::Value) -> Result<MarkMap, HandlerErr> {
    let Some(obj) = value.as_object() else {
        return Err(HandlerErr::new(
            "bad_params",
            "subjectMarks must be an object",
        ));
    };
    let mut map = MarkMap::new();
    for (name, v) in obj {
        map.insert(name.clone(), v.as_i64().unwrap_or(0));
    }
    Ok(map)
}

fn parse_term(req: &Request) -> Result<Term, HandlerErr> {
    let Some(raw) = req.str_param("term") else {
        return Err(HandlerErr::new("bad_params", "missing term"));
    };
    Term::parse(raw).ok_or_else(|| {
        HandlerErr::with_details(
            "bad_params",
            "term must be 'Term 1' or 'Term 2'",
            json!({ "term": raw }),
        )
    })
}

fn class_schema(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
) -> Result<Vec<SubjectDefinition>, HandlerErr> {
    match store::get_schema(conn, school_id, class_id)? {
        Some(s) => Ok(s),
        None => Err(HandlerErr::new("not_found", "class not found")),
    }
}

fn sheet_json(
    sheet: &ScoreSheetRow,
    schema: &[SubjectDefinition],
    persisted: bool,
) -> serde_json::Value {
    let max_total = grading::max_total(&sheet.subject_marks, schema);
    let percentage = grading::percentage(sheet.total, max_total);
    json!({
        "studentId": sheet.student_id,
        "term": sheet.term,
        "subjectMarks": sheet.subject_marks,
        "total": sheet.total,
        "grade": sheet.grade,
        "maxTotal": max_total,
        "percentage": percentage,
        "overLimit": grading::over_limit(&sheet.subject_marks, schema),
        "resultState": ResultState::for_grade(&sheet.grade).as_str(),
        "persisted": persisted
    })
}

fn handle_marks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let term = match parse_term(req) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };

    let student = match store::get_student(conn, school_id, student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let schema = match class_schema(conn, school_id, &student.class_id) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    match store::get_score_sheet(conn, school_id, student_id, term.as_str()) {
        Ok(Some(sheet)) => ok(&req.id, sheet_json(&sheet, &schema, true)),
        Ok(None) => {
            // Lazy view: zero-fill against the current schema, grade F as
            // the legacy not-published placeholder. Nothing is written
            // until an explicit save.
            let sheet = ScoreSheetRow {
                student_id: student_id.to_string(),
                term: term.as_str().to_string(),
                subject_marks: schema
                    .iter()
                    .map(|s| (s.name.clone(), 0))
                    .collect(),
                total: 0,
                grade: "F".to_string(),
            };
            ok(&req.id, sheet_json(&sheet, &schema, false))
        }
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

fn save_one_sheet(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    term: Term,
    marks: MarkMap,
    schema: &[SubjectDefinition],
) -> Result<ScoreSheetRow, HandlerErr> {
    // Total and grade are recomputed here from the current schema on every
    // write; the stored copies are redundant fast-read values only.
    let computed = grading::compute_sheet(&marks, schema);
    let sheet = ScoreSheetRow {
        student_id: student_id.to_string(),
        term: term.as_str().to_string(),
        subject_marks: marks,
        total: computed.total,
        grade: computed.grade.to_string(),
    };
    store::save_score_sheet(conn, school_id, &sheet)?;
    Ok(sheet)
}

fn handle_marks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let term = match parse_term(req) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let marks = match req.params.get("subjectMarks") {
        Some(v) => match parse_mark_map(v) {
            Ok(m) => m,
            Err(e) => return e.response(&req.id),
        },
        None => return err(&req.id, "bad_params", "missing subjectMarks", None),
    };

    let student = match store::get_student(conn, school_id, student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let schema = match class_schema(conn, school_id, &student.class_id) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    match save_one_sheet(conn, school_id, student_id, term, marks, &schema) {
        Ok(sheet) => ok(&req.id, sheet_json(&sheet, &schema, true)),
        Err(e) => e.response(&req.id),
    }
}

/// One save per student, sequential, not atomic across students. A failed
/// entry is reported and the loop moves on; the caller sees the partial
/// result instead of a silent success.
fn handle_marks_save_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let term = match parse_term(req) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };

    let schema = match class_schema(conn, school_id, class_id) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let roster = match store::list_students(conn, school_id, class_id) {
        Ok(s) => s,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let roster_ids: HashMap<&str, ()> = roster.iter().map(|s| (s.id.as_str(), ())).collect();

    let mut saved: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": "entry missing studentId"
            }));
            continue;
        };
        if !roster_ids.contains_key(student_id) {
            errors.push(json!({
                "index": i,
                "studentId": student_id,
                "code": "not_found",
                "message": "student not in class"
            }));
            continue;
        }
        let marks = match entry.get("subjectMarks").map(parse_mark_map) {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                errors.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "code": e.code,
                    "message": e.message
                }));
                continue;
            }
            None => {
                errors.push(json!({
                    "index": i,
                    "studentId": student_id,
                    "code": "bad_params",
                    "message": "entry missing subjectMarks"
                }));
                continue;
            }
        };

        match save_one_sheet(conn, school_id, student_id, term, marks, &schema) {
            Ok(_) => saved += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "studentId": student_id,
                "code": e.code,
                "message": e.message
            })),
        }
    }

    let mut result = json!({ "saved": saved });
    if !errors.is_empty() {
        if let Some(obj) = result.as_object_mut() {
            obj.insert("failed".into(), json!(errors.len()));
            obj.insert("errors".into(), json!(errors));
        }
    }
    ok(&req.id, result)
}

fn handle_rank_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(class_id) = req.str_param("classId") else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let term = match parse_term(req) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };

    let schema = match class_schema(conn, school_id, class_id) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let students = match store::list_students(conn, school_id, class_id) {
        Ok(s) => s,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let sheets = match store::list_score_sheets(conn, school_id, class_id, term.as_str()) {
        Ok(s) => s,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let mut by_student: HashMap<String, ScoreSheetRow> = sheets
        .into_iter()
        .map(|s| (s.student_id.clone(), s))
        .collect();

    // Roster order (reg_no ascending) is the tie-break order; students
    // without a sheet rank with total 0 and the '-' placeholder grade.
    let sources: Vec<RankSource> = students
        .iter()
        .map(|stu| match by_student.remove(&stu.id) {
            Some(sheet) => RankSource {
                reg_no: stu.reg_no.clone(),
                name: stu.name.clone(),
                total: sheet.total,
                grade: sheet.grade,
                subject_marks: sheet.subject_marks,
            },
            None => RankSource {
                reg_no: stu.reg_no.clone(),
                name: stu.name.clone(),
                total: 0,
                grade: "-".to_string(),
                subject_marks: MarkMap::new(),
            },
        })
        .collect();

    let rows = grading::rank_rows(sources);
    ok(
        &req.id,
        json!({
            "term": term.as_str(),
            "subjects": schema.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            "rows": rows
        }),
    )
}

/// Public result lookup: reg no + dob, Term 1 only, read-only.
fn handle_public_result(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(school_id) = req.str_param("schoolId") else {
        return err(&req.id, "bad_params", "missing schoolId", None);
    };
    let Some(reg_no) = req.str_param("regNo") else {
        return err(&req.id, "bad_params", "missing regNo", None);
    };
    let Some(dob) = req.str_param("dob") else {
        return err(&req.id, "bad_params", "missing dob", None);
    };

    let student = match store::find_student_by_reg(conn, school_id, reg_no, dob) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "no matching student", None),
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };
    let schema = match class_schema(conn, school_id, &student.class_id) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };

    let student_obj = json!({
        "studentId": student.id,
        "regNo": student.reg_no,
        "name": student.name,
        "classId": student.class_id
    });

    match store::get_score_sheet(conn, school_id, &student.id, Term::Term1.as_str()) {
        Ok(Some(sheet)) => ok(
            &req.id,
            json!({ "student": student_obj, "marks": sheet_json(&sheet, &schema, true) }),
        ),
        Ok(None) => ok(
            &req.id,
            json!({
                "student": student_obj,
                "marks": serde_json::Value::Null,
                "resultState": ResultState::Absent.as_str()
            }),
        ),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.get" => Some(handle_marks_get(state, req)),
        "marks.save" => Some(handle_marks_save(state, req)),
        "marks.saveAll" => Some(handle_marks_save_all(state, req)),
        "reports.rankList" => Some(handle_rank_list(state, req)),
        "public.result" => Some(handle_public_result(state, req)),
        _ => None,
    }
}
