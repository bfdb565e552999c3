use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolresultd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolresultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    school_id: String,
    class_id: String,
    student_ids: Vec<String>,
}

fn setup_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    roster: &[(&str, &str)],
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        stdin,
        reader,
        "s2",
        "school.register",
        json!({ "name": "Hill Valley High" }),
    );
    let school_id = school
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();

    let class = request_ok(
        stdin,
        reader,
        "s3",
        "classes.create",
        json!({
            "schoolId": school_id,
            "name": "10A",
            "teacherName": "Ms Rivera",
            "subjects": [
                { "name": "Maths", "maxMarks": 100, "passMarks": 35 },
                { "name": "English", "maxMarks": 100, "passMarks": 35 }
            ]
        }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let students: Vec<serde_json::Value> = roster
        .iter()
        .map(|(reg, name)| json!({ "regNo": reg, "name": name, "dob": "2010-01-01" }))
        .collect();
    let added = request_ok(
        stdin,
        reader,
        "s4",
        "students.add",
        json!({ "schoolId": school_id, "classId": class_id, "students": students }),
    );
    let student_ids = added
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
        .iter()
        .map(|s| {
            s.get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string()
        })
        .collect();

    Fixture {
        school_id,
        class_id,
        student_ids,
    }
}

#[test]
fn save_marks_then_rank_list_orders_by_total_descending() {
    let workspace = temp_dir("resultd-rank");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("001", "Asha"), ("002", "Binu"), ("003", "Chitra")],
    );

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "marks.save",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1",
            "subjectMarks": { "Maths": 95, "English": 82 }
        }),
    );
    assert_eq!(saved.get("total").and_then(|v| v.as_i64()), Some(177));
    assert_eq!(saved.get("grade").and_then(|v| v.as_str()), Some("A"));
    let pct = saved
        .get("percentage")
        .and_then(|v| v.as_f64())
        .expect("percentage");
    assert!((pct - 88.5).abs() < 1e-9);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "marks.save",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[1],
            "term": "Term 1",
            "subjectMarks": { "Maths": 60, "English": 70 }
        }),
    );
    // No sheet at all for student 003.

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "m3",
        "reports.rankList",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "term": "Term 1"
        }),
    );
    let rows = report.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 3);

    let summary: Vec<(i64, &str, i64, &str)> = rows
        .iter()
        .map(|r| {
            (
                r.get("rank").and_then(|v| v.as_i64()).expect("rank"),
                r.get("regNo").and_then(|v| v.as_str()).expect("regNo"),
                r.get("total").and_then(|v| v.as_i64()).expect("total"),
                r.get("grade").and_then(|v| v.as_str()).expect("grade"),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (1, "001", 177, "A"),
            (2, "002", 130, "B"),
            (3, "003", 0, "-"),
        ]
    );
}

#[test]
fn rank_list_keeps_roster_order_on_tied_totals() {
    let workspace = temp_dir("resultd-rank-ties");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("001", "Asha"), ("002", "Binu"), ("003", "Chitra")],
    );

    for (i, sid) in fx.student_ids.iter().enumerate() {
        let marks = if i == 1 {
            json!({ "Maths": 90, "English": 90 })
        } else {
            json!({ "Maths": 80, "English": 80 })
        };
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("t{}", i),
            "marks.save",
            json!({
                "schoolId": fx.school_id,
                "studentId": sid,
                "term": "Term 1",
                "subjectMarks": marks
            }),
        );
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "t9",
        "reports.rankList",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "term": "Term 1"
        }),
    );
    let order: Vec<&str> = report
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .map(|r| r.get("regNo").and_then(|v| v.as_str()).expect("regNo"))
        .collect();
    // 001 and 003 tie on 160; consecutive ranks, reg-no order preserved.
    assert_eq!(order, vec!["002", "001", "003"]);
}

#[test]
fn saving_identical_sheet_twice_is_idempotent() {
    let workspace = temp_dir("resultd-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(&mut stdin, &mut reader, &workspace, &[("001", "Asha")]);

    let params = json!({
        "schoolId": fx.school_id,
        "studentId": fx.student_ids[0],
        "term": "Term 1",
        "subjectMarks": { "Maths": 48, "English": 52 }
    });
    let first = request_ok(&mut stdin, &mut reader, "i1", "marks.save", params.clone());
    let second = request_ok(&mut stdin, &mut reader, "i2", "marks.save", params);
    assert_eq!(first, second);

    let read_back = request_ok(
        &mut stdin,
        &mut reader,
        "i3",
        "marks.get",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1"
        }),
    );
    assert_eq!(read_back.get("total").and_then(|v| v.as_i64()), Some(100));
    assert_eq!(
        read_back.get("persisted").and_then(|v| v.as_bool()),
        Some(true)
    );
}

#[test]
fn terms_are_independent_sheets() {
    let workspace = temp_dir("resultd-terms");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(&mut stdin, &mut reader, &workspace, &[("001", "Asha")]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "x1",
        "marks.save",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1",
            "subjectMarks": { "Maths": 90, "English": 90 }
        }),
    );

    // Term 2 was never saved: lazy zero-filled view, not persisted.
    let term2 = request_ok(
        &mut stdin,
        &mut reader,
        "x2",
        "marks.get",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 2"
        }),
    );
    assert_eq!(term2.get("total").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(term2.get("grade").and_then(|v| v.as_str()), Some("F"));
    assert_eq!(
        term2.get("persisted").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        term2.get("resultState").and_then(|v| v.as_str()),
        Some("legacy_fail")
    );

    let bad_term = request(
        &mut stdin,
        &mut reader,
        "x3",
        "marks.get",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 3"
        }),
    );
    assert_eq!(bad_term.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        bad_term
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
}

#[test]
fn dropping_a_subject_keeps_orphaned_marks_in_total_but_not_max() {
    let workspace = temp_dir("resultd-orphan");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(&mut stdin, &mut reader, &workspace, &[("001", "Asha")]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "marks.save",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1",
            "subjectMarks": { "Maths": 95, "English": 82 }
        }),
    );

    // Replace the schema with Maths only; the stored sheet is untouched.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "o2",
        "subjects.save",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "subjects": [{ "name": "Maths", "maxMarks": 100, "passMarks": 35 }]
        }),
    );

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "o3",
        "marks.get",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1"
        }),
    );
    assert_eq!(sheet.get("total").and_then(|v| v.as_i64()), Some(177));
    assert_eq!(sheet.get("maxTotal").and_then(|v| v.as_i64()), Some(100));
    let pct = sheet
        .get("percentage")
        .and_then(|v| v.as_f64())
        .expect("percentage");
    assert!((pct - 177.0).abs() < 1e-9);
    let marks = sheet
        .get("subjectMarks")
        .and_then(|v| v.as_object())
        .expect("subjectMarks");
    assert_eq!(marks.get("English").and_then(|v| v.as_i64()), Some(82));
}

#[test]
fn over_limit_marks_are_flagged_but_still_saved() {
    let workspace = temp_dir("resultd-overlimit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(&mut stdin, &mut reader, &workspace, &[("001", "Asha")]);

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "v1",
        "marks.save",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1",
            "subjectMarks": { "Maths": 120, "English": 50 }
        }),
    );
    assert_eq!(saved.get("total").and_then(|v| v.as_i64()), Some(170));
    assert_eq!(
        saved.get("overLimit").and_then(|v| v.as_array()).map(|a| a
            .iter()
            .filter_map(|x| x.as_str())
            .collect::<Vec<_>>()),
        Some(vec!["Maths"])
    );
}

#[test]
fn save_all_reports_partial_success() {
    let workspace = temp_dir("resultd-saveall");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("001", "Asha"), ("002", "Binu")],
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "marks.saveAll",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "term": "Term 1",
            "entries": [
                { "studentId": fx.student_ids[0], "subjectMarks": { "Maths": 40, "English": 40 } },
                { "studentId": "not-a-student", "subjectMarks": { "Maths": 10 } },
                { "studentId": fx.student_ids[1], "subjectMarks": { "Maths": 55, "English": 35 } }
            ]
        }),
    );
    assert_eq!(result.get("saved").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(result.get("failed").and_then(|v| v.as_i64()), Some(1));
    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].get("code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    // The entries around the failed one still landed.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "b2",
        "reports.rankList",
        json!({
            "schoolId": fx.school_id,
            "classId": fx.class_id,
            "term": "Term 1"
        }),
    );
    let totals: Vec<i64> = report
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .map(|r| r.get("total").and_then(|v| v.as_i64()).expect("total"))
        .collect();
    assert_eq!(totals, vec![90, 80]);
}

#[test]
fn public_result_finds_term1_sheet_by_reg_and_dob() {
    let workspace = temp_dir("resultd-public");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_class(&mut stdin, &mut reader, &workspace, &[("001", "Asha")]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "marks.save",
        json!({
            "schoolId": fx.school_id,
            "studentId": fx.student_ids[0],
            "term": "Term 1",
            "subjectMarks": { "Maths": 95, "English": 90 }
        }),
    );

    let found = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "public.result",
        json!({ "schoolId": fx.school_id, "regNo": "001", "dob": "2010-01-01" }),
    );
    assert_eq!(
        found
            .get("student")
            .and_then(|s| s.get("name"))
            .and_then(|v| v.as_str()),
        Some("Asha")
    );
    assert_eq!(
        found
            .get("marks")
            .and_then(|m| m.get("grade"))
            .and_then(|v| v.as_str()),
        Some("A+")
    );

    let miss = request(
        &mut stdin,
        &mut reader,
        "p3",
        "public.result",
        json!({ "schoolId": fx.school_id, "regNo": "001", "dob": "1999-09-09" }),
    );
    assert_eq!(miss.get("ok").and_then(|v| v.as_bool()), Some(false));
}
