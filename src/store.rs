use crate::grading::MarkMap;
use crate::schema::{self, SubjectDefinition};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Persistence failure carried up to the handler layer, which turns it
/// into a structured IPC error response.
#[derive(Debug)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    fn query(e: impl ToString) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
        }
    }

    fn insert(e: impl ToString) -> Self {
        Self {
            code: "db_insert_failed",
            message: e.to_string(),
        }
    }

    fn update(e: impl ToString) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
        }
    }

    fn tx(e: impl ToString) -> Self {
        Self {
            code: "db_tx_failed",
            message: e.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub reg_no: String,
    pub name: String,
    pub dob: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScoreSheetRow {
    pub student_id: String,
    pub term: String,
    pub subject_marks: MarkMap,
    pub total: i64,
    pub grade: String,
}

#[derive(Debug, Clone)]
pub struct ProfileRequestRow {
    pub id: String,
    pub student_id: String,
    pub field: String,
    pub new_value: String,
    pub status: String,
    pub created_at: String,
}

/// Teacher-queue view of a pending request, enriched for display.
#[derive(Debug, Clone)]
pub struct PendingRequestRow {
    pub request: ProfileRequestRow,
    pub student_name: String,
    pub reg_no: String,
}

pub const REQUEST_FIELDS: &[&str] = &["name", "dob", "fatherName", "motherName"];

/// Wire field name -> students column. `None` for anything outside the
/// four editable identity fields.
pub fn identity_column(field: &str) -> Option<&'static str> {
    match field {
        "name" => Some("name"),
        "dob" => Some("dob"),
        "fatherName" => Some("father_name"),
        "motherName" => Some("mother_name"),
        _ => None,
    }
}

fn parse_mark_map(raw: &str) -> MarkMap {
    // Malformed or non-numeric entries coerce to 0; a mark read can never
    // fail the caller.
    let value: serde_json::Value = serde_json::from_str(raw).unwrap_or_default();
    let mut map = MarkMap::new();
    if let Some(obj) = value.as_object() {
        for (k, v) in obj {
            map.insert(k.clone(), v.as_i64().unwrap_or(0));
        }
    }
    map
}

// --- schools ---

pub fn create_school(conn: &Connection, name: &str) -> StoreResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
        (&id, name, Utc::now().to_rfc3339()),
    )
    .map_err(StoreError::insert)?;
    Ok(id)
}

pub fn get_school(conn: &Connection, school_id: &str) -> StoreResult<Option<(String, String)>> {
    conn.query_row(
        "SELECT name, created_at FROM schools WHERE id = ?",
        [school_id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(StoreError::query)
}

// --- subject schema ---

pub fn get_schema(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
) -> StoreResult<Option<Vec<SubjectDefinition>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT subjects FROM classes WHERE id = ? AND school_id = ?",
            (class_id, school_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::query)?;

    match raw {
        Some(raw) => {
            let defs = schema::parse_stored_subjects(&raw).map_err(StoreError::query)?;
            Ok(Some(defs))
        }
        None => Ok(None),
    }
}

/// Full replacement of the class's current schema in one write. There is
/// no version history; the previous schema is gone after this.
pub fn save_schema(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
    subjects: &[SubjectDefinition],
) -> StoreResult<bool> {
    let json = serde_json::to_string(subjects).map_err(StoreError::update)?;
    let changed = conn
        .execute(
            "UPDATE classes SET subjects = ? WHERE id = ? AND school_id = ?",
            (&json, class_id, school_id),
        )
        .map_err(StoreError::update)?;
    Ok(changed > 0)
}

// --- students ---

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        class_id: row.get(1)?,
        reg_no: row.get(2)?,
        name: row.get(3)?,
        dob: row.get(4)?,
        father_name: row.get(5)?,
        mother_name: row.get(6)?,
    })
}

const STUDENT_COLS: &str = "id, class_id, reg_no, name, dob, father_name, mother_name";

pub fn list_students(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
) -> StoreResult<Vec<StudentRow>> {
    let sql = format!(
        "SELECT {} FROM students WHERE school_id = ? AND class_id = ? ORDER BY reg_no",
        STUDENT_COLS
    );
    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    stmt.query_map((school_id, class_id), |r| student_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

pub fn get_student(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
) -> StoreResult<Option<StudentRow>> {
    let sql = format!(
        "SELECT {} FROM students WHERE id = ? AND school_id = ?",
        STUDENT_COLS
    );
    conn.query_row(&sql, (student_id, school_id), |r| student_from_row(r))
        .optional()
        .map_err(StoreError::query)
}

pub fn find_student_by_reg(
    conn: &Connection,
    school_id: &str,
    reg_no: &str,
    dob: &str,
) -> StoreResult<Option<StudentRow>> {
    let sql = format!(
        "SELECT {} FROM students WHERE school_id = ? AND reg_no = ? AND dob = ?",
        STUDENT_COLS
    );
    conn.query_row(&sql, (school_id, reg_no, dob), |r| student_from_row(r))
        .optional()
        .map_err(StoreError::query)
}

pub struct NewStudent {
    pub reg_no: String,
    pub name: String,
    pub dob: Option<String>,
    pub father_name: Option<String>,
    pub mother_name: Option<String>,
}

pub fn insert_student(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
    student: &NewStudent,
) -> StoreResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, school_id, class_id, reg_no, name, dob, father_name, mother_name)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            school_id,
            class_id,
            &student.reg_no,
            &student.name,
            &student.dob,
            &student.father_name,
            &student.mother_name,
        ),
    )
    .map_err(StoreError::insert)?;
    Ok(id)
}

// --- score sheets ---

pub fn get_score_sheet(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    term: &str,
) -> StoreResult<Option<ScoreSheetRow>> {
    conn.query_row(
        "SELECT student_id, term, subject_marks, total, grade
         FROM score_sheets WHERE school_id = ? AND student_id = ? AND term = ?",
        (school_id, student_id, term),
        |r| {
            let raw: String = r.get(2)?;
            Ok(ScoreSheetRow {
                student_id: r.get(0)?,
                term: r.get(1)?,
                subject_marks: parse_mark_map(&raw),
                total: r.get(3)?,
                grade: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::query)
}

/// Upsert keyed by (student, term). Writing identical input twice lands on
/// identical stored state.
pub fn save_score_sheet(
    conn: &Connection,
    school_id: &str,
    sheet: &ScoreSheetRow,
) -> StoreResult<()> {
    let json = serde_json::to_string(&sheet.subject_marks).map_err(StoreError::insert)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO score_sheets(id, school_id, student_id, term, subject_marks, total, grade)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, term) DO UPDATE SET
           subject_marks = excluded.subject_marks,
           total = excluded.total,
           grade = excluded.grade",
        (
            &id,
            school_id,
            &sheet.student_id,
            &sheet.term,
            &json,
            sheet.total,
            &sheet.grade,
        ),
    )
    .map_err(StoreError::insert)?;
    Ok(())
}

pub fn list_score_sheets(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
    term: &str,
) -> StoreResult<Vec<ScoreSheetRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT ss.student_id, ss.term, ss.subject_marks, ss.total, ss.grade
             FROM score_sheets ss
             JOIN students s ON s.id = ss.student_id
             WHERE ss.school_id = ? AND s.class_id = ? AND ss.term = ?",
        )
        .map_err(StoreError::query)?;
    stmt.query_map((school_id, class_id, term), |r| {
        let raw: String = r.get(2)?;
        Ok(ScoreSheetRow {
            student_id: r.get(0)?,
            term: r.get(1)?,
            subject_marks: parse_mark_map(&raw),
            total: r.get(3)?,
            grade: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

// --- profile change requests ---

pub fn has_pending_request(
    conn: &Connection,
    student_id: &str,
    field: &str,
) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM profile_requests
             WHERE student_id = ? AND field = ? AND status = 'PENDING'
             LIMIT 1",
            (student_id, field),
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::query)?;
    Ok(found.is_some())
}

pub fn create_change_request(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    field: &str,
    new_value: &str,
) -> StoreResult<ProfileRequestRow> {
    let row = ProfileRequestRow {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        field: field.to_string(),
        new_value: new_value.to_string(),
        status: "PENDING".to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    conn.execute(
        "INSERT INTO profile_requests(id, school_id, student_id, field, new_value, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &row.id,
            school_id,
            &row.student_id,
            &row.field,
            &row.new_value,
            &row.status,
            &row.created_at,
        ),
    )
    .map_err(StoreError::insert)?;
    Ok(row)
}

fn request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRequestRow> {
    Ok(ProfileRequestRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        field: row.get(2)?,
        new_value: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const REQUEST_COLS: &str = "id, student_id, field, new_value, status, created_at";

/// Self-service history: every request of one student, newest first.
pub fn list_requests(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
) -> StoreResult<Vec<ProfileRequestRow>> {
    let sql = format!(
        "SELECT {} FROM profile_requests
         WHERE school_id = ? AND student_id = ?
         ORDER BY created_at DESC",
        REQUEST_COLS
    );
    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    stmt.query_map((school_id, student_id), |r| request_from_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

/// Teacher queue: PENDING requests of the class's students, oldest first,
/// enriched with name and reg no for display.
pub fn list_pending_requests(
    conn: &Connection,
    school_id: &str,
    class_id: &str,
) -> StoreResult<Vec<PendingRequestRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT pr.id, pr.student_id, pr.field, pr.new_value, pr.status, pr.created_at,
                    s.name, s.reg_no
             FROM profile_requests pr
             JOIN students s ON s.id = pr.student_id
             WHERE pr.school_id = ? AND s.class_id = ? AND pr.status = 'PENDING'
             ORDER BY pr.created_at",
        )
        .map_err(StoreError::query)?;
    stmt.query_map((school_id, class_id), |r| {
        Ok(PendingRequestRow {
            request: request_from_row(r)?,
            student_name: r.get(6)?,
            reg_no: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

/// A request together with its student's class, for the adjudication
/// authorization check.
pub fn get_request(
    conn: &Connection,
    school_id: &str,
    request_id: &str,
) -> StoreResult<Option<(ProfileRequestRow, String)>> {
    conn.query_row(
        "SELECT pr.id, pr.student_id, pr.field, pr.new_value, pr.status, pr.created_at,
                s.class_id
         FROM profile_requests pr
         JOIN students s ON s.id = pr.student_id
         WHERE pr.id = ? AND pr.school_id = ?",
        (request_id, school_id),
        |r| Ok((request_from_row(r)?, r.get::<_, String>(6)?)),
    )
    .optional()
    .map_err(StoreError::query)
}

/// Flip a PENDING request to its terminal status and, on approval, apply
/// the identity overwrite. Both writes live in one transaction: an
/// approved-but-unapplied state can never be left behind.
pub fn adjudicate_request(
    conn: &Connection,
    request_id: &str,
    status: &str,
    identity: Option<(&str, &'static str, &str)>,
) -> StoreResult<()> {
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;

    if let Err(e) = tx.execute(
        "UPDATE profile_requests SET status = ? WHERE id = ?",
        (status, request_id),
    ) {
        let _ = tx.rollback();
        return Err(StoreError::update(e));
    }

    if let Some((student_id, column, value)) = identity {
        // Column names come from identity_column(), never from the caller.
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        if let Err(e) = tx.execute(&sql, (value, student_id)) {
            let _ = tx.rollback();
            return Err(StoreError::update(e));
        }
    }

    tx.commit().map_err(StoreError::tx)
}
