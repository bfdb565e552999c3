use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One subject row of a class's current schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDefinition {
    pub name: String,
    pub max_marks: i64,
    #[serde(default)]
    pub pass_marks: i64,
}

/// Defaults for the first blank row of the subject entry form.
pub const ENTRY_DEFAULT_MAX: i64 = 50;
pub const ENTRY_DEFAULT_PASS: i64 = 18;

/// Max marks assigned to every subject when a schema comes from a template
/// or from the legacy string-list form.
pub const TEMPLATE_DEFAULT_MAX: i64 = 100;

pub const SUBJECT_TEMPLATES: &[(&str, &[&str])] = &[
    (
        "STATE_10",
        &[
            "Malayalam-I",
            "Malayalam-II",
            "English",
            "Hindi",
            "Physics",
            "Chemistry",
            "Biology",
            "Social Science",
            "Maths",
            "IT",
        ],
    ),
    (
        "CBSE_10",
        &["English", "Hindi", "Maths", "Science", "Social Science"],
    ),
    (
        "PLUS_TWO_SCI",
        &[
            "English",
            "Second Lang",
            "Physics",
            "Chemistry",
            "Maths",
            "Computer Science",
        ],
    ),
    (
        "PLUS_TWO_BIO",
        &[
            "English",
            "Second Lang",
            "Physics",
            "Chemistry",
            "Biology",
            "Maths",
        ],
    ),
    (
        "LP_UP",
        &["Malayalam", "English", "Maths", "Basic Science", "Social Science"],
    ),
];

pub fn template_schema(key: &str) -> Option<Vec<SubjectDefinition>> {
    SUBJECT_TEMPLATES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, names)| {
            names
                .iter()
                .map(|n| SubjectDefinition {
                    name: (*n).to_string(),
                    max_marks: TEMPLATE_DEFAULT_MAX,
                    pass_marks: 0,
                })
                .collect()
        })
}

/// Subject names case-normalize to a leading capital.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[derive(Debug)]
pub struct SchemaError {
    pub message: String,
}

impl SchemaError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parse the stored `classes.subjects` JSON.
///
/// Two shapes exist on disk: the canonical definition array and the legacy
/// plain string array. The legacy shape is normalized here, on read, so the
/// rest of the engine only ever sees `SubjectDefinition`s.
pub fn parse_stored_subjects(raw: &str) -> anyhow::Result<Vec<SubjectDefinition>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let Some(items) = value.as_array() else {
        anyhow::bail!("subjects column is not a JSON array");
    };
    if items.is_empty() {
        return Ok(Vec::new());
    }

    if items[0].is_string() {
        // Legacy ["Maths", "English"] form.
        return Ok(items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| SubjectDefinition {
                name: s.to_string(),
                max_marks: TEMPLATE_DEFAULT_MAX,
                pass_marks: 0,
            })
            .collect());
    }

    let defs: Vec<SubjectDefinition> = serde_json::from_value(value)?;
    Ok(defs)
}

/// Normalize and validate a schema submitted for a full-replacement save.
///
/// Blank-name rows are dropped (the entry form always trails one), names
/// get a leading capital, and the result must have unique names with
/// `passMarks <= maxMarks` on every row.
pub fn prepare_for_save(
    rows: Vec<SubjectDefinition>,
) -> Result<Vec<SubjectDefinition>, SchemaError> {
    let mut out: Vec<SubjectDefinition> = Vec::with_capacity(rows.len());
    let mut seen: HashSet<String> = HashSet::new();

    for row in rows {
        let name = normalize_name(&row.name);
        if name.is_empty() {
            continue;
        }
        if row.max_marks < 0 || row.pass_marks < 0 {
            return Err(SchemaError::new(format!(
                "subject '{}' has negative marks configuration",
                name
            )));
        }
        if row.pass_marks > row.max_marks {
            return Err(SchemaError::new(format!(
                "subject '{}' has passMarks {} above maxMarks {}",
                name, row.pass_marks, row.max_marks
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(SchemaError::new(format!("duplicate subject '{}'", name)));
        }
        out.push(SubjectDefinition {
            name,
            max_marks: row.max_marks,
            pass_marks: row.pass_marks,
        });
    }

    Ok(out)
}

/// Entry-form staging: append a blank row inheriting the previous row's
/// marks configuration. Pure data-entry convenience, zero rule weight.
pub fn with_blank_row(mut rows: Vec<SubjectDefinition>) -> Vec<SubjectDefinition> {
    let (max, pass) = match rows.last() {
        Some(prev) => (prev.max_marks, prev.pass_marks),
        None => (ENTRY_DEFAULT_MAX, ENTRY_DEFAULT_PASS),
    };
    rows.push(SubjectDefinition {
        name: String::new(),
        max_marks: max,
        pass_marks: pass,
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_string_array_normalizes_to_definitions() {
        let defs = parse_stored_subjects(r#"["Maths","English"]"#).expect("parse");
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "Maths");
        assert_eq!(defs[0].max_marks, 100);
        assert_eq!(defs[0].pass_marks, 0);
    }

    #[test]
    fn canonical_array_parses_as_is() {
        let defs = parse_stored_subjects(
            r#"[{"name":"Maths","maxMarks":50,"passMarks":18}]"#,
        )
        .expect("parse");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].max_marks, 50);
        assert_eq!(defs[0].pass_marks, 18);
    }

    #[test]
    fn save_drops_blank_rows_and_capitalizes() {
        let saved = prepare_for_save(vec![
            SubjectDefinition {
                name: "maths".into(),
                max_marks: 100,
                pass_marks: 35,
            },
            SubjectDefinition {
                name: "  ".into(),
                max_marks: 100,
                pass_marks: 35,
            },
        ])
        .expect("save");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "Maths");
    }

    #[test]
    fn save_rejects_pass_above_max() {
        let err = prepare_for_save(vec![SubjectDefinition {
            name: "Maths".into(),
            max_marks: 50,
            pass_marks: 60,
        }])
        .expect_err("must reject");
        assert!(err.message.contains("passMarks"));
    }

    #[test]
    fn save_rejects_duplicate_names_after_normalization() {
        let err = prepare_for_save(vec![
            SubjectDefinition {
                name: "maths".into(),
                max_marks: 100,
                pass_marks: 0,
            },
            SubjectDefinition {
                name: "Maths".into(),
                max_marks: 100,
                pass_marks: 0,
            },
        ])
        .expect_err("must reject");
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn blank_row_inherits_previous_marks() {
        let rows = with_blank_row(vec![SubjectDefinition {
            name: "Physics".into(),
            max_marks: 75,
            pass_marks: 25,
        }]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "");
        assert_eq!(rows[1].max_marks, 75);
        assert_eq!(rows[1].pass_marks, 25);
    }

    #[test]
    fn first_blank_row_uses_entry_defaults() {
        let rows = with_blank_row(Vec::new());
        assert_eq!(rows[0].max_marks, ENTRY_DEFAULT_MAX);
        assert_eq!(rows[0].pass_marks, ENTRY_DEFAULT_PASS);
    }

    #[test]
    fn template_catalogue_defaults_to_100_max() {
        let defs = template_schema("CBSE_10").expect("template");
        assert_eq!(defs.len(), 5);
        assert!(defs.iter().all(|d| d.max_marks == 100 && d.pass_marks == 0));
        assert!(template_schema("NOPE").is_none());
    }
}
