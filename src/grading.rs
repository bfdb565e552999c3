use crate::schema::SubjectDefinition;
use serde::Serialize;
use std::collections::BTreeMap;

/// The two academic terms. Stored and spoken on the wire as the exact
/// literals `"Term 1"` / `"Term 2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    Term1,
    Term2,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Term1 => "Term 1",
            Term::Term2 => "Term 2",
        }
    }

    pub fn parse(s: &str) -> Option<Term> {
        match s {
            "Term 1" => Some(Term::Term1),
            "Term 2" => Some(Term::Term2),
            _ => None,
        }
    }
}

/// Letter grade produced by the percentage ladder. `F` is deliberately not
/// here: the formula never emits it, it only survives on sheets stored
/// before this scheme (see [`ResultState`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    APlus,
    A,
    BPlus,
    B,
    CPlus,
    C,
    D,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::D => "D",
        }
    }

    /// High-to-low ladder, closed boundaries, first match wins.
    pub fn for_percentage(percentage: f64) -> Grade {
        if percentage >= 90.0 {
            Grade::APlus
        } else if percentage >= 80.0 {
            Grade::A
        } else if percentage >= 70.0 {
            Grade::BPlus
        } else if percentage >= 60.0 {
            Grade::B
        } else if percentage >= 50.0 {
            Grade::CPlus
        } else if percentage >= 40.0 {
            Grade::C
        } else {
            Grade::D
        }
    }
}

/// Visual category of a stored grade for student/public views.
///
/// `LegacyFail` (stored `F`) and `Fail` (computed `D`) are distinct render
/// states, not one code path; `Absent` covers the `-` placeholder used for
/// students without a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    Pass,
    Fail,
    LegacyFail,
    Absent,
}

impl ResultState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultState::Pass => "pass",
            ResultState::Fail => "fail",
            ResultState::LegacyFail => "legacy_fail",
            ResultState::Absent => "absent",
        }
    }

    pub fn for_grade(grade: &str) -> ResultState {
        match grade {
            "F" => ResultState::LegacyFail,
            "D" => ResultState::Fail,
            "-" | "" => ResultState::Absent,
            _ => ResultState::Pass,
        }
    }
}

pub type MarkMap = BTreeMap<String, i64>;

/// Sum of every recorded mark. Subjects that have dropped out of the
/// current schema keep contributing: orphaned marks are counted on purpose.
pub fn total(marks: &MarkMap) -> i64 {
    marks.values().sum()
}

/// Aggregate maximum, computed only over schema subjects that were actually
/// scored. An orphaned mark contributes 0 here, so the percentage can run
/// past 100 after a schema shrinks.
pub fn max_total(marks: &MarkMap, schema: &[SubjectDefinition]) -> i64 {
    schema
        .iter()
        .filter(|s| marks.contains_key(&s.name))
        .map(|s| s.max_marks)
        .sum()
}

pub fn percentage(total: i64, max_total: i64) -> f64 {
    if max_total > 0 {
        (total as f64 / max_total as f64) * 100.0
    } else {
        0.0
    }
}

/// Schema subjects whose recorded mark exceeds the cap. Display flags only;
/// an over-limit mark never blocks a save.
pub fn over_limit(marks: &MarkMap, schema: &[SubjectDefinition]) -> Vec<String> {
    schema
        .iter()
        .filter(|s| marks.get(&s.name).copied().unwrap_or(0) > s.max_marks)
        .map(|s| s.name.clone())
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetComputation {
    pub total: i64,
    pub max_total: i64,
    pub percentage: f64,
    pub grade: &'static str,
    pub over_limit: Vec<String>,
}

pub fn compute_sheet(marks: &MarkMap, schema: &[SubjectDefinition]) -> SheetComputation {
    let total = total(marks);
    let max_total = max_total(marks, schema);
    let pct = percentage(total, max_total);
    SheetComputation {
        total,
        max_total,
        percentage: pct,
        grade: Grade::for_percentage(pct).as_str(),
        over_limit: over_limit(marks, schema),
    }
}

/// One row of the derived class report. Never persisted; recomputed from
/// the score sheets on every request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankRow {
    pub rank: usize,
    pub reg_no: String,
    pub name: String,
    pub total: i64,
    pub grade: String,
    pub subject_marks: MarkMap,
}

/// Input: one entry per student, already in roster order (reg_no
/// ascending). Students without a sheet arrive as `total = 0, grade = "-"`.
#[derive(Debug, Clone)]
pub struct RankSource {
    pub reg_no: String,
    pub name: String,
    pub total: i64,
    pub grade: String,
    pub subject_marks: MarkMap,
}

/// Order by total descending. The sort is stable, so ties keep roster
/// order and receive consecutive ranks (no shared-rank convention).
pub fn rank_rows(sources: Vec<RankSource>) -> Vec<RankRow> {
    let mut sources = sources;
    sources.sort_by(|a, b| b.total.cmp(&a.total));
    sources
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankRow {
            rank: i + 1,
            reg_no: s.reg_no,
            name: s.name,
            total: s.total,
            grade: s.grade,
            subject_marks: s.subject_marks,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(name: &str, max: i64, pass: i64) -> SubjectDefinition {
        SubjectDefinition {
            name: name.to_string(),
            max_marks: max,
            pass_marks: pass,
        }
    }

    fn marks(pairs: &[(&str, i64)]) -> MarkMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn grade_boundaries_are_closed() {
        assert_eq!(Grade::for_percentage(90.0), Grade::APlus);
        assert_eq!(Grade::for_percentage(89.999), Grade::A);
        assert_eq!(Grade::for_percentage(80.0), Grade::A);
        assert_eq!(Grade::for_percentage(40.0), Grade::C);
        assert_eq!(Grade::for_percentage(39.999), Grade::D);
        assert_eq!(Grade::for_percentage(0.0), Grade::D);
    }

    #[test]
    fn total_counts_orphaned_subjects_max_total_does_not() {
        let schema = vec![subject("Maths", 100, 35)];
        let m = marks(&[("Maths", 95), ("English", 82)]);

        assert_eq!(total(&m), 177);
        assert_eq!(max_total(&m, &schema), 100);
    }

    #[test]
    fn max_total_skips_schema_subjects_never_scored() {
        let schema = vec![subject("Maths", 100, 35), subject("Hindi", 100, 35)];
        let m = marks(&[("Maths", 40)]);
        assert_eq!(max_total(&m, &schema), 100);
    }

    #[test]
    fn schema_drop_scenario_keeps_total_and_uncaps_percentage() {
        let full = vec![subject("Maths", 100, 35), subject("English", 100, 35)];
        let m = marks(&[("Maths", 95), ("English", 82)]);

        let before = compute_sheet(&m, &full);
        assert_eq!(before.total, 177);
        assert_eq!(before.max_total, 200);
        assert!((before.percentage - 88.5).abs() < 1e-9);
        assert_eq!(before.grade, "A");

        // Drop English from the schema without touching the sheet.
        let shrunk = vec![subject("Maths", 100, 35)];
        let after = compute_sheet(&m, &shrunk);
        assert_eq!(after.total, 177);
        assert_eq!(after.max_total, 100);
        assert!((after.percentage - 177.0).abs() < 1e-9);
    }

    #[test]
    fn empty_max_total_yields_zero_percentage() {
        let m = marks(&[("Ghost", 10)]);
        let c = compute_sheet(&m, &[]);
        assert_eq!(c.max_total, 0);
        assert_eq!(c.percentage, 0.0);
        assert_eq!(c.grade, "D");
    }

    #[test]
    fn over_limit_flags_only_capped_subjects() {
        let schema = vec![subject("Maths", 50, 18), subject("English", 50, 18)];
        let m = marks(&[("Maths", 51), ("English", 50), ("Ghost", 900)]);
        assert_eq!(over_limit(&m, &schema), vec!["Maths".to_string()]);
    }

    #[test]
    fn rank_is_stable_on_ties() {
        let src = |reg: &str, total: i64| RankSource {
            reg_no: reg.to_string(),
            name: format!("Student {}", reg),
            total,
            grade: "-".to_string(),
            subject_marks: MarkMap::new(),
        };

        // Roster order: 001, 002, 003, 004.
        let rows = rank_rows(vec![
            src("001", 150),
            src("002", 180),
            src("003", 150),
            src("004", 90),
        ]);

        let order: Vec<(&str, usize)> = rows
            .iter()
            .map(|r| (r.reg_no.as_str(), r.rank))
            .collect();
        assert_eq!(
            order,
            vec![("002", 1), ("001", 2), ("003", 3), ("004", 4)]
        );
    }

    #[test]
    fn result_states_keep_legacy_f_distinct() {
        assert_eq!(ResultState::for_grade("A+"), ResultState::Pass);
        assert_eq!(ResultState::for_grade("D"), ResultState::Fail);
        assert_eq!(ResultState::for_grade("F"), ResultState::LegacyFail);
        assert_eq!(ResultState::for_grade("-"), ResultState::Absent);
    }

    #[test]
    fn term_literals_round_trip() {
        assert_eq!(Term::parse("Term 1"), Some(Term::Term1));
        assert_eq!(Term::parse("Term 2"), Some(Term::Term2));
        assert_eq!(Term::Term2.as_str(), "Term 2");
        assert_eq!(Term::parse("term 1"), None);
    }
}
