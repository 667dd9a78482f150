use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ScopeError;
use crate::grade::Grade;

/// One of the three fixed checkpoints in a term at which a score is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sitting {
    OpeningTerm,
    MidTerm,
    EndTerm,
}

impl Sitting {
    pub const ALL: [Sitting; 3] = [Sitting::OpeningTerm, Sitting::MidTerm, Sitting::EndTerm];

    /// Case and separators are ignored: `opening_term`, `openingTerm` and
    /// `Opening Term` all parse.
    pub fn parse(value: &str) -> Option<Self> {
        match normalize(value).as_str() {
            "openingterm" | "opening" => Some(Sitting::OpeningTerm),
            "midterm" | "mid" => Some(Sitting::MidTerm),
            "endterm" | "end" => Some(Sitting::EndTerm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match normalize(value).as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Result row as handed over by the record store, before validation.
///
/// Every kind-specific field is optional here; [`crate::aggregate::validate_records`]
/// turns a batch of these into [`ResultRecord`] values or rejects it.
#[derive(Debug, Clone, Default)]
pub struct RawResultRecord {
    pub student_id: String,
    pub student_name: Option<String>,
    pub school_id: String,
    pub class_id: String,
    pub stream_id: String,
    pub kind: String,
    pub subject: Option<String>,
    pub score: Option<f64>,
    pub sitting: Option<String>,
    pub attendance: Option<String>,
    pub comment: Option<String>,
    pub recorded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Kind-specific payload of a result record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Exam {
        subject: String,
        score: f64,
        sitting: Sitting,
    },
    Attendance {
        status: AttendanceStatus,
    },
    Comment {
        text: String,
    },
}

/// A validated observation about one student.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub student_id: String,
    pub student_name: Option<String>,
    pub school_id: String,
    pub class_id: String,
    pub stream_id: String,
    pub recorded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub body: RecordBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub opening_term: Option<f64>,
    pub mid_term: Option<f64>,
    pub end_term: Option<f64>,
    pub average: Option<f64>,
    pub grade: Option<Grade>,
}

impl SubjectAggregate {
    pub fn set(&mut self, sitting: Sitting, score: f64) {
        match sitting {
            Sitting::OpeningTerm => self.opening_term = Some(score),
            Sitting::MidTerm => self.mid_term = Some(score),
            Sitting::EndTerm => self.end_term = Some(score),
        }
    }

    pub fn score(&self, sitting: Sitting) -> Option<f64> {
        match sitting {
            Sitting::OpeningTerm => self.opening_term,
            Sitting::MidTerm => self.mid_term,
            Sitting::EndTerm => self.end_term,
        }
    }

    /// Mean of the populated sittings only; `None` when none were recorded.
    pub fn sitting_average(&self) -> Option<f64> {
        let scores: Vec<f64> = Sitting::ALL
            .iter()
            .filter_map(|sitting| self.score(*sitting))
            .collect();
        mean(&scores)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub display_name: String,
    pub class_id: String,
    pub stream_id: String,
    pub subjects: BTreeMap<String, SubjectAggregate>,
    pub attendance: Option<AttendanceStatus>,
    pub comment: Option<String>,
    pub recorded_by: Option<String>,
    pub overall_average: Option<f64>,
    pub rank: Option<usize>,
}

impl StudentAggregate {
    pub fn new(record: &ResultRecord) -> Self {
        Self {
            student_id: record.student_id.clone(),
            display_name: record
                .student_name
                .clone()
                .unwrap_or_else(|| record.student_id.clone()),
            class_id: record.class_id.clone(),
            stream_id: record.stream_id.clone(),
            subjects: BTreeMap::new(),
            attendance: None,
            comment: None,
            recorded_by: None,
            overall_average: None,
            rank: None,
        }
    }

    /// Student-level standing derived from the overall average and the
    /// attendance/comment flags.
    pub fn tier(&self) -> Grade {
        crate::grade::grade(
            self.overall_average,
            self.attendance,
            self.comment.as_deref(),
        )
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    Admin,
    Teacher,
    Parent,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Student => "student",
        };
        f.write_str(label)
    }
}

/// Already-authenticated identity of whoever asked for the report.
#[derive(Debug, Clone)]
pub struct Caller {
    pub role: Role,
    pub school_id: String,
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub school_id: String,
    pub class_id: Option<String>,
    pub stream_id: Option<String>,
    pub student_id: Option<String>,
}

impl ResultFilter {
    pub fn for_caller(
        caller: &Caller,
        class_id: Option<String>,
        stream_id: Option<String>,
        student_id: Option<String>,
    ) -> Result<Self, ScopeError> {
        let student_id = match caller.role {
            Role::Admin | Role::Teacher => student_id.or_else(|| caller.student_id.clone()),
            Role::Student => Some(
                caller
                    .student_id
                    .clone()
                    .ok_or(ScopeError::MissingStudent { role: caller.role })?,
            ),
            Role::Parent => Some(
                student_id
                    .or_else(|| caller.student_id.clone())
                    .ok_or(ScopeError::MissingStudent { role: caller.role })?,
            ),
        };

        Ok(Self {
            school_id: caller.school_id.clone(),
            class_id,
            stream_id,
            student_id,
        })
    }

    pub fn label(&self) -> String {
        let mut parts = vec![format!("school {}", self.school_id)];
        if let Some(class_id) = &self.class_id {
            parts.push(format!("class {class_id}"));
        }
        if let Some(stream_id) = &self.stream_id {
            parts.push(format!("stream {stream_id}"));
        }
        if let Some(student_id) = &self.student_id {
            parts.push(format!("student {student_id}"));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role, student_id: Option<&str>) -> Caller {
        Caller {
            role,
            school_id: "sch-001".to_string(),
            student_id: student_id.map(str::to_string),
        }
    }

    #[test]
    fn sitting_parse_ignores_case_and_separators() {
        assert_eq!(Sitting::parse("opening_term"), Some(Sitting::OpeningTerm));
        assert_eq!(Sitting::parse("openingTerm"), Some(Sitting::OpeningTerm));
        assert_eq!(Sitting::parse("Mid-Term"), Some(Sitting::MidTerm));
        assert_eq!(Sitting::parse("END TERM"), Some(Sitting::EndTerm));
        assert_eq!(Sitting::parse("finals"), None);
    }

    #[test]
    fn attendance_parse_is_case_insensitive() {
        assert_eq!(AttendanceStatus::parse("Absent"), Some(AttendanceStatus::Absent));
        assert_eq!(AttendanceStatus::parse("EXCUSED"), Some(AttendanceStatus::Excused));
        assert_eq!(AttendanceStatus::parse("late"), None);
    }

    #[test]
    fn sitting_average_excludes_missing_sittings() {
        let mut subject = SubjectAggregate::default();
        assert_eq!(subject.sitting_average(), None);

        subject.set(Sitting::OpeningTerm, 60.0);
        subject.set(Sitting::EndTerm, 80.0);
        assert_eq!(subject.sitting_average(), Some(70.0));
    }

    #[test]
    fn student_caller_is_pinned_to_own_id() {
        let filter = ResultFilter::for_caller(
            &caller(Role::Student, Some("stu-001")),
            None,
            None,
            Some("stu-999".to_string()),
        )
        .expect("student scope");
        assert_eq!(filter.student_id.as_deref(), Some("stu-001"));
        assert_eq!(filter.school_id, "sch-001");
    }

    #[test]
    fn parent_caller_requires_a_student() {
        let error = ResultFilter::for_caller(&caller(Role::Parent, None), None, None, None)
            .expect_err("parent without child");
        assert!(matches!(error, ScopeError::MissingStudent { role: Role::Parent }));
    }

    #[test]
    fn teacher_caller_filters_freely() {
        let filter = ResultFilter::for_caller(
            &caller(Role::Teacher, None),
            Some("form-2".to_string()),
            Some("east".to_string()),
            None,
        )
        .expect("teacher scope");
        assert_eq!(filter.student_id, None);
        assert_eq!(filter.label(), "school sch-001, class form-2, stream east");
    }
}
