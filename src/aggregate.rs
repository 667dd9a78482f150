use std::collections::HashMap;

use crate::error::ValidationError;
use crate::grade::grade;
use crate::models::{
    mean, AttendanceStatus, RawResultRecord, RecordBody, ResultRecord, Sitting, StudentAggregate,
};

/// Validates a whole batch. The first malformed record fails the batch.
pub fn validate_records(
    raw: Vec<RawResultRecord>,
) -> Result<Vec<ResultRecord>, ValidationError> {
    raw.into_iter()
        .enumerate()
        .map(|(index, record)| validate_record(index, record))
        .collect()
}

pub fn validate_record(
    index: usize,
    raw: RawResultRecord,
) -> Result<ResultRecord, ValidationError> {
    let kind = raw.kind.trim().to_lowercase();
    let missing = |field: &'static str| ValidationError::MissingField {
        index,
        kind: kind.clone(),
        field,
    };
    let invalid = |field: &'static str, value: String| ValidationError::InvalidValue {
        index,
        kind: kind.clone(),
        field,
        value,
    };

    let body = match kind.as_str() {
        "exam" | "cat" => {
            let subject = raw
                .subject
                .filter(|subject| !subject.trim().is_empty())
                .ok_or_else(|| missing("subject"))?;
            let score = raw.score.ok_or_else(|| missing("score"))?;
            if !score.is_finite() {
                return Err(invalid("score", score.to_string()));
            }
            let sitting_value = raw.sitting.ok_or_else(|| missing("sitting"))?;
            let sitting = Sitting::parse(&sitting_value)
                .ok_or_else(|| invalid("sitting", sitting_value.clone()))?;
            RecordBody::Exam {
                subject: subject.trim().to_string(),
                score,
                sitting,
            }
        }
        "attendance" => {
            let value = raw.attendance.ok_or_else(|| missing("status"))?;
            let status = AttendanceStatus::parse(&value)
                .ok_or_else(|| invalid("status", value.clone()))?;
            RecordBody::Attendance { status }
        }
        "comment" => {
            let text = raw.comment.ok_or_else(|| missing("text"))?;
            RecordBody::Comment { text }
        }
        _ => {
            return Err(ValidationError::UnknownKind {
                index,
                kind: raw.kind,
            })
        }
    };

    Ok(ResultRecord {
        student_id: raw.student_id,
        student_name: raw.student_name,
        school_id: raw.school_id,
        class_id: raw.class_id,
        stream_id: raw.stream_id,
        recorded_by: raw.recorded_by,
        created_at: raw.created_at,
        body,
    })
}

/// Accumulator for one aggregation request. Students keep first-seen order.
#[derive(Debug, Default)]
struct AggregateBuilder {
    index: HashMap<String, usize>,
    students: Vec<StudentAggregate>,
}

impl AggregateBuilder {
    fn apply(mut self, record: &ResultRecord) -> Self {
        let slot = match self.index.get(&record.student_id) {
            Some(slot) => *slot,
            None => {
                self.students.push(StudentAggregate::new(record));
                self.index
                    .insert(record.student_id.clone(), self.students.len() - 1);
                self.students.len() - 1
            }
        };
        let student = &mut self.students[slot];

        match &record.body {
            RecordBody::Exam {
                subject,
                score,
                sitting,
            } => {
                student
                    .subjects
                    .entry(subject.clone())
                    .or_default()
                    .set(*sitting, *score);
            }
            RecordBody::Attendance { status } => student.attendance = Some(*status),
            RecordBody::Comment { text } => student.comment = Some(text.clone()),
        }

        if record.recorded_by.is_some() {
            student.recorded_by = record.recorded_by.clone();
        }

        self
    }

    fn finish(self) -> Vec<StudentAggregate> {
        self.students.into_iter().map(finalize_student).collect()
    }
}

fn finalize_student(mut student: StudentAggregate) -> StudentAggregate {
    let attendance = student.attendance;
    let comment = student.comment.clone();

    for subject in student.subjects.values_mut() {
        subject.average = subject.sitting_average();
        subject.grade = Some(grade(subject.average, attendance, comment.as_deref()));
    }

    let averages: Vec<f64> = student
        .subjects
        .values()
        .filter_map(|subject| subject.average)
        .collect();
    student.overall_average = mean(&averages);
    student
}

/// Folds records in iteration order into one aggregate per student.
///
/// Repeated `(student, subject, sitting)` scores, attendance marks and
/// comments are last-write-wins. Output is in first-seen student order.
pub fn aggregate(records: &[ResultRecord]) -> Vec<StudentAggregate> {
    records
        .iter()
        .fold(AggregateBuilder::default(), AggregateBuilder::apply)
        .finish()
}
