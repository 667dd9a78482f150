use std::collections::BTreeSet;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::grade::Grade;
use crate::models::{AttendanceStatus, Sitting, StudentAggregate, SubjectAggregate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Csv,
    Json,
}

/// Column set for the presentation layer: sorted subject names plus one row
/// per ranked student.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportView {
    pub subjects: Vec<String>,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub rank: usize,
    pub student_id: String,
    pub display_name: String,
    pub class_id: String,
    pub stream_id: String,
    /// Aligned with [`ReportView::subjects`].
    pub cells: Vec<SubjectCell>,
    pub overall_average: Option<f64>,
    pub overall_grade: Grade,
    pub attendance: Option<AttendanceStatus>,
    pub comment: Option<String>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SubjectCell {
    NoData,
    #[serde(rename_all = "camelCase")]
    Scored {
        opening_term: Option<f64>,
        mid_term: Option<f64>,
        end_term: Option<f64>,
        average: Option<f64>,
        grade: Option<Grade>,
    },
}

impl From<&SubjectAggregate> for SubjectCell {
    fn from(subject: &SubjectAggregate) -> Self {
        SubjectCell::Scored {
            opening_term: subject.opening_term,
            mid_term: subject.mid_term,
            end_term: subject.end_term,
            average: subject.average,
            grade: subject.grade,
        }
    }
}

impl ReportView {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn project(ranked: &[StudentAggregate]) -> ReportView {
    let subjects: Vec<String> = ranked
        .iter()
        .flat_map(|student| student.subjects.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let rows = ranked
        .iter()
        .enumerate()
        .map(|(index, student)| ReportRow {
            rank: student.rank.unwrap_or(index + 1),
            student_id: student.student_id.clone(),
            display_name: student.display_name.clone(),
            class_id: student.class_id.clone(),
            stream_id: student.stream_id.clone(),
            cells: subjects
                .iter()
                .map(|name| {
                    student
                        .subjects
                        .get(name)
                        .map_or(SubjectCell::NoData, SubjectCell::from)
                })
                .collect(),
            overall_average: student.overall_average,
            overall_grade: student.tier(),
            attendance: student.attendance,
            comment: student.comment.clone(),
            recorded_by: student.recorded_by.clone(),
        })
        .collect();

    ReportView { subjects, rows }
}

fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn text_or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

fn markdown_cell(cell: &SubjectCell) -> String {
    match cell {
        SubjectCell::NoData => "-".to_string(),
        SubjectCell::Scored {
            opening_term,
            mid_term,
            end_term,
            average,
            grade,
        } => format!(
            "{}/{}/{} avg {} {}",
            score(*opening_term),
            score(*mid_term),
            score(*end_term),
            score(*average),
            grade.map_or_else(|| "-".to_string(), |g| g.to_string())
        ),
    }
}

/// Keeps free text inside a single table cell.
fn table_cell(value: &str) -> String {
    value
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .replace('|', "\\|")
}

fn table_row(cells: &[String]) -> String {
    let cells: Vec<String> = cells.iter().map(|cell| table_cell(cell)).collect();
    format!("| {} |", cells.join(" | "))
}

pub fn render_markdown(title: &str, scope: &str, view: &ReportView) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {title}");
    let _ = writeln!(output, "Generated for {scope}");
    let _ = writeln!(output);

    if view.is_empty() {
        let _ = writeln!(output, "No results available for this filter.");
        return output;
    }

    let _ = writeln!(
        output,
        "Sitting scores are shown as opening/mid/end term; `-` means no data."
    );
    let _ = writeln!(output);

    let mut header: Vec<String> = ["Rank", "Student", "Class", "Stream"]
        .map(str::to_string)
        .to_vec();
    header.extend(view.subjects.iter().cloned());
    header.extend(["Overall", "Attendance", "Comment", "Recorded by"].map(str::to_string));
    let _ = writeln!(output, "{}", table_row(&header));
    let _ = writeln!(output, "|{}", "---|".repeat(header.len()));

    for row in &view.rows {
        let mut cells = vec![
            row.rank.to_string(),
            row.display_name.clone(),
            row.class_id.clone(),
            row.stream_id.clone(),
        ];
        cells.extend(row.cells.iter().map(markdown_cell));
        cells.push(format!("{} {}", score(row.overall_average), row.overall_grade));
        cells.push(
            row.attendance
                .map_or_else(|| "-".to_string(), |status| status.to_string()),
        );
        cells.push(text_or_dash(row.comment.as_deref()).to_string());
        cells.push(text_or_dash(row.recorded_by.as_deref()).to_string());
        let _ = writeln!(output, "{}", table_row(&cells));
    }

    output
}

pub fn render_csv(view: &ReportView) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![
        "rank".to_string(),
        "student_id".to_string(),
        "student".to_string(),
        "class".to_string(),
        "stream".to_string(),
    ];
    for subject in &view.subjects {
        for column in ["opening", "mid", "end", "avg", "grade"] {
            header.push(format!("{subject} {column}"));
        }
    }
    header.extend(
        ["overall avg", "overall grade", "attendance", "comment", "recorded by"]
            .map(str::to_string),
    );
    writer.write_record(&header)?;

    let optional = |value: Option<f64>| value.map(|v| format!("{v:.2}")).unwrap_or_default();

    for row in &view.rows {
        let mut record = vec![
            row.rank.to_string(),
            row.student_id.clone(),
            row.display_name.clone(),
            row.class_id.clone(),
            row.stream_id.clone(),
        ];
        for cell in &row.cells {
            match cell {
                SubjectCell::NoData => {
                    record.extend(std::iter::repeat(String::new()).take(5));
                }
                SubjectCell::Scored { average, grade, .. } => {
                    record.extend(
                        Sitting::ALL
                            .iter()
                            .map(|sitting| optional(cell_score(cell, *sitting))),
                    );
                    record.push(optional(*average));
                    record.push(grade.map(|g| g.to_string()).unwrap_or_default());
                }
            }
        }
        record.push(optional(row.overall_average));
        record.push(row.overall_grade.to_string());
        record.push(row.attendance.map(|s| s.to_string()).unwrap_or_default());
        record.push(row.comment.clone().unwrap_or_default());
        record.push(row.recorded_by.clone().unwrap_or_default());
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

fn cell_score(cell: &SubjectCell, sitting: Sitting) -> Option<f64> {
    match cell {
        SubjectCell::NoData => None,
        SubjectCell::Scored {
            opening_term,
            mid_term,
            end_term,
            ..
        } => match sitting {
            Sitting::OpeningTerm => *opening_term,
            Sitting::MidTerm => *mid_term,
            Sitting::EndTerm => *end_term,
        },
    }
}

pub fn render_json(view: &ReportView) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(view)?)
}

pub fn render(
    format: ReportFormat,
    title: &str,
    scope: &str,
    view: &ReportView,
) -> anyhow::Result<String> {
    match format {
        ReportFormat::Markdown => Ok(render_markdown(title, scope, view)),
        ReportFormat::Csv => render_csv(view),
        ReportFormat::Json => render_json(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{attendance, comment, exam};
    use crate::aggregate::{aggregate, validate_records};
    use crate::models::RawResultRecord;
    use crate::rank::{rank, RankingPolicy};
    use pretty_assertions::assert_eq;

    fn view(raw: Vec<RawResultRecord>) -> ReportView {
        let students = aggregate(&validate_records(raw).expect("valid records"));
        project(&rank(students, RankingPolicy::Positional))
    }

    fn sample() -> ReportView {
        view(vec![
            exam("stu-a", "Math", "opening_term", 80.0),
            exam("stu-a", "Math", "end_term", 90.0),
            attendance("stu-a", "present"),
            exam("stu-b", "Math", "opening_term", 60.0),
            exam("stu-b", "English", "mid_term", 72.0),
            attendance("stu-b", "absent"),
            comment("stu-b", "missed | exams"),
        ])
    }

    #[test]
    fn subjects_are_distinct_and_sorted() {
        assert_eq!(sample().subjects, vec!["English".to_string(), "Math".to_string()]);
    }

    #[test]
    fn missing_subject_renders_as_no_data() {
        let report = sample();
        let student_a = &report.rows[0];
        assert_eq!(student_a.student_id, "stu-a");
        assert_eq!(student_a.cells[0], SubjectCell::NoData);
        assert_eq!(
            student_a.cells[1],
            SubjectCell::Scored {
                opening_term: Some(80.0),
                mid_term: None,
                end_term: Some(90.0),
                average: Some(85.0),
                grade: Some(Grade::A),
            }
        );
        assert_eq!(student_a.overall_grade, Grade::A);
    }

    #[test]
    fn rows_follow_rank_order() {
        let report = sample();
        let ranks: Vec<(usize, &str)> = report
            .rows
            .iter()
            .map(|row| (row.rank, row.student_id.as_str()))
            .collect();
        assert_eq!(ranks, vec![(1, "stu-a"), (2, "stu-b")]);
        assert_eq!(report.rows[1].overall_grade, Grade::Z);
    }

    #[test]
    fn markdown_has_subject_columns_and_no_data_markers() {
        let markdown = render_markdown("Student Results", "school sch-001", &sample());
        assert!(
            markdown.contains("| Rank | Student | Class | Stream | English | Math | Overall |")
        );
        assert!(markdown.contains("80.00/-/90.00 avg 85.00 A"));
        assert!(markdown.contains("| 1 | stu-a@example.school | form-2 | east | - |"));
        assert!(markdown.contains("missed \\| exams"));
    }

    #[test]
    fn markdown_keeps_pipes_and_line_breaks_inside_cells() {
        let report = view(vec![
            exam("stu-a", "Art|Design", "mid_term", 77.0),
            comment("stu-a", "Good term.\nNeeds focus\r\non theory"),
        ]);
        let markdown = render_markdown("Student Results", "school sch-001", &report);
        let table: Vec<&str> = markdown
            .lines()
            .filter(|line| line.starts_with('|'))
            .collect();

        assert_eq!(table.len(), 3);
        assert!(table[0].contains("| Art\\|Design |"));
        assert!(table[2].contains("| Good term. Needs focus on theory | t.kamau |"));

        let columns = |line: &str| line.replace("\\|", "").matches('|').count();
        assert_eq!(columns(table[0]), columns(table[1]));
        assert_eq!(columns(table[0]), columns(table[2]));
    }

    #[test]
    fn empty_view_renders_explicit_state() {
        let empty = view(Vec::new());
        assert!(empty.is_empty());
        assert!(empty.subjects.is_empty());
        let markdown = render_markdown("Student Results", "school sch-001", &empty);
        assert!(markdown.contains("No results available for this filter."));
        assert!(!markdown.contains("| Rank |"));
    }

    #[test]
    fn csv_flattens_subject_columns() {
        let csv = render_csv(&sample()).expect("csv renders");
        let mut lines = csv.lines();
        let header = lines.next().expect("header");
        assert!(header.starts_with("rank,student_id,student,class,stream,English opening,"));
        let first = lines.next().expect("first row");
        assert_eq!(
            first,
            concat!(
                "1,stu-a,stu-a@example.school,form-2,east,",
                ",,,,,80.00,,90.00,85.00,A,85.00,A,present,,t.kamau"
            )
        );
    }

    #[test]
    fn json_marks_missing_subjects() {
        let json = render_json(&sample()).expect("json renders");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["rows"][0]["cells"][0]["status"], "noData");
        assert_eq!(value["rows"][0]["cells"][1]["grade"], "A");
        assert_eq!(value["rows"][1]["overallGrade"], "Z");
    }
}
