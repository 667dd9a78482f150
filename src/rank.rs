use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::StudentAggregate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RankingPolicy {
    /// Every student gets a distinct rank: `index + 1` after sorting.
    #[default]
    Positional,
    /// Exact ties share a rank; the next distinct key gets `previous + 1`.
    Dense,
}

/// A missing overall average compares as 0.
fn sort_key(student: &StudentAggregate) -> (i8, f64) {
    (
        student.tier().ordinal(),
        student.overall_average.unwrap_or(0.0),
    )
}

fn compare(a: &StudentAggregate, b: &StudentAggregate) -> Ordering {
    let (tier_a, avg_a) = sort_key(a);
    let (tier_b, avg_b) = sort_key(b);
    tier_b.cmp(&tier_a).then_with(|| avg_b.total_cmp(&avg_a))
}

/// Orders students by tier then overall average, both descending, and
/// assigns ranks. Equal keys keep their input order.
pub fn rank(mut students: Vec<StudentAggregate>, policy: RankingPolicy) -> Vec<StudentAggregate> {
    students.sort_by(compare);

    let mut previous: Option<(i8, f64)> = None;
    let mut current = 0usize;

    for (index, student) in students.iter_mut().enumerate() {
        let key = sort_key(student);
        current = match policy {
            RankingPolicy::Positional => index + 1,
            RankingPolicy::Dense if previous == Some(key) => current,
            RankingPolicy::Dense => current + 1,
        };
        previous = Some(key);
        student.rank = Some(current);
    }

    students
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{attendance, comment, exam};
    use crate::aggregate::{aggregate, validate_records};
    use crate::models::RawResultRecord;
    use pretty_assertions::assert_eq;

    fn ranked(raw: Vec<RawResultRecord>, policy: RankingPolicy) -> Vec<(String, usize)> {
        let students = aggregate(&validate_records(raw).expect("valid records"));
        rank(students, policy)
            .into_iter()
            .map(|s| (s.student_id, s.rank.expect("rank assigned")))
            .collect()
    }

    fn pairs(expected: &[(&str, usize)]) -> Vec<(String, usize)> {
        expected
            .iter()
            .map(|(id, rank)| (id.to_string(), *rank))
            .collect()
    }

    #[test]
    fn higher_tier_ranks_first() {
        let result = ranked(
            vec![
                exam("stu-b", "Math", "opening_term", 60.0),
                attendance("stu-b", "absent"),
                exam("stu-a", "Math", "opening_term", 80.0),
                exam("stu-a", "Math", "end_term", 90.0),
                attendance("stu-a", "present"),
            ],
            RankingPolicy::Positional,
        );
        assert_eq!(result, pairs(&[("stu-a", 1), ("stu-b", 2)]));
    }

    #[test]
    fn absent_outranks_dishonesty_flag_despite_lower_average() {
        let result = ranked(
            vec![
                exam("stu-y", "Math", "mid_term", 95.0),
                comment("stu-y", "caught cheating"),
                exam("stu-z", "Math", "mid_term", 20.0),
                attendance("stu-z", "absent"),
                exam("stu-e", "Math", "mid_term", 30.0),
            ],
            RankingPolicy::Positional,
        );
        assert_eq!(result, pairs(&[("stu-e", 1), ("stu-z", 2), ("stu-y", 3)]));
    }

    #[test]
    fn equal_tier_sorts_by_average() {
        let result = ranked(
            vec![
                exam("stu-1", "Math", "mid_term", 81.0),
                exam("stu-2", "Math", "mid_term", 95.0),
                exam("stu-3", "Math", "mid_term", 88.0),
            ],
            RankingPolicy::Positional,
        );
        assert_eq!(result, pairs(&[("stu-2", 1), ("stu-3", 2), ("stu-1", 3)]));
    }

    #[test]
    fn exact_ties_keep_input_order_with_distinct_positions() {
        let result = ranked(
            vec![
                exam("stu-1", "Math", "mid_term", 75.0),
                exam("stu-2", "Math", "mid_term", 75.0),
                exam("stu-3", "Math", "mid_term", 90.0),
            ],
            RankingPolicy::Positional,
        );
        assert_eq!(result, pairs(&[("stu-3", 1), ("stu-1", 2), ("stu-2", 3)]));
    }

    #[test]
    fn dense_policy_shares_rank_on_exact_ties() {
        let result = ranked(
            vec![
                exam("stu-1", "Math", "mid_term", 75.0),
                exam("stu-2", "Math", "mid_term", 75.0),
                exam("stu-3", "Math", "mid_term", 90.0),
                exam("stu-4", "Math", "mid_term", 40.0),
            ],
            RankingPolicy::Dense,
        );
        assert_eq!(
            result,
            pairs(&[("stu-3", 1), ("stu-1", 2), ("stu-2", 2), ("stu-4", 3)])
        );
    }

    #[test]
    fn missing_average_still_gets_positional_rank() {
        let result = ranked(
            vec![
                attendance("stu-none", "present"),
                exam("stu-low", "Math", "mid_term", 10.0),
            ],
            RankingPolicy::Positional,
        );
        assert_eq!(result, pairs(&[("stu-low", 1), ("stu-none", 2)]));
    }

    #[test]
    fn missing_average_ties_with_zero_score() {
        let result = ranked(
            vec![
                attendance("stu-none", "present"),
                exam("stu-zero", "Math", "mid_term", 0.0),
            ],
            RankingPolicy::Dense,
        );
        assert_eq!(result, pairs(&[("stu-none", 1), ("stu-zero", 1)]));
    }
}
