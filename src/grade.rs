use std::fmt;

use serde::{Serialize, Serializer};

use crate::models::AttendanceStatus;

/// Letter grade. `Y` and `Z` are override grades, not points on the A–E scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    /// Academic-integrity flag.
    Y,
    /// Absent.
    Z,
}

impl Grade {
    pub fn code(self) -> char {
        match self {
            Grade::A => 'A',
            Grade::B => 'B',
            Grade::C => 'C',
            Grade::D => 'D',
            Grade::E => 'E',
            Grade::Y => 'Y',
            Grade::Z => 'Z',
        }
    }

    /// Ranking tier; higher ranks first.
    pub fn ordinal(self) -> i8 {
        match self {
            Grade::A => 5,
            Grade::B => 4,
            Grade::C => 3,
            Grade::D => 2,
            Grade::E => 1,
            Grade::Z => 0,
            Grade::Y => -1,
        }
    }

    fn from_average(average: Option<f64>) -> Self {
        match average {
            Some(avg) if avg >= 80.0 => Grade::A,
            Some(avg) if avg >= 70.0 => Grade::B,
            Some(avg) if avg >= 60.0 => Grade::C,
            Some(avg) if avg >= 50.0 => Grade::D,
            _ => Grade::E,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for Grade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_char(self.code())
    }
}

/// Absence wins over the dishonesty flag, which wins over the score.
pub fn grade(
    average: Option<f64>,
    attendance: Option<AttendanceStatus>,
    comment: Option<&str>,
) -> Grade {
    if attendance == Some(AttendanceStatus::Absent) {
        return Grade::Z;
    }

    if comment.is_some_and(flags_dishonesty) {
        return Grade::Y;
    }

    Grade::from_average(average)
}

fn flags_dishonesty(comment: &str) -> bool {
    comment.to_lowercase().contains("cheat")
}
