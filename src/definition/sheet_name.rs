//! Sheet-name validation and auto-correction.
//!
//! Spreadsheet tab names are capped at 31 characters and may not contain
//! `\ / * ? [ ] :` or carry surrounding whitespace.

use std::fmt;
use tracing::warn;

/// Maximum sheet-name length, in characters.
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Characters a sheet name may not contain.
pub const FORBIDDEN_CHARS: [char; 7] = ['\\', '/', '*', '?', '[', ']', ':'];

/// Replacement for forbidden characters during correction.
const REPLACEMENT: char = '_';

/// A single reason a sheet name is unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetNameIssue {
    Empty,
    TooLong { len: usize },
    ForbiddenChars(Vec<char>),
    SurroundingWhitespace,
}

impl fmt::Display for SheetNameIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "sheet name is empty"),
            Self::TooLong { len } => write!(
                f,
                "sheet name is too long (max {MAX_SHEET_NAME_LEN} characters, got {len})"
            ),
            Self::ForbiddenChars(chars) => {
                let list: Vec<String> = chars.iter().map(|c| c.to_string()).collect();
                write!(f, "sheet name contains forbidden characters: {}", list.join(" "))
            }
            Self::SurroundingWhitespace => {
                write!(f, "sheet name has leading or trailing whitespace")
            }
        }
    }
}

/// Returns every issue with `name`. An empty list means the name is valid.
///
/// `skip_length` waives the length check, used while the name still holds
/// unresolved `${...}` markers.
pub fn validate_sheet_name(name: &str, skip_length: bool) -> Vec<SheetNameIssue> {
    let mut issues = Vec::new();

    if name.trim().is_empty() {
        issues.push(SheetNameIssue::Empty);
        return issues;
    }

    let len = name.chars().count();
    if !skip_length && len > MAX_SHEET_NAME_LEN {
        issues.push(SheetNameIssue::TooLong { len });
    }

    let found: Vec<char> = FORBIDDEN_CHARS
        .iter()
        .copied()
        .filter(|c| name.contains(*c))
        .collect();
    if !found.is_empty() {
        issues.push(SheetNameIssue::ForbiddenChars(found));
    }

    if name != name.trim() {
        issues.push(SheetNameIssue::SurroundingWhitespace);
    }

    issues
}

/// Validates a raw sheet-name template as written in a definition document.
pub fn validate_template(name: &str) -> Vec<SheetNameIssue> {
    validate_sheet_name(name, name.contains("${"))
}

/// Corrects a resolved sheet name: forbidden characters become `_`, then the
/// name is trimmed, then truncated to 31 characters.
///
/// Logs the before/after values when anything changed.
pub fn correct_sheet_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { REPLACEMENT } else { c })
        .collect();
    let corrected: String = replaced.trim().chars().take(MAX_SHEET_NAME_LEN).collect();

    if corrected != name {
        warn!("Sheet name corrected: '{}' -> '{}'", name, corrected);
    }
    corrected
}
