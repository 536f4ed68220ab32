use crate::error::EngineError;
use crate::model::StudentIdentity;

const RUN_PREFIX: &str = "RUN: ";
const NAME_PREFIX: &str = "Nombre: ";
const GRADE_PREFIX: &str = "Grado: ";
const SECTION_PREFIX: &str = "Curso: ";

/// Given names and surnames split out of a single full-name string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameParts {
    pub given_names: String,
    pub paternal_surname: String,
    pub maternal_surname: String,
}

fn field(lines: &[&str], idx: usize, prefix: &str) -> String {
    let Some(raw) = lines.get(idx) else {
        return String::new();
    };
    let raw = raw.trim_end_matches('\r');
    raw.strip_prefix(prefix).unwrap_or(raw).trim().to_string()
}

/// Decodes the four-line credential payload. Lines are positional.
pub fn parse_payload(text: &str) -> Result<StudentIdentity, EngineError> {
    let lines: Vec<&str> = text.split('\n').collect();
    let run = field(&lines, 0, RUN_PREFIX);
    if run.is_empty() {
        return Err(EngineError::InvalidIdentity);
    }
    Ok(StudentIdentity {
        run,
        full_name: field(&lines, 1, NAME_PREFIX),
        grade: field(&lines, 2, GRADE_PREFIX),
        section: field(&lines, 3, SECTION_PREFIX),
    })
}

pub fn render_payload(run: &str, full_name: &str, grade: &str, section: &str) -> String {
    format!(
        "{}{}\n{}{}\n{}{}\n{}{}",
        RUN_PREFIX, run, NAME_PREFIX, full_name, GRADE_PREFIX, grade, SECTION_PREFIX, section
    )
}

/// Last token is the maternal surname, the one before it the paternal
/// surname, everything earlier the given names. Two tokens have no maternal
/// surname; one token is all given name.
pub fn split_full_name(full_name: &str) -> NameParts {
    let tokens: Vec<&str> = full_name.split_whitespace().collect();
    match tokens.as_slice() {
        [] => NameParts::default(),
        [given] => NameParts {
            given_names: given.to_string(),
            ..NameParts::default()
        },
        [given, paternal] => NameParts {
            given_names: given.to_string(),
            paternal_surname: paternal.to_string(),
            maternal_surname: String::new(),
        },
        [given @ .., paternal, maternal] => NameParts {
            given_names: given.join(" "),
            paternal_surname: paternal.to_string(),
            maternal_surname: maternal.to_string(),
        },
    }
}
