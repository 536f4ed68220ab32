use serde::{Deserialize, Serialize};

/// Identity decoded from a student credential.
///
/// `run` keeps the case it was printed with; use [`StudentIdentity::key`] for
/// every comparison or lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub run: String,
    pub full_name: String,
    pub grade: String,
    pub section: String,
}

impl StudentIdentity {
    pub fn key(&self) -> String {
        normalize_run(&self.run)
    }

    /// Course label as the scanner has always stored it: grade then section, no separator.
    pub fn course(&self) -> String {
        format!("{}{}", self.grade, self.section)
    }
}

pub fn normalize_run(run: &str) -> String {
    run.trim().to_lowercase()
}

/// Trimmed, lower-cased form used for composite-key comparisons.
pub fn normalize_field(v: &str) -> String {
    v.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Tardy,
    Absence,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Tardy, EventKind::Absence];

    /// Label persisted in the store.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Tardy => "Atrasos",
            EventKind::Absence => "Inasistencias",
        }
    }

    pub fn parse(raw: &str) -> Option<EventKind> {
        match raw.trim().to_lowercase().as_str() {
            "tardy" | "atraso" | "atrasos" => Some(EventKind::Tardy),
            "absence" | "inasistencia" | "inasistencias" => Some(EventKind::Absence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub run: String,
    pub name: String,
    pub course: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub comment: Option<String>,
}

impl AttendanceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            run: self.run.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JustificationRecord {
    pub id: String,
    pub run: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub guardian_name: String,
    pub justification_date: String,
}

impl JustificationRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            run: self.run.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            kind: self.kind,
        }
    }
}

/// Composite key joining attendance rows to their justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub run: String,
    pub date: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
}

impl RecordKey {
    /// `run|date|time|kind`, every part trimmed and lower-cased.
    pub fn normalized(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            normalize_run(&self.run),
            normalize_field(&self.date),
            normalize_field(&self.time),
            normalize_field(self.kind.label())
        )
    }
}

/// An attendance row decorated with its justification status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub justified: bool,
    pub guardian_name: Option<String>,
    pub justification_date: Option<String>,
}

/// Running total for one student and one event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub run: String,
    pub name: String,
    pub course: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub date: String,
    pub time: String,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianContact {
    pub guardian_name: Option<String>,
    pub phone: Option<String>,
    pub alternate_guardian_name: Option<String>,
    pub alternate_phone: Option<String>,
}

impl GuardianContact {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.guardian_name.is_none()
            && self.phone.is_none()
            && self.alternate_guardian_name.is_none()
            && self.alternate_phone.is_none()
    }

    pub fn has_phone(&self) -> bool {
        self.phone.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub run: String,
    pub run_display: String,
    pub given_names: String,
    pub paternal_surname: String,
    pub maternal_surname: String,
    pub full_name: String,
    pub grade: String,
    pub section: String,
    pub course: String,
    pub contact: GuardianContact,
}
