//! Record Store abstraction consumed by the reconciliation engine.
//!
//! A store serves exactly one [`Discipline`]. The engine asks the store which
//! one it is and drives the matching sequence of calls.

mod sqlite;

pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AttendanceRecord, EventKind, GuardianContact, HistoryEntry, JustificationRecord, RecordKey,
    Student, Tally,
};
use crate::qr::NameParts;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0} is not available in the {1} discipline")]
    Unsupported(&'static str, &'static str),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// Student entity upserted by run, one immutable row per event.
    Normalized,
    /// One running-total row per student and kind, plus an append-only log.
    Tally,
}

impl Discipline {
    pub fn as_str(self) -> &'static str {
        match self {
            Discipline::Normalized => "normalized",
            Discipline::Tally => "tally",
        }
    }

    pub fn parse(raw: &str) -> Option<Discipline> {
        match raw.trim().to_lowercase().as_str() {
            "normalized" => Some(Discipline::Normalized),
            "tally" => Some(Discipline::Tally),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRef {
    pub id: String,
    pub run: String,
}

/// Points at an attendance row either by store id or by composite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    Id(String),
    Key(RecordKey),
}

#[derive(Debug, Clone)]
pub struct TallyFields {
    pub name: String,
    pub course: String,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub date: String,
    pub time: String,
    pub kind: EventKind,
    pub comment: Option<String>,
}

/// Student fields written by a scan or a bulk import. Empty strings leave the
/// stored value untouched.
#[derive(Debug, Clone)]
pub struct StudentUpsert {
    pub run: String,
    pub run_display: String,
    pub names: NameParts,
    pub full_name: String,
    pub grade: String,
    pub section: String,
    pub course: String,
}

pub trait RecordStore {
    fn discipline(&self) -> Discipline;

    // Tally discipline.
    fn get_by_run_and_type(&self, run: &str, kind: EventKind) -> StoreResult<Option<Tally>>;
    fn create_or_increment(
        &mut self,
        run: &str,
        kind: EventKind,
        fields: &TallyFields,
    ) -> StoreResult<Tally>;
    fn append_log(&mut self, entry: &AttendanceRecord) -> StoreResult<()>;
    /// Log rows, most recent first. `None` lists every student.
    fn list_log(&self, run: Option<&str>) -> StoreResult<Vec<AttendanceRecord>>;
    fn list_justifications(&self, run: Option<&str>) -> StoreResult<Vec<JustificationRecord>>;

    // Normalized discipline.
    fn upsert_student(&mut self, student: &StudentUpsert) -> StoreResult<StudentRef>;
    fn insert_attendance(
        &mut self,
        student: &StudentRef,
        fields: &NewAttendance,
    ) -> StoreResult<AttendanceRecord>;
    /// Server-side joined history, most recent first.
    fn query_history(&self, run: Option<&str>) -> StoreResult<Vec<HistoryEntry>>;

    // Students and guardian contacts.
    fn find_student(&self, run: &str) -> StoreResult<Option<Student>>;
    fn list_students(&self) -> StoreResult<Vec<Student>>;
    /// Returns false when no student has this run.
    fn update_guardian_contact(&mut self, run: &str, contact: &GuardianContact)
        -> StoreResult<bool>;

    // Justification, both disciplines.
    fn find_record(&self, target: &RecordRef) -> StoreResult<Option<AttendanceRecord>>;
    fn find_justification(
        &self,
        record: &AttendanceRecord,
    ) -> StoreResult<Option<JustificationRecord>>;
    fn insert_justification(
        &mut self,
        record: &AttendanceRecord,
        guardian_name: &str,
        date: &str,
    ) -> StoreResult<JustificationRecord>;
}
