//! Attendance reconciliation: turns a scan into store calls and derives the
//! justification status shown in history views.

mod dashboard;
mod roster;

pub use dashboard::RecordFilter;
pub use roster::{ImportRow, StudentFilter};

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{
    normalize_run, AttendanceRecord, EventKind, HistoryEntry, JustificationRecord,
    StudentIdentity,
};
use crate::qr::split_full_name;
use crate::store::{Discipline, NewAttendance, RecordRef, RecordStore, StudentUpsert, TallyFields};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub student: StudentIdentity,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub date: String,
    pub time: String,
    pub outcome: RegistrationOutcome,
    /// Tardy for a student without a guardian phone. Advisory only.
    pub needs_contact_info: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "discipline", rename_all = "lowercase")]
pub enum RegistrationOutcome {
    #[serde(rename_all = "camelCase")]
    Tally {
        total: i64,
        created: bool,
        log_id: String,
    },
    #[serde(rename = "normalized", rename_all = "camelCase")]
    Recorded {
        student_id: String,
        record_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingView {
    pub records: Vec<HistoryEntry>,
    pub history_len: usize,
    /// History exists and every entry in it is justified.
    pub all_justified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub total: i64,
    pub last_date: String,
    pub last_time: String,
}

pub struct Engine<S> {
    store: S,
}

impl<S: RecordStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn register_event(
        &mut self,
        identity: &StudentIdentity,
        kind: EventKind,
        comment: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Registration> {
        if identity.key().is_empty() {
            return Err(EngineError::InvalidIdentity);
        }
        let date = now.format(DATE_FORMAT).to_string();
        let time = now.format(TIME_FORMAT).to_string();
        let comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        match self.store.discipline() {
            Discipline::Tally => self.register_tally(identity, kind, comment, date, time),
            Discipline::Normalized => {
                self.register_normalized(identity, kind, comment, date, time)
            }
        }
    }

    fn register_tally(
        &mut self,
        identity: &StudentIdentity,
        kind: EventKind,
        comment: Option<String>,
        date: String,
        time: String,
    ) -> Result<Registration> {
        let run = identity.key();
        let previous = self.store.get_by_run_and_type(&run, kind)?;
        let tally = self.store.create_or_increment(
            &run,
            kind,
            &TallyFields {
                name: identity.full_name.clone(),
                course: identity.course(),
                date: date.clone(),
                time: time.clone(),
            },
        )?;
        info!(run = %run, kind = kind.label(), total = tally.total, "tally updated");

        let entry = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            run: run.clone(),
            name: identity.full_name.clone(),
            course: identity.course(),
            date: date.clone(),
            time: time.clone(),
            kind,
            comment,
        };
        let registration = Registration {
            student: identity.clone(),
            kind,
            date,
            time,
            outcome: RegistrationOutcome::Tally {
                total: tally.total,
                created: previous.is_none(),
                log_id: entry.id.clone(),
            },
            needs_contact_info: false,
        };

        if let Err(source) = self.store.append_log(&entry) {
            warn!(run = %run, error = %source, "historial append failed after tally write");
            return Err(EngineError::PartialFailure {
                committed: Box::new(registration),
                source,
            });
        }
        Ok(registration)
    }

    fn register_normalized(
        &mut self,
        identity: &StudentIdentity,
        kind: EventKind,
        comment: Option<String>,
        date: String,
        time: String,
    ) -> Result<Registration> {
        let run = identity.key();
        let student = self.store.upsert_student(&StudentUpsert {
            run: run.clone(),
            run_display: identity.run.clone(),
            names: split_full_name(&identity.full_name),
            full_name: identity.full_name.clone(),
            grade: identity.grade.clone(),
            section: identity.section.clone(),
            course: identity.course(),
        })?;
        let record = self.store.insert_attendance(
            &student,
            &NewAttendance {
                date: date.clone(),
                time: time.clone(),
                kind,
                comment,
            },
        )?;
        info!(run = %run, kind = kind.label(), record = %record.id, "attendance recorded");

        // The row is committed at this point; a failed contact lookup only
        // suppresses the prompt.
        let needs_contact_info = kind == EventKind::Tardy
            && match self.store.find_student(&run) {
                Ok(Some(s)) => !s.contact.has_phone(),
                Ok(None) => true,
                Err(e) => {
                    warn!(run = %run, error = %e, "guardian contact lookup failed");
                    false
                }
            };

        Ok(Registration {
            student: identity.clone(),
            kind,
            date,
            time,
            outcome: RegistrationOutcome::Recorded {
                student_id: student.id,
                record_id: record.id,
            },
            needs_contact_info,
        })
    }

    /// History for one student, most recent first. Empty means no history.
    pub fn fetch_history(&self, run: &str) -> Result<Vec<HistoryEntry>> {
        let run = normalize_run(run);
        if run.is_empty() {
            return Err(EngineError::InvalidIdentity);
        }
        match self.store.discipline() {
            Discipline::Normalized => Ok(self.store.query_history(Some(&run))?),
            Discipline::Tally => {
                let log: Vec<AttendanceRecord> = self
                    .store
                    .list_log(Some(&run))?
                    .into_iter()
                    .filter(|r| normalize_run(&r.run) == run)
                    .collect();
                let justifications = self.store.list_justifications(Some(&run))?;
                Ok(join_history(log, &justifications))
            }
        }
    }

    pub fn pending(&self, run: &str) -> Result<PendingView> {
        let history = self.fetch_history(run)?;
        let history_len = history.len();
        let records: Vec<HistoryEntry> = history.into_iter().filter(|h| !h.justified).collect();
        Ok(PendingView {
            all_justified: history_len > 0 && records.is_empty(),
            records,
            history_len,
        })
    }

    /// Per-kind totals with the most recent date and time. Kinds the student
    /// has no records for are omitted.
    pub fn summary(&self, run: &str) -> Result<Vec<KindSummary>> {
        let key = normalize_run(run);
        if key.is_empty() {
            return Err(EngineError::InvalidIdentity);
        }
        let mut out = Vec::new();
        match self.store.discipline() {
            Discipline::Tally => {
                for kind in EventKind::ALL {
                    if let Some(t) = self.store.get_by_run_and_type(&key, kind)? {
                        out.push(KindSummary {
                            kind,
                            total: t.total,
                            last_date: t.date,
                            last_time: t.time,
                        });
                    }
                }
            }
            Discipline::Normalized => {
                let history = self.store.query_history(Some(&key))?;
                for kind in EventKind::ALL {
                    let mut of_kind = history.iter().filter(|h| h.record.kind == kind);
                    let Some(latest) = of_kind.next() else {
                        continue;
                    };
                    out.push(KindSummary {
                        kind,
                        total: 1 + of_kind.count() as i64,
                        last_date: latest.record.date.clone(),
                        last_time: latest.record.time.clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    pub fn justify_record(
        &mut self,
        target: &RecordRef,
        guardian_name: &str,
        now: NaiveDateTime,
    ) -> Result<JustificationRecord> {
        let guardian = guardian_name.trim();
        if guardian.is_empty() {
            return Err(EngineError::MissingGuardianName);
        }
        let record = self
            .store
            .find_record(target)?
            .ok_or(EngineError::RecordNotFound)?;
        if self.store.find_justification(&record)?.is_some() {
            return Err(EngineError::AlreadyJustified);
        }
        let date = now.format(DATE_FORMAT).to_string();
        let justification = self.store.insert_justification(&record, guardian, &date)?;
        info!(
            run = %record.run,
            kind = record.kind.label(),
            date = %record.date,
            time = %record.time,
            "record justified"
        );
        Ok(justification)
    }
}

/// Client-side join for stores without a joined history view.
///
/// A record is justified iff a justification with a non-blank guardian name
/// shares its normalized `(run, date, time, kind)` key. Hash lookup, so
/// O(n + m); the first matching justification wins.
pub fn join_history(
    records: Vec<AttendanceRecord>,
    justifications: &[JustificationRecord],
) -> Vec<HistoryEntry> {
    let mut by_key: HashMap<String, &JustificationRecord> =
        HashMap::with_capacity(justifications.len());
    for j in justifications {
        if j.guardian_name.trim().is_empty() {
            continue;
        }
        by_key.entry(j.key().normalized()).or_insert(j);
    }

    records
        .into_iter()
        .map(|record| {
            let matched = by_key.get(&record.key().normalized()).copied();
            HistoryEntry {
                justified: matched.is_some(),
                guardian_name: matched.map(|j| j.guardian_name.trim().to_string()),
                justification_date: matched
                    .map(|j| j.justification_date.trim().to_string())
                    .filter(|d| !d.is_empty()),
                record,
            }
        })
        .collect()
}
