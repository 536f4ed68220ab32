use serde::{Deserialize, Serialize};

use super::{join_history, Engine};
use crate::error::Result;
use crate::model::{EventKind, HistoryEntry};
use crate::store::{Discipline, RecordStore};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    #[serde(default, rename = "type")]
    pub kind: Option<EventKind>,
    #[serde(default)]
    pub justified: Option<bool>,
}

impl RecordFilter {
    fn admits(&self, entry: &HistoryEntry) -> bool {
        self.kind.map_or(true, |k| entry.record.kind == k)
            && self.justified.map_or(true, |j| entry.justified == j)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total: usize,
    pub absences: usize,
    pub tardies: usize,
    pub justified: usize,
    pub pending: usize,
}

impl<S: RecordStore> Engine<S> {
    /// Every attendance row in the workspace, most recent first.
    pub fn list_records(&self, filter: &RecordFilter) -> Result<Vec<HistoryEntry>> {
        let all = match self.store.discipline() {
            Discipline::Normalized => self.store.query_history(None)?,
            Discipline::Tally => {
                let log = self.store.list_log(None)?;
                let justifications = self.store.list_justifications(None)?;
                join_history(log, &justifications)
            }
        };
        Ok(all.into_iter().filter(|h| filter.admits(h)).collect())
    }

    pub fn stats(&self, filter: &RecordFilter) -> Result<AttendanceStats> {
        let mut stats = AttendanceStats::default();
        for entry in self.list_records(filter)? {
            stats.total += 1;
            match entry.record.kind {
                EventKind::Absence => stats.absences += 1,
                EventKind::Tardy => stats.tardies += 1,
            }
            if entry.justified {
                stats.justified += 1;
            } else {
                stats.pending += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::engine::RegistrationOutcome;
    use crate::model::StudentIdentity;
    use crate::store::{RecordRef, SqliteStore};
    use chrono::NaiveDate;

    fn scan(engine: &mut Engine<SqliteStore<'_>>, run: &str, kind: EventKind, day: u32) -> String {
        let now = NaiveDate::from_ymd_opt(2024, 6, day)
            .and_then(|d| d.and_hms_opt(8, 10, 0))
            .expect("timestamp");
        let identity = StudentIdentity {
            run: run.to_string(),
            full_name: "Diego Fuentes Lagos".to_string(),
            grade: "8° Básico".to_string(),
            section: "C".to_string(),
        };
        let reg = engine.register_event(&identity, kind, None, now).expect("register");
        match reg.outcome {
            RegistrationOutcome::Tally { log_id, .. } => log_id,
            RegistrationOutcome::Recorded { record_id, .. } => record_id,
        }
    }

    fn seeded(discipline: Discipline, conn: &rusqlite::Connection) -> Engine<SqliteStore<'_>> {
        let mut engine = Engine::new(SqliteStore::new(conn, discipline));
        let first = scan(&mut engine, "10-1", EventKind::Tardy, 3);
        scan(&mut engine, "10-1", EventKind::Absence, 4);
        scan(&mut engine, "20-2", EventKind::Tardy, 5);
        let now = NaiveDate::from_ymd_opt(2024, 6, 6)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .expect("timestamp");
        engine
            .justify_record(&RecordRef::Id(first), "Jane Doe", now)
            .expect("justify");
        engine
    }

    #[test]
    fn stats_agree_across_disciplines() {
        for discipline in [Discipline::Normalized, Discipline::Tally] {
            let conn = db::open_in_memory().expect("db");
            let engine = seeded(discipline, &conn);
            let stats = engine.stats(&RecordFilter::default()).expect("stats");
            assert_eq!(
                stats,
                AttendanceStats {
                    total: 3,
                    absences: 1,
                    tardies: 2,
                    justified: 1,
                    pending: 2,
                },
                "{:?}",
                discipline
            );
        }
    }

    #[test]
    fn filters_combine() {
        let conn = db::open_in_memory().expect("db");
        let engine = seeded(Discipline::Normalized, &conn);

        let pending_tardies = engine
            .list_records(&RecordFilter {
                kind: Some(EventKind::Tardy),
                justified: Some(false),
            })
            .expect("list");
        assert_eq!(pending_tardies.len(), 1);
        assert_eq!(pending_tardies[0].record.run, "20-2");

        let all = engine.list_records(&RecordFilter::default()).expect("list");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].record.date, "2024-06-05");
    }

    #[test]
    fn filter_reads_type_key() {
        let f: RecordFilter =
            serde_json::from_value(serde_json::json!({"type": "absence", "justified": true}))
                .expect("filter");
        assert_eq!(f.kind, Some(EventKind::Absence));
        assert_eq!(f.justified, Some(true));
    }
}
