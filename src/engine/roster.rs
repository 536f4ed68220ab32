use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::Engine;
use crate::contact::{ContactForm, ContactUpdate};
use crate::error::{EngineError, Result};
use crate::model::{normalize_run, GuardianContact, Student};
use crate::qr::{render_payload, NameParts};
use crate::store::{RecordStore, StudentUpsert};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentFilter {
    /// Case-insensitive substring of the full name or run.
    pub search: Option<String>,
    pub without_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactOutcome {
    pub contact: GuardianContact,
    pub cleared: bool,
}

/// One spreadsheet row, already parsed into named columns by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportRow {
    #[serde(deserialize_with = "loose_string")]
    pub run: String,
    #[serde(deserialize_with = "loose_string")]
    pub dv: String,
    #[serde(deserialize_with = "loose_string")]
    pub nombres: String,
    #[serde(deserialize_with = "loose_string")]
    pub apellido_paterno: String,
    #[serde(deserialize_with = "loose_string")]
    pub apellido_materno: String,
    #[serde(deserialize_with = "loose_string")]
    pub grado: String,
    #[serde(deserialize_with = "loose_string")]
    pub letra: String,
    #[serde(deserialize_with = "loose_string")]
    pub nombre_apoderado: String,
    #[serde(deserialize_with = "loose_string")]
    pub telefono_apoderado: String,
    #[serde(deserialize_with = "loose_string")]
    pub nombre_suplente: String,
    #[serde(deserialize_with = "loose_string")]
    pub telefono_suplente: String,
}

// Spreadsheet cells arrive as strings, numbers or null.
fn loose_string<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    })
}

impl ImportRow {
    /// `"{run}-{dv}"`, or the bare run when there is no check digit.
    pub fn full_run(&self) -> String {
        if self.dv.is_empty() {
            self.run.clone()
        } else {
            format!("{}-{}", self.run, self.dv)
        }
    }

    fn full_name(&self) -> String {
        [&self.nombres, &self.apellido_paterno, &self.apellido_materno]
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn contact_form(&self) -> ContactForm {
        ContactForm {
            guardian_name: self.nombre_apoderado.clone(),
            phone: self.telefono_apoderado.clone(),
            alternate_guardian_name: self.nombre_suplente.clone(),
            alternate_phone: self.telefono_suplente.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub row: usize,
    pub run: Option<String>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<ImportError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub run: String,
    pub full_name: String,
    pub course: String,
    pub payload: String,
    pub has_contact: bool,
}

impl<S: RecordStore> Engine<S> {
    pub fn students(&self, filter: &StudentFilter) -> Result<Vec<Student>> {
        let needle = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let students = self
            .store
            .list_students()?
            .into_iter()
            .filter(|s| !filter.without_contact || !s.contact.has_phone())
            .filter(|s| match &needle {
                Some(n) => s.full_name.to_lowercase().contains(n) || s.run.contains(n),
                None => true,
            })
            .collect();
        Ok(students)
    }

    pub fn update_contact(&mut self, run: &str, form: &ContactForm) -> Result<ContactOutcome> {
        let student = self
            .store
            .find_student(run)?
            .ok_or(EngineError::StudentNotFound)?;
        let (contact, cleared) = match form.validate(&student.contact)? {
            ContactUpdate::Set(c) => (c, false),
            ContactUpdate::Clear => (GuardianContact::default(), true),
        };
        if !self.store.update_guardian_contact(&student.run, &contact)? {
            return Err(EngineError::StudentNotFound);
        }
        info!(run = %student.run, cleared, "guardian contact updated");
        Ok(ContactOutcome { contact, cleared })
    }

    /// Upserts each row by run. A bad row is reported and skipped; the rest
    /// still go in.
    pub fn import_students(&mut self, rows: &[ImportRow]) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for (idx, row) in rows.iter().enumerate() {
            match self.import_one(row) {
                Ok(()) => report.imported += 1,
                Err(e @ EngineError::Backend(_)) => return Err(e),
                Err(e) => {
                    warn!(row = idx, error = %e, "import row rejected");
                    report.failed += 1;
                    report.errors.push(ImportError {
                        row: idx,
                        run: (!row.run.is_empty()).then(|| row.full_run()),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        info!(
            imported = report.imported,
            failed = report.failed,
            "student import finished"
        );
        Ok(report)
    }

    fn import_one(&mut self, row: &ImportRow) -> Result<()> {
        if row.run.is_empty() {
            return Err(EngineError::InvalidIdentity);
        }
        let form = row.contact_form();
        let blank = form.guardian_name.is_empty()
            && form.phone.is_empty()
            && form.alternate_guardian_name.is_empty()
            && form.alternate_phone.is_empty();
        // Phones are checked before the student row is written.
        let contact = if blank {
            None
        } else {
            match form.validate(&GuardianContact::default())? {
                ContactUpdate::Set(c) => Some(c),
                ContactUpdate::Clear => None,
            }
        };

        let full_run = row.full_run();
        let student = self.store.upsert_student(&StudentUpsert {
            run: full_run.clone(),
            run_display: full_run,
            names: NameParts {
                given_names: row.nombres.clone(),
                paternal_surname: row.apellido_paterno.clone(),
                maternal_surname: row.apellido_materno.clone(),
            },
            full_name: row.full_name(),
            grade: row.grado.clone(),
            section: row.letra.clone(),
            course: format!("{}{}", row.grado, row.letra),
        })?;
        if let Some(contact) = contact {
            self.store.update_guardian_contact(&student.run, &contact)?;
        }
        Ok(())
    }

    /// Printable credentials, ordered by course then given names.
    pub fn credentials(&self) -> Result<Vec<Credential>> {
        let mut students = self.store.list_students()?;
        students.sort_by(|a, b| {
            a.course
                .cmp(&b.course)
                .then_with(|| a.given_names.cmp(&b.given_names))
                .then_with(|| normalize_run(&a.run).cmp(&normalize_run(&b.run)))
        });
        Ok(students
            .into_iter()
            .map(|s| Credential {
                payload: render_payload(&s.run_display, &s.full_name, &s.grade, &s.section),
                has_contact: s.contact.has_phone(),
                run: s.run_display,
                full_name: s.full_name,
                course: s.course,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::qr::parse_payload;
    use crate::store::{Discipline, SqliteStore};

    fn rows(v: serde_json::Value) -> Vec<ImportRow> {
        serde_json::from_value(v).expect("rows")
    }

    #[test]
    fn import_builds_full_run_and_reports_bad_rows() {
        let conn = db::open_in_memory().expect("db");
        let mut engine = Engine::new(SqliteStore::new(&conn, Discipline::Normalized));
        let report = engine
            .import_students(&rows(serde_json::json!([
                {"run": 12345678, "dv": "k", "nombres": "Ana María", "apellidoPaterno": "Soto",
                 "apellidoMaterno": "Pérez", "grado": "1° Medio", "letra": "A",
                 "nombreApoderado": "Jane Doe", "telefonoApoderado": "9 1234 5678"},
                {"nombres": "Sin Run"},
                {"run": "222", "dv": "2", "nombres": "Luis", "telefonoApoderado": "12345"},
                {"run": "333", "dv": "3", "nombres": "Pedro", "apellidoPaterno": "Rojas",
                 "grado": "2° Medio", "letra": "B"}
            ])))
            .expect("import");

        assert_eq!(report.imported, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors[0].row, 1);
        assert_eq!(report.errors[0].code, "invalid_identity");
        assert_eq!(report.errors[1].run.as_deref(), Some("222-2"));
        assert_eq!(report.errors[1].code, "invalid_phone");

        let ana = engine.store().find_student("12345678-K").expect("find").expect("present");
        assert_eq!(ana.run_display, "12345678-k");
        assert_eq!(ana.full_name, "Ana María Soto Pérez");
        assert_eq!(ana.course, "1° MedioA");
        assert_eq!(ana.contact.phone.as_deref(), Some("+56912345678"));
        assert!(engine.store().find_student("222-2").expect("find").is_none());
    }

    #[test]
    fn contact_update_set_then_clear() {
        let conn = db::open_in_memory().expect("db");
        let mut engine = Engine::new(SqliteStore::new(&conn, Discipline::Normalized));
        engine
            .import_students(&rows(serde_json::json!([{"run": "5", "dv": "K", "nombres": "Ana"}])))
            .expect("import");

        let form = ContactForm {
            guardian_name: "Jane Doe".to_string(),
            phone: "+56 9 8765 4321".to_string(),
            ..ContactForm::default()
        };
        let set = engine.update_contact("5-k", &form).expect("set");
        assert!(!set.cleared);
        assert_eq!(set.contact.phone.as_deref(), Some("+56987654321"));

        let cleared = engine.update_contact("5-K", &ContactForm::default()).expect("clear");
        assert!(cleared.cleared);
        let s = engine.store().find_student("5-k").expect("find").expect("present");
        assert!(s.contact.is_empty());

        let again = engine.update_contact("5-K", &ContactForm::default());
        assert!(matches!(again, Err(EngineError::NothingToUpdate)));
        let missing = engine.update_contact("404-4", &form);
        assert!(matches!(missing, Err(EngineError::StudentNotFound)));
    }

    #[test]
    fn student_filters_and_credentials() {
        let conn = db::open_in_memory().expect("db");
        let mut engine = Engine::new(SqliteStore::new(&conn, Discipline::Normalized));
        engine
            .import_students(&rows(serde_json::json!([
                {"run": "1", "dv": "9", "nombres": "Bruno", "apellidoPaterno": "Díaz",
                 "grado": "2° Medio", "letra": "A", "nombreApoderado": "Jane", "telefonoApoderado": "912345678"},
                {"run": "2", "dv": "7", "nombres": "Alicia", "apellidoPaterno": "Mora",
                 "grado": "2° Medio", "letra": "A"},
                {"run": "3", "dv": "5", "nombres": "Carla", "apellidoPaterno": "Vega",
                 "grado": "1° Medio", "letra": "B"}
            ])))
            .expect("import");

        let without = engine
            .students(&StudentFilter {
                without_contact: true,
                ..StudentFilter::default()
            })
            .expect("list");
        assert_eq!(without.len(), 2);

        let found = engine
            .students(&StudentFilter {
                search: Some("MORA".to_string()),
                without_contact: false,
            })
            .expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].run, "2-7");

        let creds = engine.credentials().expect("credentials");
        let order: Vec<&str> = creds.iter().map(|c| c.run.as_str()).collect();
        assert_eq!(order, vec!["3-5", "2-7", "1-9"]);
        assert!(creds[2].has_contact);

        let identity = parse_payload(&creds[1].payload).expect("payload parses");
        assert_eq!(identity.run, "2-7");
        assert_eq!(identity.full_name, "Alicia Mora");
        assert_eq!(identity.grade, "2° Medio");
        assert_eq!(identity.section, "A");
    }
}
