use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    Discipline, NewAttendance, RecordRef, RecordStore, StoreError, StoreResult, StudentRef,
    StudentUpsert, TallyFields,
};
use crate::model::{
    normalize_field, normalize_run, AttendanceRecord, EventKind, GuardianContact, HistoryEntry,
    JustificationRecord, Student, Tally,
};

impl FromSql for EventKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        EventKind::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown tipo: {}", s).into()))
    }
}

impl ToSql for EventKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.label()))
    }
}

fn stamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

fn blank_to_none(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

// Column order: id, run, nombre, curso, fecha, hora, tipo, comentario
fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        run: r.get(1)?,
        name: r.get(2)?,
        course: r.get(3)?,
        date: r.get(4)?,
        time: r.get(5)?,
        kind: r.get(6)?,
        comment: blank_to_none(r.get(7)?),
    })
}

const STUDENT_COLUMNS: &str = "id, run, run_display, nombres, apellido_paterno, apellido_materno,
     nombre_completo, grado, letra, curso,
     nombre_apoderado, telefono_apoderado, nombre_apoderado_suplente, telefono_apoderado_suplente";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        run: r.get(1)?,
        run_display: r.get(2)?,
        given_names: r.get(3)?,
        paternal_surname: r.get(4)?,
        maternal_surname: r.get(5)?,
        full_name: r.get(6)?,
        grade: r.get(7)?,
        section: r.get(8)?,
        course: r.get(9)?,
        contact: GuardianContact {
            guardian_name: blank_to_none(r.get(10)?),
            phone: blank_to_none(r.get(11)?),
            alternate_guardian_name: blank_to_none(r.get(12)?),
            alternate_phone: blank_to_none(r.get(13)?),
        },
    })
}

/// SQLite-backed store serving a single discipline.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
    discipline: Discipline,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection, discipline: Discipline) -> Self {
        Self { conn, discipline }
    }

    fn require(&self, wanted: Discipline, what: &'static str) -> StoreResult<()> {
        if self.discipline != wanted {
            return Err(StoreError::Unsupported(what, self.discipline.as_str()));
        }
        Ok(())
    }
}

impl RecordStore for SqliteStore<'_> {
    fn discipline(&self) -> Discipline {
        self.discipline
    }

    fn get_by_run_and_type(&self, run: &str, kind: EventKind) -> StoreResult<Option<Tally>> {
        self.require(Discipline::Tally, "tally lookup")?;
        let tally = self
            .conn
            .query_row(
                "SELECT run, nombre, curso, tipo, fecha, hora, total_registros
                 FROM conteos
                 WHERE run = ? AND tipo = ?",
                (normalize_run(run), kind),
                |r| {
                    Ok(Tally {
                        run: r.get(0)?,
                        name: r.get(1)?,
                        course: r.get(2)?,
                        kind: r.get(3)?,
                        date: r.get(4)?,
                        time: r.get(5)?,
                        total: r.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(tally)
    }

    fn create_or_increment(
        &mut self,
        run: &str,
        kind: EventKind,
        fields: &TallyFields,
    ) -> StoreResult<Tally> {
        self.require(Discipline::Tally, "tally write")?;
        let tally = self.conn.query_row(
            "INSERT INTO conteos(run, tipo, nombre, curso, fecha, hora, total_registros, adicional)
             VALUES(?, ?, ?, ?, ?, ?, 1, '')
             ON CONFLICT(run, tipo) DO UPDATE SET
               fecha = excluded.fecha,
               hora = excluded.hora,
               total_registros = conteos.total_registros + 1
             RETURNING run, nombre, curso, tipo, fecha, hora, total_registros",
            (
                normalize_run(run),
                kind,
                &fields.name,
                &fields.course,
                &fields.date,
                &fields.time,
            ),
            |r| {
                Ok(Tally {
                    run: r.get(0)?,
                    name: r.get(1)?,
                    course: r.get(2)?,
                    kind: r.get(3)?,
                    date: r.get(4)?,
                    time: r.get(5)?,
                    total: r.get(6)?,
                })
            },
        )?;
        Ok(tally)
    }

    fn append_log(&mut self, entry: &AttendanceRecord) -> StoreResult<()> {
        self.require(Discipline::Tally, "historial log")?;
        self.conn.execute(
            "INSERT INTO historial(id, run, nombre, curso, fecha, hora, tipo, comentario, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &entry.id,
                normalize_run(&entry.run),
                &entry.name,
                &entry.course,
                &entry.date,
                &entry.time,
                entry.kind,
                &entry.comment,
                stamp(),
            ),
        )?;
        Ok(())
    }

    fn list_log(&self, run: Option<&str>) -> StoreResult<Vec<AttendanceRecord>> {
        self.require(Discipline::Tally, "historial log")?;
        let run = run.map(normalize_run);
        let mut stmt = self.conn.prepare(
            "SELECT id, run, nombre, curso, fecha, hora, tipo, comentario
             FROM historial
             WHERE (?1 IS NULL OR run = ?1)
             ORDER BY fecha DESC, hora DESC, created_at DESC",
        )?;
        let rows = stmt
            .query_map([&run], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_justifications(&self, run: Option<&str>) -> StoreResult<Vec<JustificationRecord>> {
        self.require(Discipline::Tally, "justification log")?;
        let run = run.map(normalize_run);
        let mut stmt = self.conn.prepare(
            "SELECT id, run, fecha, hora, tipo, apoderado, fecha_justificacion
             FROM historial_justificaciones
             WHERE (?1 IS NULL OR run = ?1)
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([&run], |r| {
                Ok(JustificationRecord {
                    id: r.get(0)?,
                    run: r.get(1)?,
                    date: r.get(2)?,
                    time: r.get(3)?,
                    kind: r.get(4)?,
                    guardian_name: r.get(5)?,
                    justification_date: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_student(&mut self, student: &StudentUpsert) -> StoreResult<StudentRef> {
        let now = stamp();
        let (id, run) = self.conn.query_row(
            "INSERT INTO estudiantes(
               id, run, run_display, nombres, apellido_paterno, apellido_materno,
               nombre_completo, grado, letra, curso, created_at, updated_at
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT(run) DO UPDATE SET
               run_display = excluded.run_display,
               nombres = CASE WHEN excluded.nombre_completo <> '' THEN excluded.nombres ELSE estudiantes.nombres END,
               apellido_paterno = CASE WHEN excluded.nombre_completo <> '' THEN excluded.apellido_paterno ELSE estudiantes.apellido_paterno END,
               apellido_materno = CASE WHEN excluded.nombre_completo <> '' THEN excluded.apellido_materno ELSE estudiantes.apellido_materno END,
               nombre_completo = CASE WHEN excluded.nombre_completo <> '' THEN excluded.nombre_completo ELSE estudiantes.nombre_completo END,
               grado = CASE WHEN excluded.grado <> '' THEN excluded.grado ELSE estudiantes.grado END,
               letra = CASE WHEN excluded.letra <> '' THEN excluded.letra ELSE estudiantes.letra END,
               curso = CASE WHEN excluded.curso <> '' THEN excluded.curso ELSE estudiantes.curso END,
               updated_at = excluded.updated_at
             RETURNING id, run",
            (
                Uuid::new_v4().to_string(),
                normalize_run(&student.run),
                student.run_display.trim(),
                &student.names.given_names,
                &student.names.paternal_surname,
                &student.names.maternal_surname,
                student.full_name.trim(),
                student.grade.trim(),
                student.section.trim(),
                &student.course,
                &now,
            ),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )?;
        Ok(StudentRef { id, run })
    }

    fn insert_attendance(
        &mut self,
        student: &StudentRef,
        fields: &NewAttendance,
    ) -> StoreResult<AttendanceRecord> {
        self.require(Discipline::Normalized, "attendance insert")?;
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO registros(id, estudiante_id, fecha, hora, tipo, comentario, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &student.id,
                &fields.date,
                &fields.time,
                fields.kind,
                &fields.comment,
                stamp(),
            ),
        )?;
        let record = self.conn.query_row(
            "SELECT r.id, e.run, e.nombre_completo, e.curso, r.fecha, r.hora, r.tipo, r.comentario
             FROM registros r
             JOIN estudiantes e ON e.id = r.estudiante_id
             WHERE r.id = ?",
            [&id],
            record_from_row,
        )?;
        Ok(record)
    }

    fn query_history(&self, run: Option<&str>) -> StoreResult<Vec<HistoryEntry>> {
        self.require(Discipline::Normalized, "joined history")?;
        let run = run.map(normalize_run);
        let mut stmt = self.conn.prepare(
            "SELECT registro_id, run, nombre, curso, fecha, hora, tipo, comentario,
                    justificado, apoderado, fecha_justificacion
             FROM historial_completo
             WHERE (?1 IS NULL OR run = ?1)
             ORDER BY fecha DESC, hora DESC, created_at DESC",
        )?;
        let rows = stmt
            .query_map([&run], |r| {
                let record = record_from_row(r)?;
                let justified = r.get::<_, String>(8)? == "Sí";
                let (guardian_name, justification_date) = if justified {
                    (blank_to_none(r.get(9)?), blank_to_none(r.get(10)?))
                } else {
                    (None, None)
                };
                Ok(HistoryEntry {
                    record,
                    justified,
                    guardian_name,
                    justification_date,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_student(&self, run: &str) -> StoreResult<Option<Student>> {
        let sql = format!("SELECT {} FROM estudiantes WHERE run = ?", STUDENT_COLUMNS);
        let student = self
            .conn
            .query_row(&sql, [normalize_run(run)], student_from_row)
            .optional()?;
        Ok(student)
    }

    fn list_students(&self) -> StoreResult<Vec<Student>> {
        let sql = format!(
            "SELECT {} FROM estudiantes ORDER BY nombre_completo, run",
            STUDENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn update_guardian_contact(
        &mut self,
        run: &str,
        contact: &GuardianContact,
    ) -> StoreResult<bool> {
        let changed = self.conn.execute(
            "UPDATE estudiantes
             SET nombre_apoderado = ?,
                 telefono_apoderado = ?,
                 nombre_apoderado_suplente = ?,
                 telefono_apoderado_suplente = ?,
                 updated_at = ?
             WHERE run = ?",
            (
                &contact.guardian_name,
                &contact.phone,
                &contact.alternate_guardian_name,
                &contact.alternate_phone,
                stamp(),
                normalize_run(run),
            ),
        )?;
        Ok(changed > 0)
    }

    fn find_record(&self, target: &RecordRef) -> StoreResult<Option<AttendanceRecord>> {
        let record = match (self.discipline, target) {
            (Discipline::Normalized, RecordRef::Id(id)) => self
                .conn
                .query_row(
                    "SELECT r.id, e.run, e.nombre_completo, e.curso, r.fecha, r.hora, r.tipo, r.comentario
                     FROM registros r
                     JOIN estudiantes e ON e.id = r.estudiante_id
                     WHERE r.id = ?",
                    [id],
                    record_from_row,
                )
                .optional()?,
            // Same-minute scans share a key; an unjustified row is preferred.
            (Discipline::Normalized, RecordRef::Key(key)) => self
                .conn
                .query_row(
                    "SELECT r.id, e.run, e.nombre_completo, e.curso, r.fecha, r.hora, r.tipo, r.comentario
                     FROM registros r
                     JOIN estudiantes e ON e.id = r.estudiante_id
                     LEFT JOIN justificaciones j
                       ON j.registro_id = r.id AND TRIM(j.apoderado) <> ''
                     WHERE e.run = ?
                       AND LOWER(TRIM(r.fecha)) = ?
                       AND LOWER(TRIM(r.hora)) = ?
                       AND LOWER(r.tipo) = ?
                     ORDER BY j.id IS NOT NULL, r.created_at
                     LIMIT 1",
                    (
                        normalize_run(&key.run),
                        normalize_field(&key.date),
                        normalize_field(&key.time),
                        normalize_field(key.kind.label()),
                    ),
                    record_from_row,
                )
                .optional()?,
            (Discipline::Tally, RecordRef::Id(id)) => self
                .conn
                .query_row(
                    "SELECT id, run, nombre, curso, fecha, hora, tipo, comentario
                     FROM historial
                     WHERE id = ?",
                    [id],
                    record_from_row,
                )
                .optional()?,
            (Discipline::Tally, RecordRef::Key(key)) => self
                .conn
                .query_row(
                    "SELECT id, run, nombre, curso, fecha, hora, tipo, comentario
                     FROM historial
                     WHERE run = ?
                       AND LOWER(TRIM(fecha)) = ?
                       AND LOWER(TRIM(hora)) = ?
                       AND LOWER(tipo) = ?
                     ORDER BY created_at
                     LIMIT 1",
                    (
                        normalize_run(&key.run),
                        normalize_field(&key.date),
                        normalize_field(&key.time),
                        normalize_field(key.kind.label()),
                    ),
                    record_from_row,
                )
                .optional()?,
        };
        Ok(record)
    }

    fn find_justification(
        &self,
        record: &AttendanceRecord,
    ) -> StoreResult<Option<JustificationRecord>> {
        let found = match self.discipline {
            Discipline::Normalized => self
                .conn
                .query_row(
                    "SELECT id, apoderado, fecha_justificacion
                     FROM justificaciones
                     WHERE registro_id = ? AND TRIM(apoderado) <> ''",
                    [&record.id],
                    |r| {
                        Ok(JustificationRecord {
                            id: r.get(0)?,
                            run: record.run.clone(),
                            date: record.date.clone(),
                            time: record.time.clone(),
                            kind: record.kind,
                            guardian_name: r.get(1)?,
                            justification_date: r.get(2)?,
                        })
                    },
                )
                .optional()?,
            Discipline::Tally => self
                .conn
                .query_row(
                    "SELECT id, run, fecha, hora, tipo, apoderado, fecha_justificacion
                     FROM historial_justificaciones
                     WHERE run = ?
                       AND LOWER(TRIM(fecha)) = ?
                       AND LOWER(TRIM(hora)) = ?
                       AND LOWER(tipo) = ?
                       AND TRIM(apoderado) <> ''
                     LIMIT 1",
                    (
                        normalize_run(&record.run),
                        normalize_field(&record.date),
                        normalize_field(&record.time),
                        normalize_field(record.kind.label()),
                    ),
                    |r| {
                        Ok(JustificationRecord {
                            id: r.get(0)?,
                            run: r.get(1)?,
                            date: r.get(2)?,
                            time: r.get(3)?,
                            kind: r.get(4)?,
                            guardian_name: r.get(5)?,
                            justification_date: r.get(6)?,
                        })
                    },
                )
                .optional()?,
        };
        Ok(found)
    }

    fn insert_justification(
        &mut self,
        record: &AttendanceRecord,
        guardian_name: &str,
        date: &str,
    ) -> StoreResult<JustificationRecord> {
        let id = Uuid::new_v4().to_string();
        match self.discipline {
            Discipline::Normalized => {
                self.conn.execute(
                    "INSERT INTO justificaciones(id, registro_id, apoderado, fecha_justificacion, created_at)
                     VALUES(?, ?, ?, ?, ?)",
                    (&id, &record.id, guardian_name, date, stamp()),
                )?;
            }
            Discipline::Tally => {
                self.conn.execute(
                    "INSERT INTO historial_justificaciones(
                       id, run, fecha, hora, tipo, apoderado, fecha_justificacion, created_at
                     )
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        &id,
                        normalize_run(&record.run),
                        &record.date,
                        &record.time,
                        record.kind,
                        guardian_name,
                        date,
                        stamp(),
                    ),
                )?;
            }
        }
        Ok(JustificationRecord {
            id,
            run: record.run.clone(),
            date: record.date.clone(),
            time: record.time.clone(),
            kind: record.kind,
            guardian_name: guardian_name.to_string(),
            justification_date: date.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::RecordKey;
    use crate::qr::split_full_name;

    fn upsert(full_name: &str, run: &str) -> StudentUpsert {
        StudentUpsert {
            run: run.to_string(),
            run_display: run.to_string(),
            names: split_full_name(full_name),
            full_name: full_name.to_string(),
            grade: "2° Medio".to_string(),
            section: "B".to_string(),
            course: "2° MedioB".to_string(),
        }
    }

    #[test]
    fn upsert_student_is_keyed_by_normalized_run() {
        let conn = db::open_in_memory().expect("db");
        let mut store = SqliteStore::new(&conn, Discipline::Normalized);
        let a = store.upsert_student(&upsert("Ana Soto Pérez", "1234-K")).expect("insert");
        let b = store.upsert_student(&upsert("Ana María Soto Pérez", " 1234-k ")).expect("update");
        assert_eq!(a.id, b.id);
        assert_eq!(b.run, "1234-k");

        let s = store.find_student("1234-K").expect("find").expect("present");
        assert_eq!(s.full_name, "Ana María Soto Pérez");
        assert_eq!(s.given_names, "Ana María");
        assert_eq!(s.maternal_surname, "Pérez");
        assert_eq!(store.list_students().expect("list").len(), 1);
    }

    #[test]
    fn upsert_with_blank_fields_keeps_stored_values() {
        let conn = db::open_in_memory().expect("db");
        let mut store = SqliteStore::new(&conn, Discipline::Normalized);
        store.upsert_student(&upsert("Luis Rojas", "77")).expect("insert");
        let mut blank = upsert("", "77");
        blank.grade = String::new();
        blank.section = String::new();
        blank.course = String::new();
        store.upsert_student(&blank).expect("update");
        let s = store.find_student("77").expect("find").expect("present");
        assert_eq!(s.full_name, "Luis Rojas");
        assert_eq!(s.course, "2° MedioB");
    }

    #[test]
    fn discipline_guards_reject_foreign_calls() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn, Discipline::Normalized);
        assert!(matches!(
            store.get_by_run_and_type("1", EventKind::Tardy),
            Err(StoreError::Unsupported(_, "normalized"))
        ));
        let tally = SqliteStore::new(&conn, Discipline::Tally);
        assert!(matches!(
            tally.query_history(None),
            Err(StoreError::Unsupported(_, "tally"))
        ));
    }

    #[test]
    fn tally_record_lookup_by_key_ignores_case_and_spaces() {
        let conn = db::open_in_memory().expect("db");
        let mut store = SqliteStore::new(&conn, Discipline::Tally);
        let entry = AttendanceRecord {
            id: "h1".to_string(),
            run: "5-K".to_string(),
            name: "Ana".to_string(),
            course: "1A".to_string(),
            date: "2024-03-01".to_string(),
            time: "08:05".to_string(),
            kind: EventKind::Tardy,
            comment: None,
        };
        store.append_log(&entry).expect("append");
        let found = store
            .find_record(&RecordRef::Key(RecordKey {
                run: " 5-k".to_string(),
                date: "2024-03-01 ".to_string(),
                time: "08:05".to_string(),
                kind: EventKind::Tardy,
            }))
            .expect("lookup")
            .expect("present");
        assert_eq!(found.id, "h1");
        assert_eq!(found.run, "5-k");
    }
}
