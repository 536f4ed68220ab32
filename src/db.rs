use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "pases.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Normalized discipline: students by reference, immutable attendance rows.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS estudiantes(
            id TEXT PRIMARY KEY,
            run TEXT NOT NULL UNIQUE,
            run_display TEXT NOT NULL,
            nombres TEXT NOT NULL DEFAULT '',
            apellido_paterno TEXT NOT NULL DEFAULT '',
            apellido_materno TEXT NOT NULL DEFAULT '',
            nombre_completo TEXT NOT NULL,
            grado TEXT NOT NULL DEFAULT '',
            letra TEXT NOT NULL DEFAULT '',
            curso TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    // Guardian contacts were added after the first release of the table.
    ensure_estudiantes_contact_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_estudiantes_nombre ON estudiantes(nombre_completo)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registros(
            id TEXT PRIMARY KEY,
            estudiante_id TEXT NOT NULL,
            fecha TEXT NOT NULL,
            hora TEXT NOT NULL,
            tipo TEXT NOT NULL,
            comentario TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(estudiante_id) REFERENCES estudiantes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registros_estudiante ON registros(estudiante_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registros_fecha_hora ON registros(fecha, hora)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS justificaciones(
            id TEXT PRIMARY KEY,
            registro_id TEXT NOT NULL UNIQUE,
            apoderado TEXT NOT NULL,
            fecha_justificacion TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(registro_id) REFERENCES registros(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE VIEW IF NOT EXISTS historial_completo AS
         SELECT
           r.id AS registro_id,
           e.id AS estudiante_id,
           e.run AS run,
           e.nombre_completo AS nombre,
           e.curso AS curso,
           r.fecha AS fecha,
           r.hora AS hora,
           r.tipo AS tipo,
           r.comentario AS comentario,
           CASE WHEN j.id IS NOT NULL AND TRIM(j.apoderado) <> '' THEN 'Sí' ELSE 'No' END AS justificado,
           j.apoderado AS apoderado,
           j.fecha_justificacion AS fecha_justificacion,
           r.created_at AS created_at
         FROM registros r
         JOIN estudiantes e ON e.id = r.estudiante_id
         LEFT JOIN justificaciones j ON j.registro_id = r.id",
        [],
    )?;

    // Tally discipline: one running total per (run, tipo) plus append-only logs
    // joined by composite key only.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS conteos(
            run TEXT NOT NULL,
            tipo TEXT NOT NULL,
            nombre TEXT NOT NULL,
            curso TEXT NOT NULL,
            fecha TEXT NOT NULL,
            hora TEXT NOT NULL,
            total_registros INTEGER NOT NULL,
            adicional TEXT NOT NULL DEFAULT '',
            PRIMARY KEY(run, tipo)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS historial(
            id TEXT PRIMARY KEY,
            run TEXT NOT NULL,
            nombre TEXT NOT NULL,
            curso TEXT NOT NULL,
            fecha TEXT NOT NULL,
            hora TEXT NOT NULL,
            tipo TEXT NOT NULL,
            comentario TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_historial_run ON historial(run)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS historial_justificaciones(
            id TEXT PRIMARY KEY,
            run TEXT NOT NULL,
            fecha TEXT NOT NULL,
            hora TEXT NOT NULL,
            tipo TEXT NOT NULL,
            apoderado TEXT NOT NULL,
            fecha_justificacion TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(run, fecha, hora, tipo)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_historial_justificaciones_run ON historial_justificaciones(run)",
        [],
    )?;

    Ok(())
}

fn ensure_estudiantes_contact_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in [
        "nombre_apoderado",
        "telefono_apoderado",
        "nombre_apoderado_suplente",
        "telefono_apoderado_suplente",
    ] {
        if !table_has_column(conn, "estudiantes", column)? {
            conn.execute(
                &format!("ALTER TABLE estudiantes ADD COLUMN {} TEXT", column),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
