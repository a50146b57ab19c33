//! Schema management for the question store.
//!
//! The service runs against databases produced by different tools: some carry
//! the full layout, some are bare dumps with only `entries` and `questions`.
//! [`ensure_schema`] brings either shape up to what the selector and test store
//! need, without touching existing rows.
//!
//! Every identifier that reaches a statement comes from the constant tables in
//! this module. The existence checks bind names as parameters and refuse
//! anything outside [`ALLOWED_TABLES`] / [`ALLOWED_COLUMNS`], so they can be
//! reused by admin tooling without opening an injection path.

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::Level;

pub const ALLOWED_TABLES: &[&str] = &["entries", "questions", "quizzes", "levels", "tests"];

pub const ALLOWED_COLUMNS: &[(&str, &str)] = &[
    ("entries", "id"),
    ("entries", "list_index"),
    ("entries", "kanji"),
    ("entries", "kana"),
    ("entries", "meaning"),
    ("questions", "id"),
    ("questions", "entry_id"),
    ("questions", "quiz_id"),
    ("questions", "q_type"),
    ("questions", "prompt"),
    ("questions", "correct_answer"),
    ("questions", "options"),
    ("questions", "correct_index"),
    ("questions", "level"),
    ("questions", "chapter"),
    ("questions", "created_at"),
    ("quizzes", "id"),
    ("quizzes", "title"),
    ("quizzes", "description"),
    ("quizzes", "created_at"),
    ("levels", "id"),
    ("levels", "tag"),
    ("tests", "id"),
    ("tests", "title"),
    ("tests", "questions"),
    ("tests", "created_at"),
];

const BASE_TABLES: &[&str] = &["entries", "questions"];

struct SupportTable {
    name: &'static str,
    ddl: &'static str,
}

const SUPPORT_TABLES: &[SupportTable] = &[
    SupportTable {
        name: "quizzes",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS quizzes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
    },
    SupportTable {
        name: "levels",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS levels (
                id INTEGER PRIMARY KEY,
                tag TEXT NOT NULL UNIQUE
            )
        "#,
    },
    SupportTable {
        name: "tests",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS tests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                questions TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
    },
];

struct ManagedColumn {
    table: &'static str,
    column: &'static str,
    ddl: &'static str,
}

// Columns added after the first question dumps were produced
const MANAGED_COLUMNS: &[ManagedColumn] = &[
    ManagedColumn {
        table: "questions",
        column: "quiz_id",
        ddl: "ALTER TABLE questions ADD COLUMN quiz_id INTEGER REFERENCES quizzes(id) ON DELETE SET NULL",
    },
    ManagedColumn {
        table: "questions",
        column: "level",
        ddl: "ALTER TABLE questions ADD COLUMN level INTEGER REFERENCES levels(id)",
    },
    ManagedColumn {
        table: "questions",
        column: "chapter",
        ddl: "ALTER TABLE questions ADD COLUMN chapter INTEGER",
    },
];

const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_questions_entry ON questions(entry_id);
    CREATE INDEX IF NOT EXISTS idx_questions_level ON questions(level);
    CREATE INDEX IF NOT EXISTS idx_questions_chapter ON questions(chapter);
    CREATE INDEX IF NOT EXISTS idx_entries_list_index ON entries(list_index);
"#;

/// Creates `entries` and `questions` in their bare shape. Only the seeding
/// commands call this; the server expects the base tables to exist already.
pub fn create_base_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            list_index INTEGER NOT NULL,
            kanji TEXT NOT NULL DEFAULT '',
            kana TEXT NOT NULL DEFAULT '',
            meaning TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id INTEGER NOT NULL,
            q_type TEXT NOT NULL,
            prompt TEXT NOT NULL,
            correct_answer TEXT NOT NULL,
            options TEXT NOT NULL,
            correct_index INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (entry_id) REFERENCES entries(id) ON DELETE CASCADE
        );
        "#,
    )?;
    Ok(())
}

pub fn ensure_schema(conn: &Connection) -> Result<()> {
    for table in BASE_TABLES {
        if !table_exists(conn, table)? {
            return Err(Error::Schema(format!("required table `{}` is missing", table)));
        }
    }

    for support in SUPPORT_TABLES {
        if !table_exists(conn, support.name)? {
            info!(table = support.name, "creating missing table");
        }
        conn.execute_batch(support.ddl)?;
    }

    for level in Level::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO levels (id, tag) VALUES (?1, ?2)",
            params![level.id(), level.tag()],
        )?;
    }

    for managed in MANAGED_COLUMNS {
        if column_exists(conn, managed.table, managed.column)? {
            debug!(table = managed.table, column = managed.column, "column present");
            continue;
        }
        info!(table = managed.table, column = managed.column, "adding missing column");
        if let Err(e) = conn.execute_batch(managed.ddl) {
            // Another process may have won the race between check and ALTER
            if is_duplicate_column(&e) {
                warn!(column = managed.column, "column appeared concurrently");
                continue;
            }
            return Err(e.into());
        }
    }

    conn.execute_batch(INDEXES)?;
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    if !ALLOWED_TABLES.contains(&table) {
        return Err(Error::Schema(format!("table `{}` is not managed", table)));
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !ALLOWED_COLUMNS.contains(&(table, column)) {
        return Err(Error::Schema(format!(
            "column `{}.{}` is not managed",
            table, column
        )));
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.contains("duplicate column name"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_store() -> Connection {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory database");
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        create_base_tables(&conn).expect("Failed to create base tables");
        conn
    }

    // Column list and table list, used to detect any schema change
    fn schema_snapshot(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT type || ':' || name || ':' || COALESCE(sql, '') FROM sqlite_master ORDER BY type, name")
            .unwrap();
        let rows = stmt.query_map([], |row| row.get(0)).unwrap();
        rows.collect::<rusqlite::Result<Vec<String>>>().unwrap()
    }

    mod allow_list_tests {
        use super::*;

        #[test]
        fn table_outside_allow_list_is_refused() {
            let conn = bare_store();
            let err = table_exists(&conn, "sqlite_master").unwrap_err();
            assert!(matches!(err, Error::Schema(_)));
        }

        #[test]
        fn column_outside_allow_list_is_refused() {
            let conn = bare_store();
            let err = column_exists(&conn, "questions", "prompt; DROP TABLE entries").unwrap_err();
            assert!(matches!(err, Error::Schema(_)));
            assert!(table_exists(&conn, "entries").unwrap());
        }

        #[test]
        fn managed_columns_are_all_allowed() {
            for managed in MANAGED_COLUMNS {
                assert!(ALLOWED_COLUMNS.contains(&(managed.table, managed.column)));
            }
        }
    }

    mod ensure_schema_tests {
        use super::*;

        #[test]
        fn bare_dump_gets_missing_columns() {
            let conn = bare_store();
            assert!(!column_exists(&conn, "questions", "level").unwrap());

            ensure_schema(&conn).unwrap();

            assert!(column_exists(&conn, "questions", "quiz_id").unwrap());
            assert!(column_exists(&conn, "questions", "level").unwrap());
            assert!(column_exists(&conn, "questions", "chapter").unwrap());
        }

        #[test]
        fn support_tables_are_created() {
            let conn = bare_store();
            ensure_schema(&conn).unwrap();

            for table in ["quizzes", "levels", "tests"] {
                assert!(table_exists(&conn, table).unwrap(), "{} should exist", table);
            }
        }

        #[test]
        fn levels_are_seeded() {
            let conn = bare_store();
            ensure_schema(&conn).unwrap();

            let tag: String = conn
                .query_row("SELECT tag FROM levels WHERE id = 3", [], |row| row.get(0))
                .unwrap();
            assert_eq!(tag, "n3");

            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM levels", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 5);
        }

        #[test]
        fn second_run_changes_nothing() {
            let conn = bare_store();
            ensure_schema(&conn).unwrap();
            let before = schema_snapshot(&conn);

            ensure_schema(&conn).unwrap();

            assert_eq!(schema_snapshot(&conn), before);
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM levels", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 5);
        }

        #[test]
        fn existing_rows_survive_migration() {
            let conn = bare_store();
            conn.execute(
                "INSERT INTO entries (list_index, kanji, kana, meaning) VALUES (1, '猫', 'ねこ', 'cat')",
                [],
            )
            .unwrap();
            conn.execute(
                r#"INSERT INTO questions (entry_id, q_type, prompt, correct_answer, options, correct_index)
                   VALUES (1, 'kana_to_meaning', 'ねこ', 'cat', '["cat","dog","bird","fish"]', 0)"#,
                [],
            )
            .unwrap();

            ensure_schema(&conn).unwrap();

            let (prompt, level): (String, Option<i64>) = conn
                .query_row("SELECT prompt, level FROM questions WHERE id = 1", [], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .unwrap();
            assert_eq!(prompt, "ねこ");
            assert!(level.is_none());
        }

        #[test]
        fn existing_test_rows_are_not_overwritten() {
            let conn = bare_store();
            ensure_schema(&conn).unwrap();
            conn.execute(
                "INSERT INTO tests (title, questions) VALUES ('kept', '[]')",
                [],
            )
            .unwrap();

            ensure_schema(&conn).unwrap();

            let title: String = conn
                .query_row("SELECT title FROM tests", [], |row| row.get(0))
                .unwrap();
            assert_eq!(title, "kept");
        }

        #[test]
        fn missing_base_table_is_schema_error() {
            let conn = Connection::open_in_memory().unwrap();
            let err = ensure_schema(&conn).unwrap_err();
            assert!(matches!(err, Error::Schema(_)));
        }

        #[test]
        fn duplicate_column_error_is_recognised() {
            let conn = bare_store();
            ensure_schema(&conn).unwrap();
            let err = conn
                .execute_batch("ALTER TABLE questions ADD COLUMN chapter INTEGER")
                .unwrap_err();
            assert!(is_duplicate_column(&err));
        }
    }
}
