use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filter::FilterDescriptor;
use crate::models::{
    BucketCount, NewEntry, NewQuestion, Question, QuestionType, StoreStats, Test, OPTION_COUNT,
};
use crate::selector::{self, Selection};
use crate::{schema, test_store};

pub type SqlitePool = Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Shared handle to the question store. Cloning is cheap; clones share the
/// pool and the schema-ready flag.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    schema_ready: Arc<AtomicBool>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(10))
            .build(manager)?;
        Ok(Self::from_pool(pool))
    }

    #[cfg(test)]
    /// Single-connection pool over a private in-memory database. Each
    /// in-memory connection is its own database, so the pool must not grow.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Creates the base tables if needed, then migrates. For seeding tools.
    pub fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        schema::create_base_tables(&conn)?;
        schema::ensure_schema(&conn)?;
        self.schema_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Runs the schema manager once per handle; later calls only check a flag.
    pub fn ensure_schema(&self) -> Result<()> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn = self.conn()?;
        schema::ensure_schema(&conn)?;
        self.schema_ready.store(true, Ordering::Release);
        debug!("schema verified");
        Ok(())
    }

    pub fn select_questions(&self, descriptor: &FilterDescriptor) -> Result<Selection> {
        self.ensure_schema()?;
        let conn = self.conn()?;
        selector::select(&conn, descriptor)
    }

    pub fn create_test(&self, title: &str, questions: &[Question]) -> Result<Test> {
        self.ensure_schema()?;
        let conn = self.conn()?;
        test_store::create_test(&conn, title, questions)
    }

    pub fn get_test(&self, id: i64) -> Result<Test> {
        self.ensure_schema()?;
        let conn = self.conn()?;
        test_store::get_test(&conn, id)
    }

    /// Inserts each entry with its questions in one transaction. Returns the
    /// number of questions written.
    pub fn import(&self, batch: &[(NewEntry, Vec<NewQuestion>)]) -> Result<usize> {
        self.ensure_schema()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        for (entry, questions) in batch {
            let entry_id = insert_entry(&tx, entry)?;
            for question in questions {
                insert_question(&tx, entry_id, question)?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        self.ensure_schema()?;
        let conn = self.conn()?;

        let total_entries: i64 =
            conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        let total_questions: i64 =
            conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
        let total_tests: i64 =
            conn.query_row("SELECT COUNT(*) FROM tests", [], |row| row.get(0))?;

        Ok(StoreStats {
            total_entries,
            total_questions,
            total_tests,
            by_level: bucket_counts(
                &conn,
                "SELECT level, COUNT(*) FROM questions GROUP BY level ORDER BY level",
            )?,
            by_chapter: bucket_counts(
                &conn,
                "SELECT chapter, COUNT(*) FROM questions GROUP BY chapter ORDER BY chapter",
            )?,
        })
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        "#,
    )
}

fn bucket_counts(conn: &Connection, sql: &str) -> Result<Vec<BucketCount>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(BucketCount {
            key: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn insert_entry(conn: &Connection, entry: &NewEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO entries (list_index, kanji, kana, meaning) VALUES (?1, ?2, ?3, ?4)",
        params![entry.list_index, entry.kanji, entry.kana, entry.meaning],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_question(conn: &Connection, entry_id: i64, question: &NewQuestion) -> Result<i64> {
    if question.options.len() != OPTION_COUNT || question.correct_index >= question.options.len() {
        return Err(Error::validation(format!(
            "question '{}' must have {} options and a valid correct index",
            question.prompt, OPTION_COUNT
        )));
    }
    let options = serde_json::to_string(&question.options)?;
    conn.execute(
        r#"
        INSERT INTO questions
            (entry_id, q_type, prompt, correct_answer, options, correct_index, level, chapter)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            entry_id,
            question.question_type.as_str(),
            question.prompt,
            question.correct_answer,
            options,
            question.correct_index as i64,
            question.level.map(|l| l.id()),
            question.chapter,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Column list matching [`question_from_row`], qualified with alias `q`.
pub const QUESTION_COLUMNS: &str = "q.id, q.entry_id, q.quiz_id, q.q_type, q.prompt, \
     q.correct_answer, q.options, q.correct_index, q.level, q.chapter, q.created_at";

pub fn question_from_row(row: &Row) -> rusqlite::Result<Question> {
    let q_type: Option<String> = row.get(3)?;
    let options_json: Option<String> = row.get(6)?;
    // Undecodable options leave the question malformed rather than failing the row
    let options: Vec<String> = options_json
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();
    let correct_index: Option<i64> = row.get(7)?;

    Ok(Question {
        id: row.get(0)?,
        entry_id: row.get(1)?,
        quiz_id: row.get(2)?,
        question_type: QuestionType::from_str(q_type.as_deref().unwrap_or_default()),
        prompt: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        correct_answer: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        options,
        // Negative or missing indexes are caught by `is_well_formed`
        correct_index: correct_index
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(usize::MAX),
        level: row.get(8)?,
        chapter: row.get(9)?,
        created_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::Level;

    mod init_tests {
        use super::*;

        #[test]
        fn init_creates_tables() {
            let db = setup_db();
            let conn = db.conn().unwrap();
            for table in ["entries", "questions", "levels", "tests", "quizzes"] {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                        params![table],
                        |row| row.get(0),
                    )
                    .unwrap();
                assert_eq!(count, 1, "{} should exist", table);
            }
        }

        #[test]
        fn init_is_idempotent() {
            let db = setup_db();
            db.init().unwrap();
            db.init().unwrap();
        }

        #[test]
        fn ensure_schema_without_base_tables_fails() {
            let db = Database::open_in_memory().unwrap();
            let err = db.ensure_schema().unwrap_err();
            assert!(matches!(err, Error::Schema(_)));
        }

        #[test]
        fn foreign_keys_are_enabled() {
            let db = setup_db();
            let enabled: i64 = db
                .conn()
                .unwrap()
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(enabled, 1);
        }
    }

    mod import_tests {
        use super::*;

        #[test]
        fn import_writes_entries_and_questions() {
            let db = setup_db();
            let written = seed_questions(&db, 3, Some(Level::N3), Some(2));
            assert_eq!(written, 3);

            let stats = db.get_stats().unwrap();
            assert_eq!(stats.total_entries, 3);
            assert_eq!(stats.total_questions, 3);
        }

        #[test]
        fn malformed_question_rolls_back_batch() {
            let db = setup_db();
            let mut bad = new_question("bad", None, None);
            bad.options.pop();
            let batch = vec![
                (
                    NewEntry {
                        list_index: 1,
                        kanji: String::new(),
                        kana: "ねこ".to_string(),
                        meaning: "cat".to_string(),
                    },
                    vec![new_question("good", None, None), bad],
                ),
            ];

            assert!(matches!(db.import(&batch), Err(Error::Validation(_))));
            assert_eq!(db.get_stats().unwrap().total_entries, 0);
        }

        #[test]
        fn deleting_entry_cascades_to_questions() {
            let db = setup_db();
            seed_questions(&db, 2, None, None);
            let conn = db.conn().unwrap();
            conn.execute("DELETE FROM entries WHERE list_index = 1", [])
                .unwrap();
            drop(conn);

            assert_eq!(db.get_stats().unwrap().total_questions, 1);
        }

        #[test]
        fn options_round_trip_through_row_mapping() {
            let db = setup_db();
            seed_questions(&db, 1, Some(Level::N2), None);
            let conn = db.conn().unwrap();
            let q = conn
                .query_row(
                    &format!("SELECT {} FROM questions q", QUESTION_COLUMNS),
                    [],
                    question_from_row,
                )
                .unwrap();
            assert_eq!(q.options.len(), 4);
            assert_eq!(q.options[q.correct_index], q.correct_answer);
            assert_eq!(q.level, Some(Level::N2.id()));
            assert!(q.chapter.is_none());
            assert!(q.quiz_id.is_none());
        }

        #[test]
        fn undecodable_options_map_to_malformed_question() {
            let db = setup_db();
            seed_questions(&db, 1, None, None);
            let conn = db.conn().unwrap();
            conn.execute("UPDATE questions SET options = 'a|b|c|d'", [])
                .unwrap();
            let q = conn
                .query_row(
                    &format!("SELECT {} FROM questions q", QUESTION_COLUMNS),
                    [],
                    question_from_row,
                )
                .unwrap();
            assert!(q.options.is_empty());
            assert!(!q.is_well_formed());
        }
    }

    mod stats_tests {
        use super::*;

        #[test]
        fn stats_group_by_level_and_chapter() {
            let db = setup_db();
            seed_questions(&db, 2, Some(Level::N4), Some(1));
            seed_questions(&db, 3, None, None);

            let stats = db.get_stats().unwrap();
            assert_eq!(stats.total_questions, 5);
            assert_eq!(
                stats.by_level,
                vec![
                    BucketCount { key: None, count: 3 },
                    BucketCount { key: Some(2), count: 2 },
                ]
            );
            assert_eq!(
                stats.by_chapter,
                vec![
                    BucketCount { key: None, count: 3 },
                    BucketCount { key: Some(1), count: 2 },
                ]
            );
        }

        #[test]
        fn stats_on_empty_store() {
            let db = setup_db();
            let stats = db.get_stats().unwrap();
            assert_eq!(stats.total_questions, 0);
            assert!(stats.by_level.is_empty());
        }
    }
}
