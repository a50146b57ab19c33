//! Append-only storage of generated tests.
//!
//! A test row holds its questions as a JSON snapshot, so it keeps rendering
//! and grading the same way after the source questions change or disappear.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::models::{Question, Test, TestQuestion};

pub fn default_title(level_label: &str) -> String {
    format!("Test - {} - {}", level_label, Utc::now().to_rfc3339())
}

pub fn create_test(conn: &Connection, title: &str, questions: &[Question]) -> Result<Test> {
    let snapshot: Vec<TestQuestion> = questions.iter().map(TestQuestion::from).collect();
    let questions_json = serde_json::to_string(&snapshot)?;
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO tests (title, questions, created_at) VALUES (?1, ?2, ?3)",
        params![title, questions_json, created_at],
    )?;
    let id = conn.last_insert_rowid();
    info!(test_id = id, questions = snapshot.len(), "test created");

    Ok(Test {
        id,
        title: title.to_string(),
        questions: snapshot,
        created_at,
    })
}

pub fn get_test(conn: &Connection, id: i64) -> Result<Test> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT title, questions, created_at FROM tests WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                ))
            },
        )
        .optional()?;

    let (title, questions_json, created_at) = row.ok_or(Error::NotFound(id))?;
    let questions: Vec<TestQuestion> = serde_json::from_str(&questions_json).map_err(|e| {
        error!(test_id = id, error = %e, "stored test snapshot is unreadable");
        Error::Serialization(e)
    })?;

    Ok(Test {
        id,
        title,
        questions,
        created_at,
    })
}
