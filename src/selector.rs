//! Random question selection with a global fallback.
//!
//! `level` and `chapter` are sparsely populated in the seeded bank, so a
//! perfectly valid filter often matches nothing. Rather than reporting that,
//! the selector redraws from the whole population and flags the result with
//! [`Selection::fallback`].

use rusqlite::{Connection, ToSql};
use tracing::{debug, warn};

use crate::db::{question_from_row, QUESTION_COLUMNS};
use crate::error::{Error, Result};
use crate::filter::{FilterDescriptor, LevelFilter, Scope};
use crate::models::{Question, OPTION_COUNT};

#[derive(Debug, Clone)]
pub struct Selection {
    pub questions: Vec<Question>,
    /// True when the filter matched nothing and the draw ignored it.
    pub fallback: bool,
}

struct SelectQuery {
    sql: String,
    params: Vec<Box<dyn ToSql>>,
}

/// Only rows that map to a well-formed question may count against the limit.
/// `CASE` keeps `json_array_length` away from text that is not JSON.
fn well_formed_clause() -> String {
    format!(
        "CASE WHEN json_valid(q.options) THEN json_array_length(q.options) END = {n} \
         AND q.correct_index BETWEEN 0 AND {last}",
        n = OPTION_COUNT,
        last = OPTION_COUNT - 1
    )
}

fn build_query(descriptor: &FilterDescriptor) -> SelectQuery {
    let mut clauses: Vec<String> = vec![well_formed_clause()];
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();
    let mut join = "";

    if let LevelFilter::Known(level) = &descriptor.level {
        clauses.push(format!("q.level = ?{}", params.len() + 1));
        params.push(Box::new(level.id()));
    }

    match &descriptor.scope {
        Scope::Chapters(chapters) if !chapters.is_empty() => {
            let placeholders: Vec<String> = chapters
                .iter()
                .map(|ch| {
                    params.push(Box::new(*ch));
                    format!("?{}", params.len())
                })
                .collect();
            clauses.push(format!("q.chapter IN ({})", placeholders.join(", ")));
        }
        Scope::Chapters(_) => {}
        Scope::Range { start, end } => {
            join = "JOIN entries e ON e.id = q.entry_id";
            params.push(Box::new(*start));
            params.push(Box::new(*end));
            clauses.push(format!(
                "e.list_index BETWEEN ?{} AND ?{}",
                params.len() - 1,
                params.len()
            ));
        }
    }

    let where_sql = format!("WHERE {}", clauses.join(" AND "));

    params.push(Box::new(descriptor.count as i64));
    let sql = format!(
        "SELECT {} FROM questions q {} {} ORDER BY RANDOM() LIMIT ?{}",
        QUESTION_COLUMNS,
        join,
        where_sql,
        params.len()
    );

    SelectQuery { sql, params }
}

fn fetch(conn: &Connection, query: &SelectQuery) -> Result<Vec<Question>> {
    let mut stmt = conn.prepare(&query.sql)?;
    let params_refs: Vec<&dyn ToSql> = query.params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), question_from_row)?;

    let mut questions = Vec::new();
    for row in rows {
        let question = row?;
        if question.is_well_formed() {
            questions.push(question);
        } else {
            warn!(question_id = question.id, "skipping malformed question");
        }
    }
    Ok(questions)
}

pub fn select(conn: &Connection, descriptor: &FilterDescriptor) -> Result<Selection> {
    let primary = match &descriptor.level {
        // An unrecognised tag can match no row; skip straight to the fallback
        LevelFilter::Unknown(tag) => {
            debug!(level = %tag, "unknown level tag");
            Vec::new()
        }
        _ => {
            let query = build_query(descriptor);
            debug!(sql = %query.sql, "primary selection");
            fetch(conn, &query)?
        }
    };

    if !primary.is_empty() {
        return Ok(Selection {
            questions: primary,
            fallback: false,
        });
    }

    warn!(
        level = descriptor.level.label(),
        scope = ?descriptor.scope,
        "filter matched no questions; drawing from the full bank"
    );
    let unfiltered = FilterDescriptor {
        scope: Scope::Chapters(Vec::new()),
        level: LevelFilter::Any,
        count: descriptor.count,
        title: None,
    };
    let questions = fetch(conn, &build_query(&unfiltered))?;
    if questions.is_empty() {
        return Err(Error::EmptyStore);
    }

    Ok(Selection {
        questions,
        fallback: true,
    })
}
