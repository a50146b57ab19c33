//! Turns the loosely-typed filter a front end posts into a [`FilterDescriptor`]
//! the selector can query with.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::Level;

pub const DEFAULT_QUESTION_COUNT: u32 = 20;
pub const MAX_QUESTIONS: u32 = 500;

// Upper bound on a single `a-b` chapter token
const MAX_CHAPTER_SPAN: i64 = 10_000;

/// Upper bound on the resolved chapter set. Each chapter becomes one bound
/// parameter, and SQLite refuses more than 32766 of them.
pub const MAX_CHAPTERS: usize = 20_000;

/// Chapters arrive either as a JSON list or as compact text like `"1,3,5-8"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChapterSpec {
    List(Vec<i64>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Bounds { start: i64, end: i64 },
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilter {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub chapters: Option<ChapterSpec>,
    #[serde(default)]
    pub range: Option<RangeSpec>,
    #[serde(default)]
    pub num_questions: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelFilter {
    Any,
    Known(Level),
    /// A tag that names no level. Matches no rows, so selection falls back.
    Unknown(String),
}

impl LevelFilter {
    pub fn label(&self) -> &str {
        match self {
            LevelFilter::Any => "any",
            LevelFilter::Known(level) => level.tag(),
            LevelFilter::Unknown(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Empty means no chapter predicate.
    Chapters(Vec<i64>),
    Range { start: i64, end: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub scope: Scope,
    pub level: LevelFilter,
    pub count: u32,
    pub title: Option<String>,
}

pub fn normalize(raw: &RawFilter) -> Result<FilterDescriptor> {
    let count = resolve_count(raw.num_questions)?;
    let level = resolve_level(raw.level.as_deref());

    let mode = raw
        .mode
        .as_deref()
        .map(|m| m.trim().to_lowercase())
        .unwrap_or_else(|| "chapter".to_string());

    let scope = match mode.as_str() {
        "chapter" => {
            let chapters = match &raw.chapters {
                Some(spec) => parse_chapters(spec)?,
                None => Vec::new(),
            };
            if chapters.is_empty() && raw.num_questions.is_none() {
                return Err(Error::validation(
                    "chapter mode needs at least one chapter or a question count",
                ));
            }
            Scope::Chapters(chapters)
        }
        "range" => {
            let spec = raw
                .range
                .as_ref()
                .ok_or_else(|| Error::validation("range mode needs a range"))?;
            let (start, end) = parse_range(spec)?;
            Scope::Range { start, end }
        }
        other => {
            return Err(Error::validation(format!(
                "unknown mode '{}': use 'chapter' or 'range'",
                other
            )))
        }
    };

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);

    Ok(FilterDescriptor {
        scope,
        level,
        count,
        title,
    })
}

fn resolve_count(num_questions: Option<i64>) -> Result<u32> {
    match num_questions {
        None => Ok(DEFAULT_QUESTION_COUNT),
        Some(n) if n >= 1 && n <= MAX_QUESTIONS as i64 => Ok(n as u32),
        Some(n) => Err(Error::validation(format!(
            "numQuestions must be between 1 and {}, got {}",
            MAX_QUESTIONS, n
        ))),
    }
}

fn resolve_level(level: Option<&str>) -> LevelFilter {
    match level.map(str::trim) {
        None | Some("") => LevelFilter::Any,
        Some(tag) => match Level::from_tag(tag) {
            Some(level) => LevelFilter::Known(level),
            None => LevelFilter::Unknown(tag.to_string()),
        },
    }
}

/// Sorted, de-duplicated chapter ids.
pub fn parse_chapters(spec: &ChapterSpec) -> Result<Vec<i64>> {
    let mut set = BTreeSet::new();
    match spec {
        ChapterSpec::List(list) => {
            set.extend(list.iter().copied());
            check_chapter_count(set.len())?;
        }
        ChapterSpec::Text(text) => {
            for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                match token.split_once('-') {
                    Some((a, b)) => {
                        let a = parse_int(a, token)?;
                        let b = parse_int(b, token)?;
                        let (lo, hi) = (a.min(b), a.max(b));
                        if hi - lo > MAX_CHAPTER_SPAN {
                            return Err(Error::validation(format!(
                                "chapter span '{}' is too wide",
                                token
                            )));
                        }
                        set.extend(lo..=hi);
                    }
                    None => {
                        set.insert(parse_int(token, token)?);
                    }
                }
                // Checked per token so a long list of wide spans stops early
                check_chapter_count(set.len())?;
            }
        }
    }
    Ok(set.into_iter().collect())
}

fn check_chapter_count(count: usize) -> Result<()> {
    if count > MAX_CHAPTERS {
        return Err(Error::validation(format!(
            "too many chapters: at most {} may be selected",
            MAX_CHAPTERS
        )));
    }
    Ok(())
}

/// Returns `(start, end)` with `start <= end`.
pub fn parse_range(spec: &RangeSpec) -> Result<(i64, i64)> {
    let (a, b) = match spec {
        RangeSpec::Bounds { start, end } => (*start, *end),
        RangeSpec::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(Error::validation("range must not be empty"));
            }
            match text.split_once('-') {
                Some((a, b)) => (parse_int(a, text)?, parse_int(b, text)?),
                None => {
                    let n = parse_int(text, text)?;
                    (n, n)
                }
            }
        }
    };
    Ok((a.min(b), a.max(b)))
}

fn parse_int(s: &str, token: &str) -> Result<i64> {
    s.trim()
        .parse::<i64>()
        .map_err(|_| Error::validation(format!("'{}' is not a valid number or range", token)))
}
