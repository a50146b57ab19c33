//! Builds the question bank from a numbered vocabulary list.
//!
//! Input lines look like `12.  漢字, かんじ, kanji characters`. Fields split on
//! the first two commas, so meanings may contain commas. Each entry yields up
//! to six multiple-choice questions, with distractors drawn from the other
//! entries' values of the same kind.

use std::collections::HashSet;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;
use crate::models::{Level, NewEntry, NewQuestion, QuestionType, OPTION_COUNT};

#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    pub level: Option<Level>,
    /// Entries per chapter; chapter ids start at 1.
    pub chapter_size: Option<i64>,
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub entries: usize,
    pub questions: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Kanji,
    Kana,
    Meaning,
}

impl Field {
    fn of(self, entry: &NewEntry) -> &str {
        match self {
            Field::Kanji => entry.kanji.trim(),
            Field::Kana => entry.kana.trim(),
            Field::Meaning => entry.meaning.trim(),
        }
    }
}

// (type, shown field, asked field)
const LAYOUTS: [(QuestionType, Field, Field); 6] = [
    (QuestionType::KanjiToHiragana, Field::Kanji, Field::Kana),
    (QuestionType::KanjiToMeaning, Field::Kanji, Field::Meaning),
    (QuestionType::KanaToMeaning, Field::Kana, Field::Meaning),
    (QuestionType::KanaToKanji, Field::Kana, Field::Kanji),
    (QuestionType::MeaningToKanji, Field::Meaning, Field::Kanji),
    (QuestionType::MeaningToKana, Field::Meaning, Field::Kana),
];

/// Unique, non-empty values per field, in first-seen order.
struct Pools {
    kanji: Vec<String>,
    kana: Vec<String>,
    meaning: Vec<String>,
}

impl Pools {
    fn from_entries(entries: &[NewEntry]) -> Self {
        fn unique(entries: &[NewEntry], field: Field) -> Vec<String> {
            let mut seen = HashSet::new();
            entries
                .iter()
                .map(|e| field.of(e))
                .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
                .map(String::from)
                .collect()
        }

        Self {
            kanji: unique(entries, Field::Kanji),
            kana: unique(entries, Field::Kana),
            meaning: unique(entries, Field::Meaning),
        }
    }

    fn get(&self, field: Field) -> &[String] {
        match field {
            Field::Kanji => &self.kanji,
            Field::Kana => &self.kana,
            Field::Meaning => &self.meaning,
        }
    }
}

pub fn parse_entries(text: &str) -> Vec<NewEntry> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<NewEntry> {
    let (number, rest) = line.trim().split_once('.')?;
    let list_index: i64 = number.trim().parse().ok()?;

    let mut parts = rest.splitn(3, ',').map(str::trim);
    let kanji = parts.next().unwrap_or_default().to_string();
    let kana = parts.next().unwrap_or_default().to_string();
    let meaning = parts.next().unwrap_or_default().to_string();

    Some(NewEntry {
        list_index,
        kanji,
        kana,
        meaning,
    })
}

fn chapter_for(list_index: i64, chapter_size: Option<i64>) -> Option<i64> {
    match chapter_size {
        Some(size) if size > 0 && list_index > 0 => Some((list_index - 1) / size + 1),
        _ => None,
    }
}

/// Returns the questions grouped by entry, plus how many candidate questions
/// were dropped for lack of distractors.
pub fn generate_questions<R: Rng>(
    entries: &[NewEntry],
    options: &SeedOptions,
    rng: &mut R,
) -> (Vec<(NewEntry, Vec<NewQuestion>)>, usize) {
    let pools = Pools::from_entries(entries);
    let mut skipped = 0;
    let mut batch = Vec::with_capacity(entries.len());

    for entry in entries {
        let chapter = chapter_for(entry.list_index, options.chapter_size);
        let mut questions = Vec::new();

        for (question_type, shown, asked) in LAYOUTS.iter() {
            let prompt = shown.of(entry);
            let answer = asked.of(entry);
            if prompt.is_empty() || answer.is_empty() {
                continue;
            }

            let candidates: Vec<&String> = pools
                .get(*asked)
                .iter()
                .filter(|v| v.as_str() != answer)
                .collect();
            if candidates.len() < OPTION_COUNT - 1 {
                skipped += 1;
                continue;
            }

            let mut choices: Vec<String> = candidates
                .choose_multiple(rng, OPTION_COUNT - 1)
                .map(|v| v.to_string())
                .collect();
            choices.push(answer.to_string());
            choices.shuffle(rng);
            let correct_index = choices.iter().position(|c| c == answer).unwrap_or(0);

            questions.push(NewQuestion {
                question_type: question_type.clone(),
                prompt: prompt.to_string(),
                correct_answer: answer.to_string(),
                options: choices,
                correct_index,
                level: options.level,
                chapter,
            });
        }

        batch.push((entry.clone(), questions));
    }

    (batch, skipped)
}

pub fn seed_file<P: AsRef<Path>>(db: &Database, path: P, options: &SeedOptions) -> Result<SeedReport> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let entries = parse_entries(&text);
    debug!(entries = entries.len(), "parsed vocabulary list");

    let mut rng = match options.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (batch, skipped) = generate_questions(&entries, options, &mut rng);

    db.init()?;
    let questions = db.import(&batch)?;
    info!(entries = entries.len(), questions, skipped, "seeded question bank");

    Ok(SeedReport {
        entries: entries.len(),
        questions,
        skipped,
    })
}
