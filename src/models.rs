use serde::{Deserialize, Serialize};

/// Every question in the bank is four-way multiple choice.
pub const OPTION_COUNT: usize = 4;

// JLPT proficiency tiers, keyed by the id stored in `levels`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    N5 = 1,
    N4 = 2,
    N3 = 3,
    N2 = 4,
    N1 = 5,
}

impl Level {
    pub const ALL: [Level; 5] = [Level::N5, Level::N4, Level::N3, Level::N2, Level::N1];

    pub fn id(&self) -> i64 {
        *self as i64
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Level::N5),
            2 => Some(Level::N4),
            3 => Some(Level::N3),
            4 => Some(Level::N2),
            5 => Some(Level::N1),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Level::N5 => "n5",
            Level::N4 => "n4",
            Level::N3 => "n3",
            Level::N2 => "n2",
            Level::N1 => "n1",
        }
    }

    pub fn from_tag(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "n5" => Some(Level::N5),
            "n4" => Some(Level::N4),
            "n3" => Some(Level::N3),
            "n2" => Some(Level::N2),
            "n1" => Some(Level::N1),
            _ => None,
        }
    }
}

// Rendering form of a question: what is shown and what is asked for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestionType {
    KanjiToHiragana,
    KanjiToMeaning,
    KanaToMeaning,
    KanaToKanji,
    MeaningToKanji,
    MeaningToKana,
    /// A type written by other tooling that this build does not know about.
    Other(String),
}

impl QuestionType {
    pub fn as_str(&self) -> &str {
        match self {
            QuestionType::KanjiToHiragana => "kanji_to_hiragana",
            QuestionType::KanjiToMeaning => "kanji_to_meaning",
            QuestionType::KanaToMeaning => "kana_to_meaning",
            QuestionType::KanaToKanji => "kana_to_kanji",
            QuestionType::MeaningToKanji => "meaning_to_kanji",
            QuestionType::MeaningToKana => "meaning_to_kana",
            QuestionType::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "kanji_to_hiragana" => QuestionType::KanjiToHiragana,
            "kanji_to_meaning" => QuestionType::KanjiToMeaning,
            "kana_to_meaning" => QuestionType::KanaToMeaning,
            "kana_to_kanji" => QuestionType::KanaToKanji,
            "meaning_to_kanji" => QuestionType::MeaningToKanji,
            "meaning_to_kana" => QuestionType::MeaningToKana,
            other => QuestionType::Other(other.to_string()),
        }
    }
}

impl From<String> for QuestionType {
    fn from(s: String) -> Self {
        QuestionType::from_str(&s)
    }
}

impl From<QuestionType> for String {
    fn from(t: QuestionType) -> Self {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub list_index: i64,
    pub kanji: String,
    pub kana: String,
    pub meaning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub entry_id: i64,
    pub quiz_id: Option<i64>,
    pub question_type: QuestionType,
    pub prompt: String,
    pub correct_answer: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub level: Option<i64>,
    pub chapter: Option<i64>,
    pub created_at: String,
}

impl Question {
    pub fn is_well_formed(&self) -> bool {
        self.options.len() == OPTION_COUNT && self.correct_index < self.options.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub question_type: QuestionType,
    pub prompt: String,
    pub correct_answer: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub level: Option<Level>,
    pub chapter: Option<i64>,
}

/// A question as captured inside a test. Carries everything needed to render
/// and grade it without going back to the `questions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub correct_answer: String,
}

impl From<&Question> for TestQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            question_type: q.question_type.clone(),
            prompt: q.prompt.clone(),
            options: q.options.clone(),
            correct_index: q.correct_index,
            correct_answer: q.correct_answer.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: i64,
    pub title: String,
    pub questions: Vec<TestQuestion>,
    pub created_at: String,
}

impl Test {
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketCount {
    pub key: Option<i64>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_entries: i64,
    pub total_questions: i64,
    pub total_tests: i64,
    pub by_level: Vec<BucketCount>,
    pub by_chapter: Vec<BucketCount>,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
