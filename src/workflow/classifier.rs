//! Heuristic classification of learner messages
//!
//! Keyword and length heuristics decide whether a submission to an open
//! assignment is a real answer or something to talk through first. Matching
//! is by lowercase substring, so short indicators like "no" also fire inside
//! longer words.

/// What a message sent against an open assignment looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Asks for help or clarification
    Question,
    /// Much shorter than the assignment
    Incomplete,
    /// A short "ok", "thanks" and the like
    Acknowledgement,
    /// Worth grading
    Answer,
}

impl Submission {
    pub fn is_answer(self) -> bool {
        self == Submission::Answer
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    pub question_indicators: &'static [&'static str],
    pub short_indicators: &'static [&'static str],
    /// Acknowledgements have at most this many words
    pub short_max_words: usize,
    /// Answers below this share of the assignment's word count are incomplete
    pub incomplete_percent: usize,
}

const ENGLISH_QUESTIONS: &[&str] = &[
    "?",
    "what",
    "how",
    "why",
    "could you",
    "can you",
    "explain",
    "help",
    "don't understand",
    "unclear",
    "confused",
];

const BILINGUAL_QUESTIONS: &[&str] = &[
    "?",
    "what",
    "how",
    "why",
    "could you",
    "can you",
    "explain",
    "help",
    "don't understand",
    "unclear",
    "confused",
    "mean",
    "clarify",
    "не розумію",
    "поясни",
    "що",
    "як",
    "чому",
    "допоможи",
    "розкажи",
    "не зрозумів",
    "не зрозуміла",
    "шо",
    "допоможіть",
    "підкажи",
];

const ACKNOWLEDGEMENTS: &[&str] = &[
    "ok", "okay", "thanks", "got it", "understand", "yes", "no", "wait",
];

/// English cloze drills
pub const FILL_GAPS: ClassifierConfig = ClassifierConfig {
    question_indicators: ENGLISH_QUESTIONS,
    short_indicators: ACKNOWLEDGEMENTS,
    short_max_words: 3,
    incomplete_percent: 30,
};

/// Topic-driven assignments where learners may write in Ukrainian
pub const ANALOGOUS: ClassifierConfig = ClassifierConfig {
    question_indicators: BILINGUAL_QUESTIONS,
    short_indicators: ACKNOWLEDGEMENTS,
    short_max_words: 3,
    incomplete_percent: 30,
};

impl ClassifierConfig {
    /// Classify a message sent while `assignment` is open
    pub fn classify(&self, message: &str, assignment: &str) -> Submission {
        let message = message.trim();
        let words = word_count(message);

        if contains_any(message, self.question_indicators) {
            return Submission::Question;
        }
        if words * 100 < word_count(assignment) * self.incomplete_percent {
            return Submission::Incomplete;
        }
        if words <= self.short_max_words && contains_any(message, self.short_indicators) {
            return Submission::Acknowledgement;
        }
        Submission::Answer
    }
}

/// Case-insensitive substring match against any phrase
pub fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let lower = text.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// During topic negotiation, very short inputs and questions are not topics
pub fn is_topic_clarification(message: &str) -> bool {
    let message = message.trim();
    word_count(message) <= 2 || message.contains('?')
}
