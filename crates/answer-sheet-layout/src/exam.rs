//! Logical exam structure supplied by the caller.
//!
//! Every field has a serde default so incomplete records still deserialize;
//! missing counts become zero and missing types fall back to the default
//! option set at layout time.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest option count a `multiple_choice_N` type may ask for (`A..=Z`).
pub const MAX_OPTIONS: u8 = 26;

/// Answer format of a section.
///
/// Serialized as its string form: `true_false`, `multiple_choice_4`, ...
/// Anything else is kept verbatim in [`QuestionType::Other`], including
/// `multiple_choice_N` with N outside `2..=MAX_OPTIONS`; such sections get
/// the default option set and a warning when planned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestionType {
    TrueFalse,
    MultipleChoice(u8),
    Other(String),
}

impl Default for QuestionType {
    fn default() -> Self {
        QuestionType::Other(String::new())
    }
}

impl From<String> for QuestionType {
    fn from(raw: String) -> Self {
        let s = raw.trim();
        if s == "true_false" {
            return QuestionType::TrueFalse;
        }
        if let Some(n) = s
            .strip_prefix("multiple_choice_")
            .and_then(|n| n.parse::<u8>().ok())
        {
            if (2..=MAX_OPTIONS).contains(&n) {
                return QuestionType::MultipleChoice(n);
            }
        }
        QuestionType::Other(raw)
    }
}

impl From<&str> for QuestionType {
    fn from(raw: &str) -> Self {
        QuestionType::from(raw.to_string())
    }
}

impl From<QuestionType> for String {
    fn from(t: QuestionType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionType::TrueFalse => f.write_str("true_false"),
            QuestionType::MultipleChoice(n) => write!(f, "multiple_choice_{n}"),
            QuestionType::Other(s) => f.write_str(s),
        }
    }
}

impl QuestionType {
    /// Option letters for this type; unrecognized types use `default`.
    pub fn options(&self, default: &[char]) -> Vec<char> {
        match self {
            QuestionType::TrueFalse => vec!['T', 'F'],
            QuestionType::MultipleChoice(n) => option_letters(*n as usize),
            QuestionType::Other(_) => default.to_vec(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, QuestionType::Other(_))
    }
}

/// `A, B, C, ...` up to `n` letters (at most 26).
pub fn option_letters(n: usize) -> Vec<char> {
    (b'A'..=b'Z').take(n).map(char::from).collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "questionCount")]
    pub question_count: u32,
    #[serde(default, alias = "questionType")]
    pub question_type: QuestionType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// Ordered subjects, each an ordered list of sections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExamSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

/// One question with its resolved option set, in sheet order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedQuestion {
    pub number: u32,
    pub question_type: QuestionType,
    pub options: Vec<char>,
    pub subject: Option<String>,
    pub section: Option<String>,
}

impl ExamSpec {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Sum of `question_count` over all sections.
    pub fn total_questions(&self) -> u32 {
        self.subjects
            .iter()
            .flat_map(|s| &s.sections)
            .map(|s| s.question_count)
            .sum()
    }

    /// Number every question contiguously from 1, walking subjects then sections.
    ///
    /// A spec without subjects yields `fallback_count` questions of an
    /// unspecified type (or none when no fallback is given).
    pub fn plan_questions(
        &self,
        fallback_count: Option<u32>,
        default_options: &[char],
    ) -> Vec<PlannedQuestion> {
        if self.subjects.is_empty() {
            let n = fallback_count.unwrap_or(0);
            return (1..=n)
                .map(|number| PlannedQuestion {
                    number,
                    question_type: QuestionType::default(),
                    options: default_options.to_vec(),
                    subject: None,
                    section: None,
                })
                .collect();
        }

        let mut out = Vec::with_capacity(self.total_questions() as usize);
        for subject in &self.subjects {
            for section in &subject.sections {
                let options = section.question_type.options(default_options);
                let unknown =
                    matches!(&section.question_type, QuestionType::Other(t) if !t.is_empty());
                if unknown && section.question_count > 0 {
                    warn!(
                        "section '{}' of '{}': unknown type '{}', using {} default options",
                        section.name,
                        subject.name,
                        section.question_type,
                        options.len()
                    );
                }
                for _ in 0..section.question_count {
                    out.push(PlannedQuestion {
                        number: out.len() as u32 + 1,
                        question_type: section.question_type.clone(),
                        options: options.clone(),
                        subject: Some(subject.name.clone()),
                        section: Some(section.name.clone()),
                    });
                }
            }
        }
        out
    }

    /// Stable fingerprint of the spec, used to detect changes between runs.
    ///
    /// FNV-1a over the canonical JSON encoding, rendered as 16 hex digits.
    pub fn fingerprint(&self) -> String {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let hash = bytes
            .iter()
            .fold(OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(PRIME));
        format!("{hash:016x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_types_parse_and_print() {
        assert_eq!(QuestionType::from("true_false"), QuestionType::TrueFalse);
        assert_eq!(
            QuestionType::from("multiple_choice_4"),
            QuestionType::MultipleChoice(4)
        );
        assert_eq!(
            QuestionType::from("multiple_choice_40"),
            QuestionType::Other("multiple_choice_40".into())
        );
        assert_eq!(QuestionType::MultipleChoice(5).to_string(), "multiple_choice_5");
    }

    #[test]
    fn out_of_range_choice_counts_use_the_default_options() {
        for raw in ["multiple_choice_0", "multiple_choice_1", "multiple_choice_27"] {
            let t = QuestionType::from(raw);
            assert_eq!(t, QuestionType::Other(raw.into()));
            assert!(!t.is_recognized());
            assert_eq!(t.to_string(), raw);
            assert_eq!(t.options(&option_letters(4)), vec!['A', 'B', 'C', 'D']);
        }
        assert_eq!(QuestionType::from("multiple_choice_2"), QuestionType::MultipleChoice(2));
    }

    #[test]
    fn option_sets_follow_type() {
        let default = option_letters(4);
        assert_eq!(
            QuestionType::MultipleChoice(4).options(&default),
            vec!['A', 'B', 'C', 'D']
        );
        assert_eq!(QuestionType::TrueFalse.options(&default).len(), 2);
        assert_eq!(QuestionType::from("essay").options(&['A', 'B']), vec!['A', 'B']);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let spec = ExamSpec::from_json(
            r#"{"subjects":[{"name":"Math","sections":[{"questionCount":3},{"name":"x"}]}]}"#,
        )
        .expect("lenient parse");
        assert_eq!(spec.total_questions(), 3);
        assert_eq!(spec.subjects[0].sections[1].question_count, 0);
        assert_eq!(spec.subjects[0].sections[0].question_type, QuestionType::default());
    }

    #[test]
    fn numbering_is_contiguous_across_sections() {
        let spec = ExamSpec {
            name: "mock".into(),
            subjects: vec![
                Subject {
                    name: "A".into(),
                    sections: vec![Section {
                        name: "a1".into(),
                        question_count: 2,
                        question_type: QuestionType::TrueFalse,
                    }],
                },
                Subject {
                    name: "B".into(),
                    sections: vec![
                        Section {
                            name: "b1".into(),
                            question_count: 0,
                            question_type: QuestionType::MultipleChoice(4),
                        },
                        Section {
                            name: "b2".into(),
                            question_count: 3,
                            question_type: QuestionType::MultipleChoice(5),
                        },
                    ],
                },
            ],
        };
        let plan = spec.plan_questions(Some(30), &option_letters(4));
        let numbers: Vec<u32> = plan.iter().map(|q| q.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(plan[2].section.as_deref(), Some("b2"));
        assert_eq!(plan[4].options.len(), 5);
    }

    #[test]
    fn empty_spec_uses_fallback_count() {
        let spec = ExamSpec::default();
        assert_eq!(spec.plan_questions(Some(30), &option_letters(4)).len(), 30);
        assert!(spec.plan_questions(None, &option_letters(4)).is_empty());
    }

    #[test]
    fn fingerprint_tracks_changes() {
        let mut spec = ExamSpec::default();
        let before = spec.fingerprint();
        assert_eq!(before, ExamSpec::default().fingerprint());
        spec.name = "changed".into();
        assert_ne!(before, spec.fingerprint());
        assert_eq!(before.len(), 16);
    }
}
