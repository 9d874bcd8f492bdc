//! Answer-sheet template generation.
//!
//! An [`ExamSpec`] (subjects, sections, question counts and types) is turned
//! into a [`Template`]: the nominal position of every alignment mark and
//! bubble on the printed sheet, for one [`GeometryProfile`].
//!
//! ```
//! use answer_sheet_layout::{generate_for_paper, ExamSpec, LayoutOptions, PaperSize};
//!
//! let spec = ExamSpec::from_json(
//!     r#"{"name":"quiz","subjects":[{"name":"Math","sections":[
//!         {"name":"I","question_count":12,"question_type":"multiple_choice_4"}]}]}"#,
//! )
//! .unwrap();
//! let template =
//!     generate_for_paper(&spec, PaperSize::A4, 300, &LayoutOptions::default()).unwrap();
//! assert_eq!(template.total_questions, 12);
//! assert_eq!(template.alignment_marks.len(), 8);
//! ```

mod exam;
mod generate;
mod profile;
mod render;
mod store;
mod template;

pub use exam::{
    option_letters, ExamSpec, PlannedQuestion, QuestionType, Section, Subject, MAX_OPTIONS,
};
pub use generate::{generate_for_paper, generate_template, LayoutOptions};
pub use profile::{GeometryProfile, LayoutError, PaperSize, ProfileRegistry};
pub use render::{render_template, RenderOptions};
pub use store::{ensure_template, InMemoryTemplateStore, TemplateStore, TemplateStoreError};
pub use template::{
    AlignmentMark, AlignmentMarks, CalibrationRecord, CoordinateSystem, LayoutStructure,
    NominalBubble, QuestionLayout, QuestionSlot, ReferencePoint, RelPoint, SectionMapping,
    Template,
};
