use answer_sheet_layout::{
    generate_for_paper, ExamSpec, LayoutOptions, LayoutStructure, PaperSize, QuestionType,
    Section, Subject, Template,
};
use std::collections::HashSet;

fn section(name: &str, count: u32, ty: &str) -> Section {
    Section {
        name: name.into(),
        question_count: count,
        question_type: QuestionType::from(ty),
    }
}

fn two_section_spec() -> ExamSpec {
    ExamSpec {
        name: "Midterm".into(),
        subjects: vec![
            Subject {
                name: "Physics".into(),
                sections: vec![section("Mechanics", 5, "multiple_choice_4")],
            },
            Subject {
                name: "Biology".into(),
                sections: vec![section("Cells", 10, "true_false")],
            },
        ],
    }
}

fn generate(spec: &ExamSpec, paper: PaperSize, structure: LayoutStructure) -> Template {
    let options = LayoutOptions {
        structure,
        ..LayoutOptions::default()
    };
    generate_for_paper(spec, paper, 300, &options).expect("builtin profile")
}

#[test]
fn continuous_column_index_matches_formula() {
    for (n, columns) in [(1u32, 3u32), (7, 3), (30, 3), (31, 4), (50, 2)] {
        let spec = ExamSpec {
            name: "flow".into(),
            subjects: vec![Subject {
                name: "All".into(),
                sections: vec![section("S", n, "multiple_choice_5")],
            }],
        };
        let options = LayoutOptions {
            columns: Some(columns),
            ..LayoutOptions::default()
        };
        let t = generate_for_paper(&spec, PaperSize::Letter, 300, &options).expect("letter");
        let per_column = n.div_ceil(columns);
        let x0 = t.question(1).expect("first").marker.x;
        for q in &t.question_layout.questions {
            let expected_col = (q.number - 1) / per_column;
            assert!(expected_col < columns);
            let col = ((q.marker.x - x0) / t.question_layout.column_width).round() as u32;
            assert_eq!(col, expected_col, "n={n} c={columns} q={}", q.number);
        }
    }
}

#[test]
fn fresh_template_has_eight_sorted_marks() {
    for paper in [PaperSize::A4, PaperSize::Letter] {
        let t = generate(&two_section_spec(), paper, LayoutStructure::Continuous);
        let marks = &t.alignment_marks;
        let left: Vec<&str> = marks.left_side.iter().map(|m| m.id.as_str()).collect();
        let right: Vec<&str> = marks.right_side.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(left, ["L1", "L2", "L3", "L4"]);
        assert_eq!(right, ["R1", "R2", "R3", "R4"]);
        for side in [&marks.left_side, &marks.right_side] {
            assert!(side.windows(2).all(|w| w[0].position.y < w[1].position.y));
        }
        for m in marks.iter() {
            assert!((0.0..=1.0).contains(&m.position.x));
            assert!((0.0..=1.0).contains(&m.position.y));
        }
    }
}

#[test]
fn subject_in_column_numbers_are_contiguous() {
    let t = generate(&two_section_spec(), PaperSize::A4, LayoutStructure::SubjectInColumn);
    assert_eq!(t.total_questions, 15);
    let numbers: Vec<u32> = t.question_layout.questions.iter().map(|q| q.number).collect();
    assert_eq!(numbers, (1..=15).collect::<Vec<_>>());

    let mapping = t.subject_mapping.as_ref().expect("subject mapping");
    assert_eq!(mapping.len(), 2);
    assert_eq!((mapping[0].start_question, mapping[0].end_question), (1, 5));
    assert_eq!((mapping[1].start_question, mapping[1].end_question), (6, 15));
    assert!(mapping[1].anchor.y > mapping[0].anchor.y);

    let xs: HashSet<u64> = t
        .question_layout
        .questions
        .iter()
        .map(|q| q.marker.x.to_bits())
        .collect();
    assert_eq!(xs.len(), 1, "single column");
}

#[test]
fn option_sets_follow_question_type() {
    let t = generate(&two_section_spec(), PaperSize::A4, LayoutStructure::Continuous);
    assert_eq!(t.question(1).expect("q1").options, vec!['A', 'B', 'C', 'D']);
    assert_eq!(t.question(6).expect("q6").options, vec!['T', 'F']);
    assert_eq!(t.nominal_bubbles().len(), 5 * 4 + 10 * 2);
}

#[test]
fn zero_subjects_give_an_empty_layout() {
    let t = generate(&ExamSpec::default(), PaperSize::A4, LayoutStructure::Continuous);
    assert_eq!(t.total_questions, 0);
    assert!(t.question_layout.questions.is_empty());
    assert!(t.nominal_bubbles().is_empty());
    assert_eq!(t.alignment_marks.len(), 8);
}

#[test]
fn fallback_count_applies_without_subjects() {
    let options = LayoutOptions {
        default_question_count: Some(30),
        ..LayoutOptions::default()
    };
    let t = generate_for_paper(&ExamSpec::default(), PaperSize::A4, 300, &options).expect("a4");
    assert_eq!(t.total_questions, 30);
    assert_eq!(t.question_layout.questions_per_column, 10);
}

#[test]
fn template_json_round_trip_keeps_layout_and_profile() {
    let t = generate(&two_section_spec(), PaperSize::Letter, LayoutStructure::SubjectInColumn)
        .with_question_coordinates();
    let json = t.to_json_pretty().expect("serialize");
    assert!(json.contains("\"paper_size\": \"letter\""));
    assert!(json.contains("\"structure\": \"subject_in_column\""));
    assert!(json.contains("\"question_type\": \"true_false\""));
    let back = Template::from_json(&json).expect("parse");
    assert_eq!(back.profile_id, "letter-300dpi-v1");
    assert_eq!(back.subject_mapping.as_ref().map(Vec::len), Some(2));
    assert_eq!(back.question_layout.questions.len(), 15);
    let cached = back.question_coordinates.as_ref().expect("cache survives");
    assert_eq!(cached.len(), t.nominal_bubbles().len());
    for (a, b) in cached.iter().zip(t.nominal_bubbles()) {
        assert_eq!((a.question_number, a.option), (b.question_number, b.option));
        assert!((a.position.x - b.position.x).abs() < 1e-12);
        assert!((a.position.y - b.position.y).abs() < 1e-12);
    }
}

#[test]
fn profiles_are_recorded_not_mixed() {
    let spec = two_section_spec();
    let hi = generate_for_paper(&spec, PaperSize::A4, 300, &LayoutOptions::default()).expect("300");
    let lo = generate_for_paper(&spec, PaperSize::A4, 150, &LayoutOptions::default()).expect("150");
    assert_ne!(hi.profile_id, lo.profile_id);
    assert_eq!(hi.spec_fingerprint, lo.spec_fingerprint);
    for (a, b) in hi.alignment_marks.iter().zip(lo.alignment_marks.iter()) {
        assert_eq!(a.position, b.position);
        assert_eq!(a.size_px, 2 * b.size_px);
    }
}
