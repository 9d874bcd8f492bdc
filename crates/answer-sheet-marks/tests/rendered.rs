use answer_sheet_core::{warp_gray, GrayImage, TransformMatrix};
use answer_sheet_layout::{
    generate_for_paper, render_template, ExamSpec, LayoutOptions, PaperSize, QuestionType,
    RenderOptions, Section, Subject, Template,
};
use answer_sheet_marks::{detect_alignment_marks, MarkDetection, MarkDetectorParams};

fn sheet(paper: PaperSize, dpi: u32) -> Template {
    let spec = ExamSpec {
        name: "marks".into(),
        subjects: vec![Subject {
            name: "General".into(),
            sections: vec![
                Section {
                    name: "MC".into(),
                    question_count: 24,
                    question_type: QuestionType::MultipleChoice(4),
                },
                Section {
                    name: "TF".into(),
                    question_count: 12,
                    question_type: QuestionType::TrueFalse,
                },
            ],
        }],
    };
    generate_for_paper(&spec, paper, dpi, &LayoutOptions::default()).expect("builtin profile")
}

fn detect(img: &GrayImage) -> MarkDetection {
    detect_alignment_marks(&img.as_image_view(), &MarkDetectorParams::default()).expect("detect")
}

fn assert_marks_near(template: &Template, det: &MarkDetection, map: &TransformMatrix, tol: f64) {
    let (w, h) = (template.width_px as f64, template.height_px as f64);
    for found in det.marks() {
        let nominal = template
            .alignment_marks
            .get(&found.id)
            .unwrap_or_else(|| panic!("unexpected id {}", found.id));
        let (nx, ny) = nominal.position.to_pixels(w, h);
        let (ex, ey) = map.apply(nx, ny).expect("finite");
        let err = ((found.x - ex).powi(2) + (found.y - ey).powi(2)).sqrt();
        assert!(err < tol, "{}: error {err:.2}px", found.id);
    }
}

#[test]
fn detects_all_marks_on_rendered_a4_sheet() {
    let t = sheet(PaperSize::A4, 300);
    let img = render_template(&t, &RenderOptions::default());
    let det = detect(&img);
    assert_eq!(det.left.len(), 4);
    assert_eq!(det.right.len(), 4);
    assert_eq!(det.calibration_quality, 1.0);
    assert_marks_near(&t, &det, &TransformMatrix::identity(), 1.0);
}

#[test]
fn marks_follow_an_affine_warp() {
    let t = sheet(PaperSize::A4, 300);
    let img = render_template(&t, &RenderOptions::default());
    let (c, s) = (1.5f64.to_radians().cos(), 1.5f64.to_radians().sin());
    let warp = TransformMatrix::from_array([
        [0.9 * c, -0.9 * s, 60.0],
        [0.9 * s, 0.9 * c, 20.0],
        [0.0, 0.0, 1.0],
    ]);
    let scan = warp_gray(&img.view(), &warp, img.width, img.height, 255).expect("warp");
    let det = detect(&scan);
    assert_eq!(det.total(), 8);
    assert_marks_near(&t, &det, &warp, 2.0);
}

#[test]
fn blank_right_margin_halves_the_quality() {
    let t = sheet(PaperSize::A4, 300);
    let mut img = render_template(&t, &RenderOptions::default());
    let cut = (img.width as f64 * 0.85) as i64;
    for y in 0..img.height as i64 {
        for x in cut..img.width as i64 {
            img.put(x, y, 255);
        }
    }
    let det = detect(&img);
    assert!(det.right.is_empty());
    assert_eq!(det.left.len(), 4);
    assert_eq!(det.calibration_quality, 0.5);
}

#[test]
fn filled_bubbles_do_not_disturb_letter_150dpi_detection() {
    let t = sheet(PaperSize::Letter, 150);
    let opts = RenderOptions {
        answers: RenderOptions::parse_answers("1:A,2:B,3:C,4:D,30:T").expect("answers"),
        ..RenderOptions::default()
    };
    let img = render_template(&t, &opts);
    let det = detect(&img);
    let ids: Vec<&str> = det.marks().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["L1", "L2", "L3", "L4", "R1", "R2", "R3", "R4"]);
    assert_marks_near(&t, &det, &TransformMatrix::identity(), 1.0);
}
