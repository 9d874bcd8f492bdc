//! Synthetic raster of a template, as it would come off a flatbed scanner.

use crate::template::Template;
use answer_sheet_core::GrayImage;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Question number to filled option.
    pub answers: BTreeMap<u32, char>,
    pub background: u8,
    pub ink: u8,
    pub outline_px: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            answers: BTreeMap::new(),
            background: 255,
            ink: 0,
            outline_px: 2,
        }
    }
}

impl RenderOptions {
    /// Parse `"1:A,2:C"` into an answer map.
    pub fn parse_answers(raw: &str) -> Result<BTreeMap<u32, char>, String> {
        let mut out = BTreeMap::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (q, opt) = item
                .split_once(':')
                .ok_or_else(|| format!("expected <question>:<option>, got '{item}'"))?;
            let number: u32 = q
                .trim()
                .parse()
                .map_err(|_| format!("invalid question number '{q}'"))?;
            let mut chars = opt.trim().chars();
            let option = match (chars.next(), chars.next()) {
                (Some(c), None) => c.to_ascii_uppercase(),
                _ => return Err(format!("invalid option '{opt}'")),
            };
            out.insert(number, option);
        }
        Ok(out)
    }
}

/// Draw alignment marks and bubbles at the template's nominal resolution.
///
/// Marks are filled squares at their expected brightness; bubbles are ring
/// outlines, filled solid when the question's answer selects them.
pub fn render_template(template: &Template, opts: &RenderOptions) -> GrayImage {
    let w = template.width_px as usize;
    let h = template.height_px as usize;
    let mut img = GrayImage::filled(w, h, opts.background);

    for mark in template.alignment_marks.iter() {
        let (cx, cy) = mark.position.to_pixels(w as f64, h as f64);
        let half = mark.size_px as f64 / 2.0;
        fill_rect(&mut img, cx - half, cy - half, cx + half, cy + half, mark.expected_brightness);
    }

    let radius = template.question_layout.bubble_radius_px as f64;
    let inner = (radius - opts.outline_px as f64).max(0.0);
    for bubble in template.bubbles().iter() {
        let (cx, cy) = bubble.position.to_pixels(w as f64, h as f64);
        let filled = opts.answers.get(&bubble.question_number) == Some(&bubble.option);
        let min_r = if filled { 0.0 } else { inner };
        draw_ring(&mut img, cx, cy, min_r, radius, opts.ink);
    }
    img
}

/// Fill pixels whose centres fall inside `[x0, x1) × [y0, y1)`.
fn fill_rect(img: &mut GrayImage, x0: f64, y0: f64, x1: f64, y1: f64, value: u8) {
    let (xs, xe) = ((x0 - 0.5).ceil() as i64, (x1 - 0.5).ceil() as i64);
    let (ys, ye) = ((y0 - 0.5).ceil() as i64, (y1 - 0.5).ceil() as i64);
    for y in ys..ye {
        for x in xs..xe {
            img.put(x, y, value);
        }
    }
}

fn draw_ring(img: &mut GrayImage, cx: f64, cy: f64, r_min: f64, r_max: f64, value: u8) {
    let reach = r_max.ceil() as i64 + 1;
    let (ix, iy) = (cx.round() as i64, cy.round() as i64);
    for y in iy - reach..=iy + reach {
        for x in ix - reach..=ix + reach {
            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            let d = (dx * dx + dy * dy).sqrt();
            if d <= r_max && d >= r_min {
                img.put(x, y, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::{ExamSpec, QuestionType, Section, Subject};
    use crate::generate::{generate_for_paper, LayoutOptions};
    use crate::profile::PaperSize;

    fn small_template() -> Template {
        let spec = ExamSpec {
            name: "render".into(),
            subjects: vec![Subject {
                name: "Math".into(),
                sections: vec![Section {
                    name: "I".into(),
                    question_count: 3,
                    question_type: QuestionType::MultipleChoice(4),
                }],
            }],
        };
        generate_for_paper(&spec, PaperSize::A4, 150, &LayoutOptions::default())
            .expect("a4 150 dpi")
    }

    #[test]
    fn marks_are_drawn_at_expected_brightness() {
        let t = small_template();
        let img = render_template(&t, &RenderOptions::default());
        assert_eq!((img.width, img.height), (1240, 1754));
        for m in t.alignment_marks.iter() {
            let (x, y) = m.position.to_pixels(1240.0, 1754.0);
            assert_eq!(img.get(x as usize, y as usize), m.expected_brightness, "{}", m.id);
        }
    }

    #[test]
    fn answered_bubble_is_filled_and_others_are_hollow() {
        let t = small_template();
        let opts = RenderOptions {
            answers: RenderOptions::parse_answers("2:b").expect("answers"),
            ..RenderOptions::default()
        };
        let img = render_template(&t, &opts);
        let centre = |q: u32, opt: char| {
            let b = t
                .nominal_bubbles()
                .into_iter()
                .find(|b| b.question_number == q && b.option == opt)
                .expect("bubble");
            let (x, y) = b.position.to_pixels(1240.0, 1754.0);
            img.get(x as usize, y as usize)
        };
        assert_eq!(centre(2, 'B'), 0);
        assert_eq!(centre(2, 'A'), 255);
        assert_eq!(centre(1, 'B'), 255);
    }

    #[test]
    fn malformed_answers_are_rejected() {
        assert!(RenderOptions::parse_answers("1-A").is_err());
        assert!(RenderOptions::parse_answers("x:A").is_err());
        assert!(RenderOptions::parse_answers("1:AB").is_err());
        assert!(RenderOptions::parse_answers("").expect("empty").is_empty());
    }
}
