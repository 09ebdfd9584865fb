//! Full recognizer round trip on a synthetically rendered canonical sheet.
//!
//! The sheet is drawn with ink blobs in known boxes, OCR is scripted to
//! return the ground-truth strings, and every string is present in its
//! box's vocabulary, so the recognizer must resolve every filled box at
//! confidence 1.

use std::collections::VecDeque;
use std::time::Duration;

use image::{Rgb, RgbImage};

use tally_scan::core::config::RecognizeConfig;
use tally_scan::recognize::{BoxRecognizer, FallbackIdentity, OcrClient, OcrEngine};
use tally_scan::template::{BoxRole, BoxSpec, PixelRect, SheetTemplate};
use tally_scan::vocabulary::{ProductInfo, Vocabularies, VocabularySnapshot};
use tally_scan::ScanError;

struct ScriptedEngine {
    replies: VecDeque<String>,
}

impl OcrEngine for ScriptedEngine {
    fn recognize(&mut self, _image: &image::GrayImage) -> Result<String, ScanError> {
        self.replies
            .pop_front()
            .ok_or_else(|| ScanError::ocr("ocr script exhausted"))
    }
}

fn template() -> SheetTemplate {
    let boxes = vec![
        BoxSpec {
            name: "name_box".into(),
            role: BoxRole::Name,
            rect: PixelRect::new(20, 20, 140, 60),
            grid: None,
        },
        BoxSpec {
            name: "unit_box".into(),
            role: BoxRole::Unit,
            rect: PixelRect::new(150, 20, 270, 60),
            grid: None,
        },
        BoxSpec {
            name: "price_box".into(),
            role: BoxRole::Price,
            rect: PixelRect::new(280, 20, 398, 60),
            grid: None,
        },
        BoxSpec {
            name: "page_number_box".into(),
            role: BoxRole::PageNumber,
            rect: PixelRect::new(20, 70, 140, 110),
            grid: None,
        },
        BoxSpec {
            name: "tally_0_0".into(),
            role: BoxRole::Tally,
            rect: PixelRect::new(20, 130, 140, 170),
            grid: Some((0, 0)),
        },
        BoxSpec {
            name: "tally_0_1".into(),
            role: BoxRole::Tally,
            rect: PixelRect::new(150, 130, 270, 170),
            grid: Some((0, 1)),
        },
        BoxSpec {
            name: "tally_1_0".into(),
            role: BoxRole::Tally,
            rect: PixelRect::new(20, 180, 140, 220),
            grid: Some((1, 0)),
        },
        BoxSpec {
            name: "tally_1_1".into(),
            role: BoxRole::Tally,
            rect: PixelRect::new(150, 180, 270, 220),
            grid: Some((1, 1)),
        },
    ];
    SheetTemplate::new(400, 300, boxes).unwrap()
}

fn snapshot() -> VocabularySnapshot {
    VocabularySnapshot {
        products: vec![
            ProductInfo {
                name: "Mango Chutney".into(),
                unit: "250g".into(),
                price: "4.20".into(),
                previous_quantity: 50,
            },
            ProductInfo {
                name: "Peanut Butter".into(),
                unit: "500g".into(),
                price: "6.80".into(),
                previous_quantity: 80,
            },
        ],
        member_ids: vec!["AB123".into(), "CD456".into()],
    }
}

/// Renders a white canonical sheet with four ink blobs in each named box.
fn render_sheet(template: &SheetTemplate, filled: &[&str]) -> RgbImage {
    let mut sheet =
        RgbImage::from_pixel(template.width(), template.height(), Rgb([255, 255, 255]));
    for name in filled {
        let rect = template.get(name).unwrap().rect;
        for blob in 0..4u32 {
            let x0 = rect.x0 + 10 + blob * 20;
            let y0 = rect.y0 + 10;
            for y in y0..y0 + 12 {
                for x in x0..x0 + 12 {
                    sheet.put_pixel(x, y, Rgb([0, 0, 0]));
                }
            }
        }
    }
    sheet
}

fn scripted_client(replies: &[&str]) -> OcrClient {
    let replies: VecDeque<String> = replies.iter().map(|s| s.to_string()).collect();
    OcrClient::spawn(
        move || Ok(ScriptedEngine { replies }),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn fallback() -> FallbackIdentity {
    FallbackIdentity {
        name: "unknown_sheet".into(),
        page: 1,
    }
}

#[test]
fn full_sheet_resolves_every_box_at_confidence_one() {
    let template = template();
    let config = RecognizeConfig::default();
    let vocabularies = Vocabularies::build(&snapshot(), &config);
    let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

    let all_boxes = [
        "name_box",
        "unit_box",
        "price_box",
        "page_number_box",
        "tally_0_0",
        "tally_0_1",
        "tally_1_0",
        "tally_1_1",
    ];
    let canonical = render_sheet(&template, &all_boxes);
    let mut ocr = scripted_client(&[
        "Mango Chutney",
        "250g",
        "4.20",
        "Page 1",
        "AB123",
        "CD456",
        "AB123",
        "CD456",
    ]);

    let sheet = recognizer
        .recognize_sheet(&canonical, &mut ocr, &fallback())
        .unwrap();

    let expected = [
        ("name_box", "MANGO CHUTNEY"),
        ("unit_box", "250G"),
        ("price_box", "4.20"),
        ("page_number_box", "PAGE 1"),
        ("tally_0_0", "AB123"),
        ("tally_0_1", "CD456"),
        ("tally_1_0", "AB123"),
        ("tally_1_1", "CD456"),
    ];
    for (name, text) in expected {
        let b = sheet.get(name).unwrap();
        assert_eq!(b.text, text, "box {name}");
        assert_eq!(b.confidence, 1.0, "box {name}");
        assert!(!b.flagged, "box {name}");
    }
    assert_eq!(sheet.product_id, "mango_chutney");
    assert_eq!(sheet.page_number, "PAGE 1");
}

#[test]
fn blank_cell_between_filled_cells_is_flagged() {
    let template = template();
    let config = RecognizeConfig::default();
    let vocabularies = Vocabularies::build(&snapshot(), &config);
    let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

    // tally_1_1 carries no ink; its grid neighbors tally_0_1 and tally_1_0
    // are both filled.
    let filled = [
        "name_box",
        "unit_box",
        "price_box",
        "page_number_box",
        "tally_0_0",
        "tally_0_1",
        "tally_1_0",
    ];
    let canonical = render_sheet(&template, &filled);
    let mut ocr = scripted_client(&[
        "Mango Chutney",
        "250g",
        "4.20",
        "Page 1",
        "AB123",
        "CD456",
        "AB123",
    ]);

    let sheet = recognizer
        .recognize_sheet(&canonical, &mut ocr, &fallback())
        .unwrap();

    let blank = sheet.get("tally_1_1").unwrap();
    assert_eq!(blank.text, "");
    assert_eq!(blank.confidence, 0.0);
    assert!(blank.flagged);
}

#[test]
fn every_confidence_stays_in_unit_interval() {
    let template = template();
    let config = RecognizeConfig::default();
    let vocabularies = Vocabularies::build(&snapshot(), &config);
    let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

    // Garbled OCR output everywhere: nothing may leave [0, 1], and blank
    // boxes may only end certain or unresolved.
    let filled = ["name_box", "tally_0_0", "tally_0_1"];
    let canonical = render_sheet(&template, &filled);
    let mut ocr = scripted_client(&["@@@@@@@@@@", "#####", "%%%%%"]);

    let sheet = recognizer
        .recognize_sheet(&canonical, &mut ocr, &fallback())
        .unwrap();

    for b in &sheet.boxes {
        assert!(
            (0.0..=1.0).contains(&b.confidence),
            "box {} confidence {}",
            b.name,
            b.confidence
        );
        if b.text.is_empty() {
            assert!(
                b.confidence == 0.0 || b.confidence == 1.0,
                "blank box {} has intermediate confidence {}",
                b.name,
                b.confidence
            );
        }
    }
}
