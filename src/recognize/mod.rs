//! Per-box recognition on canonical sheets.
//!
//! Every template box is binarized, cleaned of edge artifacts and stroke
//! noise, OCR'd, and resolved against its role's candidate vocabulary.
//! Cross-box inference then fills or flags boxes using the resolved product
//! identity, and blank boxes surrounded by filled neighbors are flagged as
//! suspicious. Illegible content never aborts a sheet; it degrades to empty
//! text at zero confidence.

pub mod ocr;

pub use ocr::{OcrClient, OcrEngine};

use image::{Rgb, RgbImage};
use tracing::{debug, warn};

use crate::components::label_components;
use crate::core::config::RecognizeConfig;
use crate::core::errors::ScanError;
use crate::geometry::Point;
use crate::imgutil;
use crate::morph::{self, RectKernel};
use crate::template::{BoxRole, BoxSpec, RecognizedBox, RecognizedSheet, SheetTemplate};
use crate::vocabulary::{format_page_number, Vocabularies};

/// Identity assigned to sheets whose name box cannot be resolved, plus the
/// batch-scoped fallback page for this sheet.
#[derive(Debug, Clone)]
pub struct FallbackIdentity {
    pub name: String,
    pub page: u32,
}

/// White padding around the isolated ink region before deskewing.
const PAD: u32 = 20;

/// Recognizes all boxes of canonical sheets against one template and
/// vocabulary snapshot.
#[derive(Debug)]
pub struct BoxRecognizer<'a> {
    template: &'a SheetTemplate,
    vocabularies: &'a Vocabularies,
    config: &'a RecognizeConfig,
}

impl<'a> BoxRecognizer<'a> {
    pub fn new(
        template: &'a SheetTemplate,
        vocabularies: &'a Vocabularies,
        config: &'a RecognizeConfig,
    ) -> Self {
        Self {
            template,
            vocabularies,
            config,
        }
    }

    /// Runs independent per-box recognition, then inference, and derives the
    /// sheet identity.
    pub fn recognize_sheet(
        &self,
        canonical: &RgbImage,
        ocr: &mut OcrClient,
        fallback: &FallbackIdentity,
    ) -> Result<RecognizedSheet, ScanError> {
        if canonical.dimensions() != (self.template.width(), self.template.height()) {
            return Err(ScanError::structural(format!(
                "canonical sheet is {}x{}, template expects {}x{}",
                canonical.width(),
                canonical.height(),
                self.template.width(),
                self.template.height()
            )));
        }

        let mut boxes = Vec::with_capacity(self.template.boxes().len());
        for spec in self.template.boxes() {
            let (text, confidence) = self.recognize_box(canonical, spec, ocr)?;
            debug!(box_name = %spec.name, %text, confidence, "box recognized");
            boxes.push(RecognizedBox {
                name: spec.name.clone(),
                role: spec.role,
                text,
                confidence,
                flagged: false,
            });
        }

        let mut sheet = RecognizedSheet {
            product_id: String::new(),
            page_number: String::new(),
            boxes,
        };
        self.infer_and_flag(&mut sheet, fallback)?;

        if let Some(name_box) = self.first_with_role(&sheet, BoxRole::Name) {
            sheet.product_id = crate::template::product_id_from_name(&name_box.text);
        }
        if let Some(page_box) = self.first_with_role(&sheet, BoxRole::PageNumber) {
            sheet.page_number = page_box.text.clone();
        }
        Ok(sheet)
    }

    /// Independent recognition of one box: binarize, filter components,
    /// isolate the dominant ink region, OCR, match.
    fn recognize_box(
        &self,
        canonical: &RgbImage,
        spec: &BoxSpec,
        ocr: &mut OcrClient,
    ) -> Result<(String, f32), ScanError> {
        if spec.role == BoxRole::Static {
            return Ok((String::new(), 1.0));
        }

        let rect = spec.rect.expanded(
            self.config.box_margin,
            self.template.width(),
            self.template.height(),
        );
        let raw = imgutil::crop(canonical, rect.x0, rect.y0, rect.width(), rect.height());
        let gray = imgutil::to_gray(&raw);

        let mut binary = imgutil::adaptive_mean_threshold(&gray, 5, 2);
        morph::invert(&mut binary);
        binary = morph::close(&binary, RectKernel::square(5));
        binary = morph::open(&binary, RectKernel::square(4));

        let labeled = label_components(&binary);
        let survivors: Vec<u32> = labeled
            .components
            .iter()
            .filter(|c| {
                !c.touches_border(binary.width(), binary.height())
                    && c.area >= self.config.min_component_area
                    && c.normalized_aspect_ratio() >= self.config.min_normalized_aspect_ratio
            })
            .map(|c| c.label)
            .collect();
        debug!(
            box_name = %spec.name,
            components = labeled.components.len(),
            survivors = survivors.len(),
            "ink components"
        );
        if survivors.len() < 4 {
            // Too little ink: the box is judged genuinely blank.
            return Ok((String::new(), 1.0));
        }

        let mask = imgutil::add_border_gray(&labeled.mask_of(&survivors), PAD, PAD, 0);
        let mut region = morph::close(&mask, RectKernel::new(18, 12));
        region = morph::dilate(&region, RectKernel::new(48, 12));
        let regions = label_components(&region);
        // Border artifacts were already dropped above, so the dominant ink
        // region is the largest remaining one.
        let Some(text_region) = regions.components.first() else {
            return Ok((String::new(), 1.0));
        };

        let points: Vec<Point> = regions
            .labels
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] == text_region.label)
            .map(|(x, y, _)| Point::new(x as f32, y as f32))
            .collect();
        let Some(strip_rect) = crate::geometry::min_area_rect(&points) else {
            return Ok((String::new(), 0.0));
        };
        let strip_rect = strip_rect.normalized();

        let padded = imgutil::add_border(&raw, PAD, PAD, Rgb([255, 255, 255]));
        let rotated = imgutil::rotate_about(&padded, strip_rect.center, strip_rect.angle_deg);
        let strip = imgutil::rect_subpix(
            &rotated,
            strip_rect.center,
            strip_rect.width.round() as u32,
            strip_rect.height.round() as u32,
        );

        let Some(raw_text) = ocr.recognize(&imgutil::to_gray(&strip))? else {
            return Ok((String::new(), 0.0));
        };
        let raw_text = raw_text.trim().to_uppercase();
        if raw_text.is_empty() {
            return Ok((String::new(), 0.0));
        }

        let Some(vocabulary) = self.vocabularies.for_role(spec.role) else {
            return Ok((String::new(), 1.0));
        };
        let outcome = vocabulary.find_closest(&raw_text);
        Ok((outcome.text, outcome.confidence))
    }

    /// Per-role fallback policies, cross-box inference, neighbor flagging
    /// and the final confidence-threshold marking.
    ///
    /// Policies run first so that a certainly-blank unit, price or page box
    /// is demoted to confidence 0 and becomes fillable by product inference.
    pub fn infer_and_flag(
        &self,
        sheet: &mut RecognizedSheet,
        fallback: &FallbackIdentity,
    ) -> Result<(), ScanError> {
        self.apply_role_policies(sheet, fallback)?;
        self.infer_from_product(sheet)?;
        self.flag_suspicious_blanks(sheet)?;

        for b in &mut sheet.boxes {
            if b.confidence < self.config.confidence_threshold {
                b.flagged = true;
            }
        }
        Ok(())
    }

    /// A confidently resolved name box pins the expected unit and price and
    /// may justify a "page 1" guess.
    fn infer_from_product(&self, sheet: &mut RecognizedSheet) -> Result<(), ScanError> {
        let Some(name_box) = self.first_with_role(sheet, BoxRole::Name) else {
            return Ok(());
        };
        if name_box.confidence != 1.0 || name_box.text.is_empty() {
            return Ok(());
        }
        let Some(product) = self.vocabularies.product(&name_box.text).cloned() else {
            warn!(name = %name_box.text, "resolved product name missing from snapshot");
            return Ok(());
        };

        for (role, expected) in [
            (BoxRole::Unit, product.unit.to_uppercase()),
            (BoxRole::Price, product.price.to_uppercase()),
        ] {
            let Some(b) = self.first_with_role_mut(sheet, role) else {
                continue;
            };
            if b.confidence < 1.0 {
                b.text = expected;
                b.confidence = 1.0;
            } else if b.text != expected {
                // Conflicting evidence at full confidence: flag, never
                // silently overwrite.
                b.confidence = 0.0;
            }
        }

        if product.previous_quantity < self.template.tally_capacity() {
            if let Some(page_box) = self.first_with_role_mut(sheet, BoxRole::PageNumber) {
                // The stock might also be low because most units sold while
                // more than one sheet is in circulation, so this stays a
                // guess at confidence 0.
                if page_box.confidence < 1.0 {
                    page_box.text = format_page_number(&self.config.page_number_format, 1);
                    page_box.confidence = 0.0;
                }
            }
        }
        Ok(())
    }

    fn apply_role_policies(
        &self,
        sheet: &mut RecognizedSheet,
        fallback: &FallbackIdentity,
    ) -> Result<(), ScanError> {
        if let Some(name_box) = self.first_with_role_mut(sheet, BoxRole::Name) {
            if name_box.text.is_empty() || name_box.confidence < self.config.confidence_threshold {
                name_box.text = fallback.name.to_uppercase();
                name_box.confidence = 0.0;
            }
        }
        if let Some(unit_box) = self.first_with_role_mut(sheet, BoxRole::Unit) {
            if unit_box.text.is_empty() {
                unit_box.confidence = 0.0;
            }
        }
        if let Some(price_box) = self.first_with_role_mut(sheet, BoxRole::Price) {
            // A price is only trustworthy when certain.
            if price_box.text.is_empty() || price_box.confidence < 1.0 {
                price_box.confidence = 0.0;
            }
        }
        if let Some(page_box) = self.first_with_role_mut(sheet, BoxRole::PageNumber) {
            if page_box.text.is_empty() || page_box.confidence < 1.0 {
                page_box.text = format_page_number(&self.config.page_number_format, fallback.page);
                page_box.confidence = 0.0;
            }
        }
        Ok(())
    }

    /// A blank box surrounded mostly by filled boxes is suspicious.
    fn flag_suspicious_blanks(&self, sheet: &mut RecognizedSheet) -> Result<(), ScanError> {
        let mut force_zero = Vec::new();
        for b in &sheet.boxes {
            if !b.is_blank() || b.confidence == 0.0 {
                continue;
            }
            let neighbors = self.template.grid_neighbors(&b.name)?;
            let filled = neighbors
                .iter()
                .filter(|n| {
                    sheet
                        .boxes
                        .iter()
                        .any(|sb| sb.name == n.name && !sb.is_blank())
                })
                .count();
            if filled >= 2 {
                force_zero.push(b.name.clone());
            }
        }
        for name in force_zero {
            sheet.get_mut(&name)?.confidence = 0.0;
        }
        Ok(())
    }

    fn first_with_role<'s>(
        &self,
        sheet: &'s RecognizedSheet,
        role: BoxRole,
    ) -> Option<&'s RecognizedBox> {
        sheet.boxes.iter().find(|b| b.role == role)
    }

    fn first_with_role_mut<'s>(
        &self,
        sheet: &'s mut RecognizedSheet,
        role: BoxRole,
    ) -> Option<&'s mut RecognizedBox> {
        sheet.boxes.iter_mut().find(|b| b.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RecognizeConfig;
    use crate::template::{BoxSpec, PixelRect};
    use crate::vocabulary::{ProductInfo, Vocabularies, VocabularySnapshot};
    use std::time::Duration;

    fn snapshot() -> VocabularySnapshot {
        VocabularySnapshot {
            products: vec![
                ProductInfo {
                    name: "Mango Chutney".into(),
                    unit: "250g".into(),
                    price: "4.20".into(),
                    previous_quantity: 2,
                },
                ProductInfo {
                    name: "Peanut Butter".into(),
                    unit: "500g".into(),
                    price: "6.80".into(),
                    previous_quantity: 100,
                },
            ],
            member_ids: vec!["AB123".into(), "CD456".into()],
        }
    }

    fn grid_template() -> SheetTemplate {
        let mut boxes = vec![
            BoxSpec {
                name: "name_box".into(),
                role: BoxRole::Name,
                rect: PixelRect::new(0, 0, 100, 10),
                grid: None,
            },
            BoxSpec {
                name: "unit_box".into(),
                role: BoxRole::Unit,
                rect: PixelRect::new(100, 0, 150, 10),
                grid: None,
            },
            BoxSpec {
                name: "price_box".into(),
                role: BoxRole::Price,
                rect: PixelRect::new(150, 0, 200, 10),
                grid: None,
            },
            BoxSpec {
                name: "page_number_box".into(),
                role: BoxRole::PageNumber,
                rect: PixelRect::new(200, 0, 250, 10),
                grid: None,
            },
        ];
        for row in 0..3u32 {
            for col in 0..3u32 {
                boxes.push(BoxSpec {
                    name: format!("tally_{row}_{col}"),
                    role: BoxRole::Tally,
                    rect: PixelRect::new(col * 40, 20 + row * 20, col * 40 + 40, 40 + row * 20),
                    grid: Some((row, col)),
                });
            }
        }
        SheetTemplate::new(256, 128, boxes).unwrap()
    }

    fn sheet_for(template: &SheetTemplate) -> RecognizedSheet {
        RecognizedSheet {
            product_id: String::new(),
            page_number: String::new(),
            boxes: template
                .boxes()
                .iter()
                .map(|spec| RecognizedBox {
                    name: spec.name.clone(),
                    role: spec.role,
                    text: String::new(),
                    confidence: 1.0,
                    flagged: false,
                })
                .collect(),
        }
    }

    fn fallback() -> FallbackIdentity {
        FallbackIdentity {
            name: "UNKNOWN_SHEET_0".into(),
            page: 7,
        }
    }

    fn set(sheet: &mut RecognizedSheet, name: &str, text: &str, confidence: f32) {
        let b = sheet.get_mut(name).unwrap();
        b.text = text.into();
        b.confidence = confidence;
    }

    #[test]
    fn test_conflicting_unit_forced_to_zero_confidence() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "MANGO CHUTNEY", 1.0);
        set(&mut sheet, "unit_box", "500G", 1.0);
        set(&mut sheet, "price_box", "4.20", 1.0);
        set(&mut sheet, "page_number_box", "PAGE 1", 1.0);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        let unit = sheet.get("unit_box").unwrap();
        assert_eq!(unit.text, "500G");
        assert_eq!(unit.confidence, 0.0);
        assert!(unit.flagged);
    }

    #[test]
    fn test_low_confidence_unit_overwritten_from_product() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "MANGO CHUTNEY", 1.0);
        set(&mut sheet, "unit_box", "", 0.0);
        set(&mut sheet, "price_box", "", 0.0);
        set(&mut sheet, "page_number_box", "PAGE 2", 1.0);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        let unit = sheet.get("unit_box").unwrap();
        assert_eq!(unit.text, "250G");
        assert_eq!(unit.confidence, 1.0);
        let price = sheet.get("price_box").unwrap();
        assert_eq!(price.text, "4.20");
        assert_eq!(price.confidence, 1.0);
    }

    #[test]
    fn test_blank_unit_and_price_filled_from_product() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        // A genuinely blank unit or price box leaves recognition at
        // confidence 1; a certain product identity must still fill it.
        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "MANGO CHUTNEY", 1.0);
        set(&mut sheet, "unit_box", "", 1.0);
        set(&mut sheet, "price_box", "", 1.0);
        set(&mut sheet, "page_number_box", "PAGE 1", 1.0);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        let unit = sheet.get("unit_box").unwrap();
        assert_eq!(unit.text, "250G");
        assert_eq!(unit.confidence, 1.0);
        assert!(!unit.flagged);
        let price = sheet.get("price_box").unwrap();
        assert_eq!(price.text, "4.20");
        assert_eq!(price.confidence, 1.0);
        assert!(!price.flagged);
    }

    #[test]
    fn test_uncertain_page_number_replaced_by_fallback() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "", 0.0);
        set(&mut sheet, "page_number_box", "PAGE 2", 0.6);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        // A page number below certainty must not name the output file.
        let page = sheet.get("page_number_box").unwrap();
        assert_eq!(page.text, "PAGE 7");
        assert_eq!(page.confidence, 0.0);
        assert!(page.flagged);
    }

    #[test]
    fn test_page_one_guessed_for_nearly_empty_product() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        // "Mango Chutney" has previous_quantity 2, below the capacity of 9.
        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "MANGO CHUTNEY", 1.0);
        set(&mut sheet, "page_number_box", "", 1.0);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        let page = sheet.get("page_number_box").unwrap();
        assert_eq!(page.text, "PAGE 1");
        assert_eq!(page.confidence, 0.0);
    }

    #[test]
    fn test_unresolved_name_falls_back() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "", 0.0);
        set(&mut sheet, "page_number_box", "", 0.0);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        let name = sheet.get("name_box").unwrap();
        assert_eq!(name.text, "UNKNOWN_SHEET_0");
        assert_eq!(name.confidence, 0.0);
        let page = sheet.get("page_number_box").unwrap();
        assert_eq!(page.text, "PAGE 7");
        assert_eq!(page.confidence, 0.0);
    }

    #[test]
    fn test_blank_cell_with_filled_neighbors_flagged() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        let mut sheet = sheet_for(&template);
        set(&mut sheet, "name_box", "MANGO CHUTNEY", 1.0);
        set(&mut sheet, "unit_box", "250G", 1.0);
        set(&mut sheet, "price_box", "4.20", 1.0);
        set(&mut sheet, "page_number_box", "PAGE 1", 1.0);
        // Center cell blank at confidence 1, two of its neighbors filled.
        set(&mut sheet, "tally_1_1", "", 1.0);
        set(&mut sheet, "tally_0_1", "AB123", 1.0);
        set(&mut sheet, "tally_2_1", "CD456", 1.0);
        recognizer.infer_and_flag(&mut sheet, &fallback()).unwrap();

        let center = sheet.get("tally_1_1").unwrap();
        assert_eq!(center.confidence, 0.0);
        assert!(center.flagged);
        // An isolated blank cell keeps its certainty.
        let corner = sheet.get("tally_0_0").unwrap();
        assert_eq!(corner.confidence, 1.0);
    }

    #[test]
    fn test_blank_white_box_recognized_as_blank() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        struct PanicEngine;
        impl OcrEngine for PanicEngine {
            fn recognize(&mut self, _: &image::GrayImage) -> Result<String, ScanError> {
                panic!("blank boxes must not reach the engine");
            }
        }
        let mut client =
            OcrClient::spawn(|| Ok(PanicEngine), Duration::from_secs(1)).unwrap();

        let canonical =
            RgbImage::from_pixel(template.width(), template.height(), Rgb([255, 255, 255]));
        let spec = template.get("tally_0_0").unwrap();
        let (text, confidence) = recognizer
            .recognize_box(&canonical, spec, &mut client)
            .unwrap();
        assert_eq!(text, "");
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_dominant_ink_region_is_ocrd_when_regions_stay_separate() {
        // Two rows of blobs far enough apart to survive region merging as
        // two components; the bigger row is the one handed to OCR.
        let boxes = vec![BoxSpec {
            name: "tally_0_0".into(),
            role: BoxRole::Tally,
            rect: PixelRect::new(20, 20, 190, 90),
            grid: Some((0, 0)),
        }];
        let template = SheetTemplate::new(256, 128, boxes).unwrap();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        fn blob(img: &mut RgbImage, x0: u32, y0: u32) {
            for y in y0..y0 + 12 {
                for x in x0..x0 + 12 {
                    img.put_pixel(x, y, Rgb([0, 0, 0]));
                }
            }
        }
        let mut canonical =
            RgbImage::from_pixel(template.width(), template.height(), Rgb([255, 255, 255]));
        for i in 0..6u32 {
            blob(&mut canonical, 30 + i * 20, 26);
        }
        for i in 0..4u32 {
            blob(&mut canonical, 30 + i * 20, 64);
        }

        struct WidthEngine;
        impl OcrEngine for WidthEngine {
            fn recognize(&mut self, image: &image::GrayImage) -> Result<String, ScanError> {
                Ok(if image.width() > 145 { "AB123" } else { "CD456" }.into())
            }
        }
        let mut client =
            OcrClient::spawn(|| Ok(WidthEngine), Duration::from_secs(5)).unwrap();

        let spec = template.get("tally_0_0").unwrap();
        let (text, confidence) = recognizer
            .recognize_box(&canonical, spec, &mut client)
            .unwrap();
        assert_eq!(text, "AB123");
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_geometry_mismatch_is_structural() {
        let template = grid_template();
        let config = RecognizeConfig::default();
        let vocabularies = Vocabularies::build(&snapshot(), &config);
        let recognizer = BoxRecognizer::new(&template, &vocabularies, &config);

        struct EmptyEngine;
        impl OcrEngine for EmptyEngine {
            fn recognize(&mut self, _: &image::GrayImage) -> Result<String, ScanError> {
                Ok(String::new())
            }
        }
        let mut client =
            OcrClient::spawn(|| Ok(EmptyEngine), Duration::from_secs(1)).unwrap();

        let wrong = RgbImage::new(64, 64);
        let result = recognizer.recognize_sheet(&wrong, &mut client, &fallback());
        assert!(matches!(result, Err(ScanError::Structural { .. })));
    }
}
