//! Sheet template geometry and recognition results.
//!
//! A [`SheetTemplate`] is an ordered set of named boxes with fixed rectangles
//! in canonical pixel space. Box names are unique; the tally cells carry grid
//! coordinates so the recognizer can reason about their neighbors. A
//! [`RecognizedSheet`] owns the per-box results for one processed sheet and
//! serializes to the JSON output file.

use serde::{Deserialize, Serialize};

use crate::core::errors::ScanError;

/// The role of a box, deciding which candidate vocabulary it matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxRole {
    /// Product name.
    Name,
    /// Unit string, e.g. "500G".
    Unit,
    /// Formatted price.
    Price,
    /// Page-number string, e.g. "PAGE 2".
    PageNumber,
    /// A per-member tally cell holding a member id.
    Tally,
    /// Printed boilerplate with no vocabulary; always resolves blank.
    Static,
}

/// An axis-aligned rectangle in canonical pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// Expands by `margin` on every side, clamped to `width` x `height`.
    pub fn expanded(&self, margin: u32, width: u32, height: u32) -> PixelRect {
        PixelRect {
            x0: self.x0.saturating_sub(margin),
            y0: self.y0.saturating_sub(margin),
            x1: (self.x1 + margin).min(width),
            y1: (self.y1 + margin).min(height),
        }
    }
}

/// One named box of the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxSpec {
    /// Unique box name, e.g. `name_box` or `tally_3_12`.
    pub name: String,
    pub role: BoxRole,
    pub rect: PixelRect,
    /// (row, column) for tally cells; `None` for header boxes.
    pub grid: Option<(u32, u32)>,
}

/// The fixed geometry every canonical sheet conforms to.
#[derive(Debug, Clone)]
pub struct SheetTemplate {
    width: u32,
    height: u32,
    boxes: Vec<BoxSpec>,
}

impl SheetTemplate {
    /// Builds a template, validating that box names are unique and every
    /// rectangle lies within the canonical dimensions.
    pub fn new(width: u32, height: u32, boxes: Vec<BoxSpec>) -> Result<Self, ScanError> {
        let mut seen = std::collections::HashSet::new();
        for spec in &boxes {
            if !seen.insert(spec.name.clone()) {
                return Err(ScanError::structural(format!(
                    "duplicate box name '{}' in template",
                    spec.name
                )));
            }
            if spec.rect.x1 <= spec.rect.x0
                || spec.rect.y1 <= spec.rect.y0
                || spec.rect.x1 > width
                || spec.rect.y1 > height
            {
                return Err(ScanError::structural(format!(
                    "box '{}' rectangle {:?} outside canonical {}x{}",
                    spec.name, spec.rect, width, height
                )));
            }
        }
        Ok(Self { width, height, boxes })
    }

    /// Canonical sheet width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canonical sheet height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// All boxes in template order.
    pub fn boxes(&self) -> &[BoxSpec] {
        &self.boxes
    }

    /// Looks up a box by name; a missing name is a structural fault.
    pub fn get(&self, name: &str) -> Result<&BoxSpec, ScanError> {
        self.boxes
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| ScanError::structural(format!("box '{name}' absent from template")))
    }

    /// The first box with the given role, if any.
    pub fn first_with_role(&self, role: BoxRole) -> Option<&BoxSpec> {
        self.boxes.iter().find(|b| b.role == role)
    }

    /// The printed frame: the bounding box of every box rectangle. The
    /// canonical fitter resizes the cropped sheet content to this region.
    pub fn frame(&self) -> PixelRect {
        let mut frame = PixelRect::new(self.width, self.height, 0, 0);
        for spec in &self.boxes {
            frame.x0 = frame.x0.min(spec.rect.x0);
            frame.y0 = frame.y0.min(spec.rect.y0);
            frame.x1 = frame.x1.max(spec.rect.x1);
            frame.y1 = frame.y1.max(spec.rect.y1);
        }
        if frame.x1 <= frame.x0 || frame.y1 <= frame.y0 {
            return PixelRect::new(0, 0, self.width, self.height);
        }
        frame
    }

    /// Number of tally cells, i.e. how many entries one page can hold.
    pub fn tally_capacity(&self) -> u32 {
        self.boxes.iter().filter(|b| b.role == BoxRole::Tally).count() as u32
    }

    /// The up/down/left/right grid neighbors of a tally cell. Header boxes
    /// and cells at the grid edge return fewer than four.
    pub fn grid_neighbors(&self, name: &str) -> Result<Vec<&BoxSpec>, ScanError> {
        let spec = self.get(name)?;
        let Some((row, col)) = spec.grid else {
            return Ok(Vec::new());
        };
        let mut wanted = vec![(row, col.wrapping_sub(1)), (row, col + 1)];
        wanted.push((row.wrapping_sub(1), col));
        wanted.push((row + 1, col));
        Ok(self
            .boxes
            .iter()
            .filter(|b| b.grid.is_some_and(|g| wanted.contains(&g)))
            .collect())
    }

    /// The standard tally-sheet layout: a header band with name, unit, price
    /// and page-number boxes, then a 6x14 grid of tally cells.
    pub fn standard(width: u32, height: u32) -> Self {
        let margin = width / 18;
        let header_top = height / 40;
        let header_bottom = header_top + height / 18;
        let half = width / 2;
        let sixth = (width - margin - half) / 3;

        let mut boxes = vec![
            BoxSpec {
                name: "name_box".into(),
                role: BoxRole::Name,
                rect: PixelRect::new(margin, header_top, half, header_bottom),
                grid: None,
            },
            BoxSpec {
                name: "unit_box".into(),
                role: BoxRole::Unit,
                rect: PixelRect::new(half, header_top, half + sixth, header_bottom),
                grid: None,
            },
            BoxSpec {
                name: "price_box".into(),
                role: BoxRole::Price,
                rect: PixelRect::new(half + sixth, header_top, half + 2 * sixth, header_bottom),
                grid: None,
            },
            BoxSpec {
                name: "page_number_box".into(),
                role: BoxRole::PageNumber,
                rect: PixelRect::new(half + 2 * sixth, header_top, width - margin, header_bottom),
                grid: None,
            },
        ];

        let (rows, cols) = (14u32, 6u32);
        let grid_top = header_bottom + height / 40;
        let grid_bottom = height - margin;
        let cell_w = (width - 2 * margin) / cols;
        let cell_h = (grid_bottom - grid_top) / rows;
        for row in 0..rows {
            for col in 0..cols {
                let x0 = margin + col * cell_w;
                let y0 = grid_top + row * cell_h;
                boxes.push(BoxSpec {
                    name: format!("tally_{row}_{col}"),
                    role: BoxRole::Tally,
                    rect: PixelRect::new(x0, y0, x0 + cell_w, y0 + cell_h),
                    grid: Some((row, col)),
                });
            }
        }

        // Geometry above is within bounds by construction.
        Self { width, height, boxes }
    }
}

/// The recognition result for one box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedBox {
    pub name: String,
    pub role: BoxRole,
    /// Resolved text; empty means blank (confidence 1) or unresolved
    /// (confidence 0).
    pub text: String,
    /// Certainty in [0, 1].
    pub confidence: f32,
    /// Marked for visual highlighting in the preview.
    pub flagged: bool,
}

impl RecognizedBox {
    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

/// One fully recognized sheet, keyed by product id and page number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedSheet {
    pub product_id: String,
    pub page_number: String,
    pub boxes: Vec<RecognizedBox>,
}

impl RecognizedSheet {
    /// The stable file-name stem for this sheet's outputs.
    pub fn key(&self) -> String {
        format!("{}_{}", self.product_id, slugify(&self.page_number))
    }

    pub fn get(&self, name: &str) -> Result<&RecognizedBox, ScanError> {
        self.boxes
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| ScanError::structural(format!("box '{name}' absent from sheet")))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut RecognizedBox, ScanError> {
        self.boxes
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| ScanError::structural(format!("box '{name}' absent from sheet")))
    }
}

/// Derives a filesystem-safe product id from a resolved product name:
/// lowercased, runs of non-alphanumerics collapsed to single underscores.
pub fn product_id_from_name(name: &str) -> String {
    slugify(name)
}

fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
