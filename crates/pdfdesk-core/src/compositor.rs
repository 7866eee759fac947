//! Sheet placement math
//!
//! Pure functions from page sizes and sheet geometry to placement
//! descriptors. Nothing here touches a document; [`crate::layout`] turns the
//! descriptors into drawing calls.

use serde::{Deserialize, Serialize};

use crate::error::{PdfDeskError, Result};

/// Fraction of a cell a page may occupy in N-up and booklet layouts
pub const CELL_MARGIN: f32 = 0.9;

/// Resized pages fill the target sheet edge to edge
pub const RESIZE_MARGIN: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
    A3,
}

impl PaperSize {
    /// Portrait `(width, height)` in points
    pub fn dimensions(self) -> (f32, f32) {
        match self {
            PaperSize::A4 => (595.28, 841.89),
            PaperSize::Letter => (612.0, 792.0),
            PaperSize::A3 => (841.89, 1190.55),
        }
    }

    pub fn landscape(self) -> (f32, f32) {
        let (w, h) = self.dimensions();
        (h, w)
    }
}

impl std::str::FromStr for PaperSize {
    type Err = PdfDeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a4" => Ok(PaperSize::A4),
            "letter" => Ok(PaperSize::Letter),
            "a3" => Ok(PaperSize::A3),
            other => Err(PdfDeskError::Operation(format!(
                "unknown paper size '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl std::str::FromStr for Orientation {
    type Err = PdfDeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(PdfDeskError::Operation(format!(
                "unknown orientation '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub cols: u32,
    pub rows: u32,
}

impl Grid {
    pub fn capacity(&self) -> usize {
        (self.cols * self.rows) as usize
    }
}

/// Where and how large to draw one source page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Position of the source page in the slice handed to the placer
    pub slot: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

/// Scale `src` uniformly into the cell, shrink by `margin`, and center it
pub fn fit_centered(
    src: (f32, f32),
    cell_x: f32,
    cell_y: f32,
    cell_width: f32,
    cell_height: f32,
    margin: f32,
) -> (f32, f32, f32, f32, f32) {
    let (src_w, src_h) = src;
    let scale = (cell_width / src_w).min(cell_height / src_h) * margin;
    let (width, height) = (src_w * scale, src_h * scale);
    (
        cell_x + (cell_width - width) / 2.0,
        cell_y + (cell_height - height) / 2.0,
        width,
        height,
        scale,
    )
}

/// Lay `sources` into the grid row by row, top row first
///
/// Sources beyond the grid capacity are ignored; unused cells stay blank.
pub fn place_on_sheet(
    sources: &[(f32, f32)],
    sheet_width: f32,
    sheet_height: f32,
    grid: Grid,
    margin: f32,
) -> Vec<Placement> {
    let cell_width = sheet_width / grid.cols as f32;
    let cell_height = sheet_height / grid.rows as f32;

    sources
        .iter()
        .take(grid.capacity())
        .enumerate()
        .map(|(slot, &src)| {
            let col = slot as u32 % grid.cols;
            let row = slot as u32 / grid.cols;
            // PDF y grows upwards, so the first row sits highest
            let cell_x = col as f32 * cell_width;
            let cell_y = (grid.rows - 1 - row) as f32 * cell_height;
            let (x, y, width, height, scale) =
                fit_centered(src, cell_x, cell_y, cell_width, cell_height, margin);
            Placement {
                slot,
                x,
                y,
                width,
                height,
                scale,
            }
        })
        .collect()
}

/// Grid and sheet size for `n` pages per sheet
///
/// Two-up goes side by side on a landscape sheet; four-up is a 2x2 grid on
/// a portrait sheet.
pub fn nup_layout(n: u32, paper: PaperSize) -> Result<(Grid, f32, f32)> {
    match n {
        2 => {
            let (w, h) = paper.landscape();
            Ok((Grid { cols: 2, rows: 1 }, w, h))
        }
        4 => {
            let (w, h) = paper.dimensions();
            Ok((Grid { cols: 2, rows: 2 }, w, h))
        }
        other => Err(PdfDeskError::Operation(format!(
            "unsupported pages per sheet: {} (expected 2 or 4)",
            other
        ))),
    }
}

/// Source page indices for each output sheet
pub fn nup_sheets(page_count: usize, per_sheet: usize) -> Vec<Vec<usize>> {
    (0..page_count)
        .collect::<Vec<_>>()
        .chunks(per_sheet.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

/// Blank pages appended so the count is a multiple of four
pub fn booklet_padding(page_count: usize) -> usize {
    (4 - page_count % 4) % 4
}

/// One printed side: `None` marks a padding blank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookletSide {
    pub left: Option<usize>,
    pub right: Option<usize>,
}

/// A physical sheet, printed duplex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookletSheet {
    pub front: BookletSide,
    pub back: Option<BookletSide>,
}

/// Saddle-stitch imposition order for `page_count` pages
///
/// The front of sheet `i` holds `total-1-i | i`; its back holds
/// `i+1 | total-2-i`, so each low page backs onto the next one after folding.
pub fn booklet_plan(page_count: usize) -> Vec<BookletSheet> {
    let total = page_count + booklet_padding(page_count);
    let half = total / 2;
    let real = |index: usize| (index < page_count).then_some(index);

    (0..half)
        .step_by(2)
        .map(|i| BookletSheet {
            front: BookletSide {
                left: real(total - 1 - i),
                right: real(i),
            },
            back: (i + 1 < half).then(|| BookletSide {
                left: real(i + 1),
                right: real(total - 1 - (i + 1)),
            }),
        })
        .collect()
}

/// Rotation to store so the page displays in `target` orientation
///
/// Returns `None` when the page already matches. A quarter turn is added to
/// the existing value, which is never normalized.
pub fn orientation_rotation(
    width: f32,
    height: f32,
    rotation: i64,
    target: Orientation,
) -> Option<i64> {
    let (w, h) = if rotation.rem_euclid(180) != 0 {
        (height, width)
    } else {
        (width, height)
    };
    let current = if h >= w {
        Orientation::Portrait
    } else {
        Orientation::Landscape
    };
    (current != target).then_some(rotation + 90)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const LETTER: (f32, f32) = (612.0, 792.0);

    #[test]
    fn test_fit_centered_preserves_aspect_and_centers() {
        let (x, y, w, h, scale) = fit_centered((100.0, 200.0), 0.0, 0.0, 400.0, 400.0, 1.0);
        assert_eq!(scale, 2.0);
        assert_eq!((w, h), (200.0, 400.0));
        assert_eq!((x, y), (100.0, 0.0));
    }

    #[test]
    fn test_fit_centered_applies_margin() {
        let (x, y, w, h, scale) = fit_centered((100.0, 100.0), 0.0, 0.0, 100.0, 100.0, 0.9);
        assert!((scale - 0.9).abs() < 1e-6);
        assert!((w - 90.0).abs() < 1e-4 && (h - 90.0).abs() < 1e-4);
        assert!((x - 5.0).abs() < 1e-4 && (y - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_first_row_is_at_the_top() {
        let grid = Grid { cols: 2, rows: 2 };
        let placements = place_on_sheet(&[LETTER; 4], 600.0, 800.0, grid, 1.0);
        assert!(placements[0].y >= 400.0);
        assert!(placements[1].y >= 400.0);
        assert!(placements[2].y < 400.0);
        assert!(placements[0].x < 300.0 && placements[1].x >= 300.0);
    }

    #[test]
    fn test_nup_layout_orientation() {
        let (grid, w, h) = nup_layout(2, PaperSize::A4).unwrap();
        assert_eq!(grid, Grid { cols: 2, rows: 1 });
        assert!(w > h);

        let (grid, w, h) = nup_layout(4, PaperSize::A4).unwrap();
        assert_eq!(grid, Grid { cols: 2, rows: 2 });
        assert!(h > w);

        assert!(nup_layout(3, PaperSize::A4).is_err());
    }

    #[test]
    fn test_four_up_five_pages_leaves_three_blank_cells() {
        let sheets = nup_sheets(5, 4);
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[1], vec![4]);

        let (grid, w, h) = nup_layout(4, PaperSize::A4).unwrap();
        let sources: Vec<_> = sheets[1].iter().map(|_| LETTER).collect();
        let placements = place_on_sheet(&sources, w, h, grid, CELL_MARGIN);
        assert_eq!(placements.len(), 1);
        assert_eq!(grid.capacity() - placements.len(), 3);
    }

    #[test]
    fn test_booklet_padding() {
        assert_eq!(booklet_padding(4), 0);
        assert_eq!(booklet_padding(5), 3);
        assert_eq!(booklet_padding(6), 2);
        assert_eq!(booklet_padding(7), 1);
        assert_eq!(booklet_padding(0), 0);
    }

    #[test]
    fn test_booklet_four_pages() {
        let plan = booklet_plan(4);
        assert_eq!(
            plan,
            vec![BookletSheet {
                front: BookletSide {
                    left: Some(3),
                    right: Some(0)
                },
                back: Some(BookletSide {
                    left: Some(1),
                    right: Some(2)
                }),
            }]
        );
    }

    #[test]
    fn test_booklet_eight_pages() {
        let plan = booklet_plan(8);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].front.left, Some(5));
        assert_eq!(plan[1].front.right, Some(2));
        let back = plan[1].back.unwrap();
        assert_eq!((back.left, back.right), (Some(3), Some(4)));
    }

    #[test]
    fn test_booklet_back_side_mirrors_front() {
        for sheet in booklet_plan(12) {
            let (front_left, front_right) = (sheet.front.left.unwrap(), sheet.front.right.unwrap());
            let back = sheet.back.unwrap();
            // Low page on the left of the back, right behind the front's low page
            assert_eq!(back.left, Some(front_right + 1));
            assert_eq!(back.right, Some(front_left - 1));
        }
    }

    #[test]
    fn test_booklet_padding_pages_are_blank() {
        let plan = booklet_plan(5);
        assert_eq!(plan.len(), 2);
        // Padded to 8: the outer front pairs blank page 8 with page 1
        assert_eq!(plan[0].front.left, None);
        assert_eq!(plan[0].front.right, Some(0));
    }

    #[test]
    fn test_orientation_rotation() {
        assert_eq!(
            orientation_rotation(612.0, 792.0, 0, Orientation::Landscape),
            Some(90)
        );
        assert_eq!(
            orientation_rotation(612.0, 792.0, 0, Orientation::Portrait),
            None
        );
        assert_eq!(
            orientation_rotation(612.0, 792.0, 90, Orientation::Landscape),
            None
        );
        assert_eq!(
            orientation_rotation(612.0, 792.0, 270, Orientation::Portrait),
            Some(360)
        );
        // Squares count as portrait
        assert_eq!(
            orientation_rotation(500.0, 500.0, 0, Orientation::Portrait),
            None
        );
    }

    #[test]
    fn test_paper_size_parse() {
        assert_eq!("A4".parse::<PaperSize>().unwrap(), PaperSize::A4);
        assert_eq!("letter".parse::<PaperSize>().unwrap(), PaperSize::Letter);
        assert!("tabloid".parse::<PaperSize>().is_err());
    }

    proptest! {
        #[test]
        fn booklet_uses_full_duplex_sheets(count in 1usize..400) {
            let total = count + booklet_padding(count);
            prop_assert_eq!(total % 4, 0);

            let plan = booklet_plan(count);
            prop_assert_eq!(plan.len(), total / 4);
            prop_assert!(plan.iter().all(|sheet| sheet.back.is_some()));

            // Every real page appears exactly once
            let mut seen: Vec<usize> = plan
                .iter()
                .flat_map(|s| {
                    let back = s.back.unwrap();
                    [s.front.left, s.front.right, back.left, back.right]
                })
                .flatten()
                .collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..count).collect::<Vec<_>>());
        }

        #[test]
        fn placements_stay_inside_their_cells(
            pages in prop::collection::vec((50.0f32..2000.0, 50.0f32..2000.0), 1..5),
            four_up in any::<bool>(),
        ) {
            let (grid, w, h) = nup_layout(if four_up { 4 } else { 2 }, PaperSize::A4).unwrap();
            let cell_w = w / grid.cols as f32;
            let cell_h = h / grid.rows as f32;
            for p in place_on_sheet(&pages, w, h, grid, CELL_MARGIN) {
                let (src_w, src_h) = pages[p.slot];
                prop_assert!((p.width / p.height - src_w / src_h).abs() < 1e-2 * (src_w / src_h));
                let col = (p.slot as u32 % grid.cols) as f32;
                let row = (p.slot as u32 / grid.cols) as f32;
                let cell_x = col * cell_w;
                let cell_y = (grid.rows as f32 - 1.0 - row) * cell_h;
                prop_assert!(p.x >= cell_x - 1e-3 && p.x + p.width <= cell_x + cell_w + 1e-3);
                prop_assert!(p.y >= cell_y - 1e-3 && p.y + p.height <= cell_y + cell_h + 1e-3);
            }
        }
    }
}
