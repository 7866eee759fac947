//! Page layout flows: N-up, resize, booklet and orientation
//!
//! Source pages are embedded as Form XObjects so their vector content
//! survives; [`crate::compositor`] decides where each one lands.

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::compositor::{
    booklet_plan, fit_centered, nup_layout, nup_sheets, orientation_rotation, place_on_sheet,
    BookletSide, Grid, Orientation, PaperSize, CELL_MARGIN, RESIZE_MARGIN,
};
use crate::document::{
    save_document, set_page_rotation, EmbeddedPage, OutputDocument, PageHandle, SourceDocument,
};
use crate::error::Result;

/// Place `n` source pages on each output sheet of `paper`
pub fn n_up(bytes: &[u8], n: u32, paper: PaperSize, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let (grid, sheet_width, sheet_height) = nup_layout(n, paper)?;
    let source = SourceDocument::load(bytes)?;
    let mut output = OutputDocument::new();
    let all: Vec<usize> = (0..source.page_count()).collect();
    let embedded = output.embed_pages(&source, &all)?;

    for (sheet_index, sheet) in nup_sheets(embedded.len(), grid.capacity()).iter().enumerate() {
        cancel.check()?;
        let pages: Vec<&EmbeddedPage> = sheet.iter().map(|&i| &embedded[i]).collect();
        let handle = output.add_page(sheet_width, sheet_height);
        draw_grid(&mut output, handle, &pages, sheet_width, sheet_height, grid, CELL_MARGIN)?;
        debug!("Sheet {}: pages {:?}", sheet_index + 1, sheet);
    }

    info!(
        "{}-up: {} pages onto {} sheets",
        n,
        source.page_count(),
        output.page_count()
    );
    output.save()
}

/// Fit every page onto a sheet of `paper`, centered and unrotated
pub fn resize(bytes: &[u8], paper: PaperSize, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let (width, height) = paper.dimensions();
    let source = SourceDocument::load(bytes)?;
    let mut output = OutputDocument::new();
    let all: Vec<usize> = (0..source.page_count()).collect();
    let single = Grid { cols: 1, rows: 1 };

    for page in output.embed_pages(&source, &all)? {
        cancel.check()?;
        let handle = output.add_page(width, height);
        draw_grid(&mut output, handle, &[&page], width, height, single, RESIZE_MARGIN)?;
    }
    output.save()
}

fn draw_grid(
    output: &mut OutputDocument,
    handle: PageHandle,
    pages: &[&EmbeddedPage],
    sheet_width: f32,
    sheet_height: f32,
    grid: Grid,
    margin: f32,
) -> Result<()> {
    let sizes: Vec<(f32, f32)> = pages.iter().map(|p| (p.width, p.height)).collect();
    for placement in place_on_sheet(&sizes, sheet_width, sheet_height, grid, margin) {
        output.draw_page(
            handle,
            pages[placement.slot],
            placement.x,
            placement.y,
            placement.scale,
        )?;
    }
    Ok(())
}

/// Impose pages for saddle-stitch printing on landscape sheets of `paper`
///
/// The page count is padded to a multiple of four with blanks; each physical
/// sheet yields a front and a back output page.
pub fn booklet(bytes: &[u8], paper: PaperSize, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let (sheet_width, sheet_height) = paper.landscape();
    let source = SourceDocument::load(bytes)?;
    let mut output = OutputDocument::new();
    let all: Vec<usize> = (0..source.page_count()).collect();
    let embedded = output.embed_pages(&source, &all)?;

    let plan = booklet_plan(source.page_count());
    for sheet in &plan {
        cancel.check()?;
        for side in std::iter::once(sheet.front).chain(sheet.back) {
            let handle = output.add_page(sheet_width, sheet_height);
            draw_side(&mut output, handle, &embedded, side, sheet_width, sheet_height)?;
        }
    }

    info!(
        "Booklet: {} pages onto {} sheets",
        source.page_count(),
        plan.len()
    );
    output.save()
}

fn draw_side(
    output: &mut OutputDocument,
    handle: PageHandle,
    embedded: &[EmbeddedPage],
    side: BookletSide,
    sheet_width: f32,
    sheet_height: f32,
) -> Result<()> {
    let half = sheet_width / 2.0;
    for (slot, cell_x) in [(side.left, 0.0), (side.right, half)] {
        let Some(page) = slot.and_then(|i| embedded.get(i)) else {
            continue;
        };
        let (x, y, _, _, scale) = fit_centered(
            (page.width, page.height),
            cell_x,
            0.0,
            half,
            sheet_height,
            CELL_MARGIN,
        );
        output.draw_page(handle, page, x, y, scale)?;
    }
    Ok(())
}

/// Quarter-turn every page whose displayed orientation differs from `target`
pub fn set_orientation(bytes: &[u8], target: Orientation) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    let changes: Vec<_> = source
        .pages()
        .iter()
        .filter_map(|page| {
            orientation_rotation(page.width(), page.height(), page.rotation, target)
                .map(|rotation| (page.id, rotation))
        })
        .collect();

    info!("Orientation: rotating {} of {} pages", changes.len(), source.page_count());
    let mut doc = source.into_document();
    for (page_id, rotation) in changes {
        set_page_rotation(&mut doc, page_id, rotation)?;
    }
    save_document(doc)
}
