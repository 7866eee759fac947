//! Layout-preserving translation
//!
//! Text runs are extracted with their positions, sent page by page to a
//! [`TextTranslator`], and the translations are drawn back over the original
//! glyphs after erasing them with an opaque white box.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::document::{save_document, SourceDocument};
use crate::error::Result;
use crate::extract::{extract_text_runs, PositionedTextRun};
use crate::fonts::TrueTypeFont;
use crate::overlay::{PageOverlay, Rgb, TextStyle};

/// Size used when a run reports no usable height
pub const FALLBACK_FONT_SIZE: f32 = 12.0;

pub const DEFAULT_TARGET_LANGUAGE: &str = "Hindi";

/// Runs of one page and their translations, index-aligned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageTranslation {
    pub runs: Vec<PositionedTextRun>,
    pub translated: Vec<String>,
}

impl PageTranslation {
    /// Runs with no translation to pair with; reconstruction leaves them as is
    pub fn unpaired_runs(&self) -> usize {
        self.runs.len().saturating_sub(self.translated.len())
    }
}

/// Result of one translation request
///
/// `Fallback` carries the input strings unchanged and marks degraded output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated(Vec<String>),
    Fallback(Vec<String>),
}

impl TranslationOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, TranslationOutcome::Fallback(_))
    }

    pub fn into_strings(self) -> Vec<String> {
        match self {
            TranslationOutcome::Translated(s) | TranslationOutcome::Fallback(s) => s,
        }
    }
}

/// Parse a model reply that should hold a JSON array of `originals.len()`
/// strings, possibly wrapped in a markdown code fence
pub fn parse_translation_response(raw: &str, originals: &[String]) -> TranslationOutcome {
    let cleaned = raw.replace("```json", "").replace("```", "");
    match serde_json::from_str::<Vec<String>>(cleaned.trim()) {
        Ok(list) if list.len() == originals.len() => TranslationOutcome::Translated(list),
        Ok(list) => {
            warn!(
                "Translation length mismatch: expected {}, got {}",
                originals.len(),
                list.len()
            );
            TranslationOutcome::Fallback(originals.to_vec())
        }
        Err(e) => {
            warn!("Unparsable translation response: {}", e);
            TranslationOutcome::Fallback(originals.to_vec())
        }
    }
}

/// External text-to-text translation service
#[async_trait]
pub trait TextTranslator: Send + Sync {
    /// Translate `texts` into `target_lang`, returning exactly one string per
    /// input. Failures are reported as [`TranslationOutcome::Fallback`].
    async fn translate(&self, texts: &[String], target_lang: &str) -> TranslationOutcome;
}

/// Returns its input unchanged; installed when no credential is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTranslator;

#[async_trait]
impl TextTranslator for EchoTranslator {
    async fn translate(&self, texts: &[String], _target_lang: &str) -> TranslationOutcome {
        TranslationOutcome::Fallback(texts.to_vec())
    }
}

/// Digits and number punctuation only, e.g. page numbers or figures
fn is_numeric(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | '%') || c.is_whitespace())
}

/// Whether a translated string should be drawn over its run
pub fn should_redraw(translated: &str) -> bool {
    !translated.trim().is_empty() && !is_numeric(translated)
}

/// Translate every page of `source`, one request per page
///
/// Blank runs are not sent; their slots keep the original string so that
/// `translated[i]` always lines up with `runs[i]`.
pub async fn translate_document(
    source: &SourceDocument,
    translator: &dyn TextTranslator,
    target_lang: &str,
    cancel: &CancellationToken,
) -> Result<Vec<PageTranslation>> {
    let pages = extract_text_runs(source)?;
    let mut result = Vec::with_capacity(pages.len());

    for (index, runs) in pages.into_iter().enumerate() {
        cancel.check()?;

        let texts: Vec<String> = runs
            .iter()
            .filter(|run| !run.text.trim().is_empty())
            .map(|run| run.text.clone())
            .collect();

        let mut translations = if texts.is_empty() {
            Vec::new()
        } else {
            let outcome = translator.translate(&texts, target_lang).await;
            if outcome.is_fallback() {
                warn!("Page {}: translation fell back to original text", index + 1);
            }
            outcome.into_strings()
        }
        .into_iter();

        let translated = runs
            .iter()
            .map(|run| {
                if run.text.trim().is_empty() {
                    run.text.clone()
                } else {
                    translations.next().unwrap_or_else(|| run.text.clone())
                }
            })
            .collect();

        debug!("Page {}: {} strings translated", index + 1, texts.len());
        result.push(PageTranslation { runs, translated });
    }
    Ok(result)
}

/// Erase each translatable run and draw its translation in place
///
/// Without a usable `font` the runs are still erased but no text is drawn.
pub fn reconstruct(
    source_bytes: &[u8],
    pages: &[PageTranslation],
    font: Option<&TrueTypeFont>,
) -> Result<Vec<u8>> {
    let source = SourceDocument::load(source_bytes)?;
    let page_ids: Vec<_> = source.pages().iter().map(|p| p.id).collect();
    let mut doc = source.into_document();

    let drawn_texts = pages.iter().flat_map(|page| {
        page.translated
            .iter()
            .map(String::as_str)
            .filter(|t| should_redraw(t))
    });
    let font = match font.map(|f| f.embed(&mut doc, drawn_texts).map(|id| (f, id))) {
        Some(Ok(embedded)) => Some(embedded),
        Some(Err(e)) => {
            warn!("Substitute font unavailable, erasing only: {}", e);
            None
        }
        None => {
            warn!("No substitute font configured, erasing only");
            None
        }
    };

    let mut redrawn = 0usize;
    let mut untouched = 0usize;
    for (index, page) in pages.iter().enumerate() {
        let Some(&page_id) = page_ids.get(index) else {
            let dropped: usize = pages[index..].iter().map(|p| p.runs.len()).sum();
            warn!(
                "Translations for {} pages past page {} have no matching page; {} runs skipped",
                pages.len() - index,
                page_ids.len(),
                dropped
            );
            untouched += dropped;
            break;
        };
        if page.runs.len() != page.translated.len() {
            warn!(
                "Page {}: {} runs but {} translations; {} runs left untouched",
                index + 1,
                page.runs.len(),
                page.translated.len(),
                page.unpaired_runs()
            );
            untouched += page.unpaired_runs();
        }

        let mut overlay = PageOverlay::new(&mut doc, page_id);
        for (run, text) in page.runs.iter().zip(&page.translated) {
            if !should_redraw(text) {
                continue;
            }
            let size = match run.height.abs() {
                h if h > 0.0 => h,
                _ => FALLBACK_FONT_SIZE,
            };
            overlay.fill_rect(run.x, run.y, run.width, size, Rgb::WHITE);

            if let Some((font, font_id)) = font {
                match font.encode(text) {
                    Ok(glyphs) => overlay.draw_text(
                        glyphs,
                        font_id,
                        size,
                        run.x,
                        run.y,
                        TextStyle::default(),
                    ),
                    Err(e) => warn!("Skipping text draw: {}", e),
                }
            }
            redrawn += 1;
        }
        overlay.finish()?;
    }

    if untouched > 0 {
        warn!("Reconstructed {} text runs, {} left untouched", redrawn, untouched);
    } else {
        info!("Reconstructed {} text runs", redrawn);
    }
    save_document(doc)
}

/// Extract, translate and reconstruct in one pass
pub async fn translate_pdf(
    bytes: &[u8],
    translator: &dyn TextTranslator,
    target_lang: &str,
    font: Option<&TrueTypeFont>,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let source = SourceDocument::load(bytes)?;
    info!(
        "Translating {} pages to {}",
        source.page_count(),
        target_lang
    );
    let pages = translate_document(&source, translator, target_lang, cancel).await?;
    cancel.check()?;
    reconstruct(bytes, &pages, font)
}
