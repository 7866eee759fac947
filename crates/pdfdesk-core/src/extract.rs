//! Positioned text extraction
//!
//! Walks each page's content stream, tracking the graphics and text state
//! well enough to place every text-showing operation in user space. One run
//! is emitted per `Tj`, `TJ`, `'` or `"`, in stream order. Form XObjects
//! drawn with `Do` are scanned where they are drawn.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{inherited_attribute, resolve, SourceDocument};
use crate::error::{PdfDeskError, Result};

/// Glyph width assumed when a font carries no metrics, in 1/1000 em
const DEFAULT_GLYPH_WIDTH: f32 = 500.0;

/// Widest `bfrange` accepted from a ToUnicode CMap; a code space is at
/// most two bytes
const MAX_BFRANGE_SPAN: u32 = 0xFFFF;

/// Deepest chain of Form XObjects followed from a page
const MAX_FORM_DEPTH: usize = 8;

/// A text-showing operation placed on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedTextRun {
    pub text: String,
    /// Baseline origin, PDF user space
    pub x: f32,
    pub y: f32,
    pub width: f32,
    /// Approximate glyph box height (the rendered font size)
    pub height: f32,
    pub font_name: String,
}

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `a` then `b`, in PDF row-vector order
fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
        a[4] * b[0] + a[5] * b[2] + b[4],
        a[4] * b[1] + a[5] * b[3] + b[5],
    ]
}

fn translation(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// Metrics and decoding for one font resource
#[derive(Debug, Default)]
struct FontInfo {
    base_font: String,
    two_byte: bool,
    first_char: u32,
    widths: Vec<f32>,
    cid_widths: HashMap<u32, f32>,
    default_width: f32,
    to_unicode: HashMap<u32, String>,
}

impl FontInfo {
    fn load(doc: &Document, font: &Dictionary) -> Self {
        let name = |dict: &Dictionary, key: &[u8]| {
            dict.get(key)
                .ok()
                .and_then(|o| resolve(doc, o).as_name().ok())
                .map(|n| String::from_utf8_lossy(n).into_owned())
        };
        let number = |dict: &Dictionary, key: &[u8]| {
            dict.get(key)
                .ok()
                .and_then(|o| resolve(doc, o).as_float().ok())
        };

        let mut info = FontInfo {
            base_font: name(font, b"BaseFont").unwrap_or_default(),
            two_byte: name(font, b"Subtype").as_deref() == Some("Type0"),
            default_width: DEFAULT_GLYPH_WIDTH,
            ..Default::default()
        };

        if info.two_byte {
            let descendant = font
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .and_then(|fonts| fonts.first())
                .and_then(|o| resolve(doc, o).as_dict().ok());
            if let Some(cid_font) = descendant {
                info.default_width = number(cid_font, b"DW").unwrap_or(1000.0);
                if let Some(w) = cid_font
                    .get(b"W")
                    .ok()
                    .and_then(|o| resolve(doc, o).as_array().ok())
                {
                    info.cid_widths = parse_cid_widths(doc, w);
                }
            }
        } else {
            info.first_char = number(font, b"FirstChar").unwrap_or(0.0) as u32;
            info.widths = font
                .get(b"Widths")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .map(|arr| {
                    arr.iter()
                        .map(|w| resolve(doc, w).as_float().unwrap_or(0.0))
                        .collect()
                })
                .unwrap_or_default();
            if let Some(missing) = font
                .get(b"FontDescriptor")
                .ok()
                .and_then(|o| resolve(doc, o).as_dict().ok())
                .and_then(|d| number(d, b"MissingWidth"))
            {
                info.default_width = missing;
            }
        }

        if let Some(cmap) = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|o| resolve(doc, o).as_stream().ok())
        {
            let content = cmap
                .decompressed_content()
                .unwrap_or_else(|_| cmap.content.clone());
            info.to_unicode = parse_to_unicode(&content);
        }
        info
    }

    fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                    [single] => *single as u32,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| b as u32).collect()
        }
    }

    fn glyph_width(&self, code: u32) -> f32 {
        if self.two_byte {
            return self
                .cid_widths
                .get(&code)
                .copied()
                .unwrap_or(self.default_width);
        }
        code.checked_sub(self.first_char)
            .and_then(|i| self.widths.get(i as usize))
            .copied()
            .filter(|w| *w > 0.0)
            .unwrap_or(self.default_width)
    }

    /// Advance in text space units for `bytes` at size 1
    fn advance(&self, bytes: &[u8]) -> f32 {
        self.codes(bytes)
            .into_iter()
            .map(|c| self.glyph_width(c))
            .sum::<f32>()
            / 1000.0
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if !self.to_unicode.is_empty() {
            return self
                .codes(bytes)
                .into_iter()
                .map(|code| {
                    self.to_unicode.get(&code).cloned().unwrap_or_else(|| {
                        char::from_u32(code).map(String::from).unwrap_or_default()
                    })
                })
                .collect();
        }
        decode_bytes(bytes)
    }
}

/// UTF-8, then BOM-marked UTF-16BE, then Latin-1
fn decode_bytes(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&units) {
            return s;
        }
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    bytes.iter().map(|&b| b as char).collect()
}

fn parse_cid_widths(doc: &Document, w: &[Object]) -> HashMap<u32, f32> {
    let mut widths = HashMap::new();
    let mut i = 0;
    while i < w.len() {
        let first = resolve(doc, &w[i]).as_float().unwrap_or(0.0) as u32;
        match w.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, value) in list.iter().enumerate() {
                    if let Ok(width) = resolve(doc, value).as_float() {
                        widths.insert(first + offset as u32, width);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let last = last.as_float().unwrap_or(0.0) as u32;
                let width = w
                    .get(i + 2)
                    .and_then(|o| resolve(doc, o).as_float().ok())
                    .unwrap_or(0.0);
                for cid in first..=last.max(first) {
                    widths.insert(cid, width);
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

/// Hex tokens inside `<...>` from a CMap section body
fn hex_tokens(body: &str) -> Vec<Vec<u8>> {
    let mut tokens = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start + 1..].find('>') else {
            break;
        };
        let hex: String = rest[start + 1..start + 1 + len]
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect();
        let bytes = (0..hex.len() / 2)
            .filter_map(|i| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok())
            .collect();
        tokens.push(bytes);
        rest = &rest[start + 1 + len + 1..];
    }
    tokens
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

fn utf16_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => *single as u16,
            _ => 0,
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// `bfchar` pairs and simple `bfrange` triples from a ToUnicode CMap
fn parse_to_unicode(cmap: &[u8]) -> HashMap<u32, String> {
    let text = String::from_utf8_lossy(cmap);
    let mut map = HashMap::new();

    for section in text.split("beginbfchar").skip(1) {
        let body = section.split("endbfchar").next().unwrap_or_default();
        for pair in hex_tokens(body).chunks_exact(2) {
            map.insert(code_of(&pair[0]), utf16_string(&pair[1]));
        }
    }

    for section in text.split("beginbfrange").skip(1) {
        let body = section.split("endbfrange").next().unwrap_or_default();
        for line in body.lines() {
            // Array destinations are skipped
            if line.contains('[') {
                continue;
            }
            let tokens = hex_tokens(line);
            if let [lo, hi, dst] = tokens.as_slice() {
                let (lo, hi) = (code_of(lo), code_of(hi));
                if hi < lo || hi - lo > MAX_BFRANGE_SPAN {
                    debug!("Ignoring bfrange {:#x}..{:#x}", lo, hi);
                    continue;
                }
                let base = utf16_string(dst);
                let Some(first) = base.chars().last() else {
                    continue;
                };
                let prefix: String = base.chars().take(base.chars().count() - 1).collect();
                for (offset, code) in (lo..=hi).enumerate() {
                    let Some(c) = (first as u32)
                        .checked_add(offset as u32)
                        .and_then(char::from_u32)
                    else {
                        continue;
                    };
                    map.insert(code, format!("{}{}", prefix, c));
                }
            }
        }
    }
    map
}

#[derive(Debug, Clone)]
struct TextState {
    font: Option<Vec<u8>>,
    size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    rise: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            size: 0.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            rise: 0.0,
        }
    }
}

struct PageScanner<'a> {
    doc: &'a Document,
    /// Resources of the content stream being scanned
    resources: Option<&'a Dictionary>,
    fonts: HashMap<Vec<u8>, FontInfo>,
    /// Form XObjects currently being scanned, outermost first
    forms: Vec<ObjectId>,
    ctm: Matrix,
    ctm_stack: Vec<(Matrix, TextState)>,
    tm: Matrix,
    tlm: Matrix,
    state: TextState,
    runs: Vec<PositionedTextRun>,
}

impl<'a> PageScanner<'a> {
    fn new(doc: &'a Document, page_id: ObjectId) -> Self {
        let resources = inherited_attribute(doc, page_id, b"Resources")
            .and_then(|r| resolve(doc, r).as_dict().ok());
        Self {
            doc,
            resources,
            fonts: HashMap::new(),
            forms: Vec::new(),
            ctm: IDENTITY,
            ctm_stack: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            state: TextState::default(),
            runs: Vec::new(),
        }
    }

    fn font(&mut self) -> &FontInfo {
        let key = self.state.font.clone().unwrap_or_default();
        let doc = self.doc;
        let resources = self.resources;
        self.fonts.entry(key.clone()).or_insert_with(|| {
            resources
                .and_then(|r| r.get(b"Font").ok())
                .and_then(|f| resolve(doc, f).as_dict().ok())
                .and_then(|fonts| fonts.get(&key).ok())
                .and_then(|f| resolve(doc, f).as_dict().ok())
                .map(|f| FontInfo::load(doc, f))
                .unwrap_or_else(|| FontInfo {
                    default_width: DEFAULT_GLYPH_WIDTH,
                    ..Default::default()
                })
        })
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translation(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn numbers(operands: &[Object]) -> Vec<f32> {
        operands
            .iter()
            .map(|o| o.as_float().unwrap_or(0.0))
            .collect()
    }

    fn run(&mut self, operator: &str, operands: &[Object]) {
        let n = Self::numbers(operands);
        match (operator, n.as_slice()) {
            ("q", _) => self.ctm_stack.push((self.ctm, self.state.clone())),
            ("Q", _) => {
                if let Some((ctm, state)) = self.ctm_stack.pop() {
                    self.ctm = ctm;
                    self.state = state;
                }
            }
            ("cm", &[a, b, c, d, e, f]) => self.ctm = multiply(&[a, b, c, d, e, f], &self.ctm),
            ("BT", _) => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            ("Tf", _) => {
                self.state.font = operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .map(<[u8]>::to_vec);
                self.state.size = operands
                    .get(1)
                    .and_then(|o| o.as_float().ok())
                    .unwrap_or(0.0);
            }
            ("TL", &[leading]) => self.state.leading = leading,
            ("Tc", &[spacing]) => self.state.char_spacing = spacing,
            ("Tw", &[spacing]) => self.state.word_spacing = spacing,
            ("Tz", &[scale]) => self.state.horizontal_scale = scale / 100.0,
            ("Ts", &[rise]) => self.state.rise = rise,
            ("Td", &[tx, ty]) => self.next_line(tx, ty),
            ("TD", &[tx, ty]) => {
                self.state.leading = -ty;
                self.next_line(tx, ty);
            }
            ("Tm", &[a, b, c, d, e, f]) => {
                self.tlm = [a, b, c, d, e, f];
                self.tm = self.tlm;
            }
            ("T*", _) => self.next_line(0.0, -self.state.leading),
            ("Tj", _) => {
                if let Some(s @ Object::String(..)) = operands.first() {
                    self.show(std::slice::from_ref(s));
                }
            }
            ("'", _) => {
                self.next_line(0.0, -self.state.leading);
                if let Some(s @ Object::String(..)) = operands.first() {
                    self.show(std::slice::from_ref(s));
                }
            }
            ("\"", _) => {
                if let [aw, ac, s @ Object::String(..)] = operands {
                    self.state.word_spacing = aw.as_float().unwrap_or(0.0);
                    self.state.char_spacing = ac.as_float().unwrap_or(0.0);
                    self.next_line(0.0, -self.state.leading);
                    self.show(std::slice::from_ref(s));
                }
            }
            ("TJ", _) => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show(items);
                }
            }
            ("Do", _) => {
                if let Some(name) = operands.first().and_then(|o| o.as_name().ok()) {
                    self.scan_form(name);
                }
            }
            _ => {}
        }
    }

    /// Scan a Form XObject's content in place of its `Do`
    ///
    /// The form runs under the current CTM concatenated with its `/Matrix`,
    /// with its own `/Resources` or the enclosing ones when it has none.
    fn scan_form(&mut self, name: &[u8]) {
        let doc = self.doc;
        let Some(id) = self
            .resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|x| resolve(doc, x).as_dict().ok())
            .and_then(|x| x.get(name).ok())
            .and_then(|x| x.as_reference().ok())
        else {
            return;
        };
        if self.forms.contains(&id) || self.forms.len() >= MAX_FORM_DEPTH {
            debug!("Skipping nested form {:?}", id);
            return;
        }
        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            return;
        };
        let is_form = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map_or(false, |subtype| subtype == b"Form");
        if !is_form {
            return;
        }

        let bytes = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let content = match Content::decode(&bytes) {
            Ok(content) => content,
            Err(e) => {
                debug!("Form {:?} content unreadable: {}", id, e);
                return;
            }
        };
        let matrix = match stream.dict.get(b"Matrix").and_then(Object::as_array) {
            Ok(values) if values.len() == 6 => {
                let n = Self::numbers(values);
                [n[0], n[1], n[2], n[3], n[4], n[5]]
            }
            _ => IDENTITY,
        };
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve(doc, r).as_dict().ok());

        let saved = (self.ctm, self.tm, self.tlm, self.state.clone());
        let outer_resources = self.resources;
        let outer_fonts = form_resources.map(|_| std::mem::take(&mut self.fonts));
        let outer_stack = self.ctm_stack.len();

        self.ctm = multiply(&matrix, &self.ctm);
        self.resources = form_resources.or(outer_resources);
        self.forms.push(id);
        for op in &content.operations {
            self.run(&op.operator, &op.operands);
        }
        self.forms.pop();

        self.ctm_stack.truncate(outer_stack);
        self.resources = outer_resources;
        if let Some(fonts) = outer_fonts {
            self.fonts = fonts;
        }
        (self.ctm, self.tm, self.tlm, self.state) = saved;
    }

    /// Emit one run for a sequence of strings and kerning adjustments
    fn show(&mut self, items: &[Object]) {
        let origin = multiply(&self.tm, &self.ctm);
        let size = self.state.size;
        let (char_spacing, word_spacing, h_scale) = (
            self.state.char_spacing,
            self.state.word_spacing,
            self.state.horizontal_scale,
        );
        let rise = self.state.rise;
        let font = self.font();
        let base_font = font.base_font.clone();

        let mut text = String::new();
        let mut advance = 0.0f32;
        for item in items {
            match item {
                Object::String(bytes, _) => {
                    text.push_str(&font.decode(bytes));
                    let codes = font.codes(bytes);
                    let spaces = if font.two_byte {
                        0
                    } else {
                        codes.iter().filter(|&&c| c == 32).count()
                    };
                    advance += (font.advance(bytes) * size
                        + char_spacing * codes.len() as f32
                        + word_spacing * spaces as f32)
                        * h_scale;
                }
                other => {
                    if let Ok(adjust) = other.as_float() {
                        advance -= adjust / 1000.0 * size * h_scale;
                    }
                }
            }
        }

        let x_scale = (origin[0] * origin[0] + origin[1] * origin[1]).sqrt();
        let y_scale = (origin[2] * origin[2] + origin[3] * origin[3]).sqrt();
        if !text.is_empty() {
            self.runs.push(PositionedTextRun {
                text,
                x: origin[4] + rise * origin[2],
                y: origin[5] + rise * origin[3],
                width: advance * x_scale,
                height: size * y_scale,
                font_name: base_font,
            });
        }
        self.tm = multiply(&translation(advance, 0.0), &self.tm);
    }
}

/// Runs on one page, in content stream order
pub fn page_text_runs(doc: &Document, page_id: ObjectId) -> Result<Vec<PositionedTextRun>> {
    let content = doc
        .get_page_content(page_id)
        .map_err(|e| PdfDeskError::Operation(format!("page content unreadable: {}", e)))?;
    let content = Content::decode(&content)?;

    let mut scanner = PageScanner::new(doc, page_id);
    for op in &content.operations {
        scanner.run(&op.operator, &op.operands);
    }
    Ok(scanner.runs)
}

/// Runs for every page of `source`
pub fn extract_text_runs(source: &SourceDocument) -> Result<Vec<Vec<PositionedTextRun>>> {
    let doc = source.document();
    source
        .pages()
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let runs = page_text_runs(doc, page.id)?;
            debug!("Page {}: {} text runs", index + 1, runs.len());
            Ok(runs)
        })
        .collect()
}
