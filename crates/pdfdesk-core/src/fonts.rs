//! Fonts for drawn text
//!
//! Standard 14 Helvetica faces cover Latin stamps (page numbers,
//! watermarks). Translated text needs a TrueType face embedded as a Type0
//! font with Identity-H encoding, glyph ids as character codes, and a
//! ToUnicode map so the output stays searchable.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use ttf_parser::{name_id, Face, GlyphId};

use crate::document::deflate;
use crate::error::{PdfDeskError, Result};

/// Advance widths for ASCII 32..=126, in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722, 722, 667,
    611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500,
    222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

const HELVETICA_BOLD_WIDTHS: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, 975, 722, 722, 722, 722, 667,
    611, 778, 722, 278, 556, 722, 611, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667,
    667, 611, 333, 278, 333, 584, 556, 333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556,
    278, 889, 611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

/// Width assumed for characters outside the ASCII table
const FALLBACK_WIDTH: u16 = 556;

const HELVETICA_ASCENT: f32 = 718.0;
const HELVETICA_DESCENT: f32 = -207.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
}

impl StandardFont {
    pub fn base_font(self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
        }
    }

    fn widths(self) -> &'static [u16; 95] {
        match self {
            StandardFont::Helvetica => &HELVETICA_WIDTHS,
            StandardFont::HelveticaBold => &HELVETICA_BOLD_WIDTHS,
        }
    }

    pub fn width_of(self, text: &str, size: f32) -> f32 {
        let units: u32 = text
            .chars()
            .map(|c| match c as u32 {
                code @ 32..=126 => self.widths()[(code - 32) as usize] as u32,
                _ => FALLBACK_WIDTH as u32,
            })
            .sum();
        units as f32 * size / 1000.0
    }

    /// Ascent to descent height at `size`
    pub fn height_at(self, size: f32) -> f32 {
        (HELVETICA_ASCENT - HELVETICA_DESCENT) / 1000.0 * size
    }

    /// WinAnsi bytes; characters outside Latin-1 become `?`
    pub fn encode(self, text: &str) -> Vec<u8> {
        text.chars()
            .map(|c| match c as u32 {
                code @ (0x20..=0x7E | 0xA0..=0xFF) => code as u8,
                _ => b'?',
            })
            .collect()
    }

    pub fn add_to(self, doc: &mut Document) -> ObjectId {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => self.base_font(),
            "Encoding" => "WinAnsiEncoding",
        })
    }
}

/// A TrueType face held in memory, validated on construction
#[derive(Debug, Clone)]
pub struct TrueTypeFont {
    data: Vec<u8>,
    units_per_em: f32,
}

impl TrueTypeFont {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let units_per_em = Face::parse(&data, 0)
            .map_err(|e| PdfDeskError::FontEmbed(e.to_string()))?
            .units_per_em() as f32;
        Ok(Self { data, units_per_em })
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| PdfDeskError::FontEmbed(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(data)
    }

    fn face(&self) -> Result<Face<'_>> {
        Face::parse(&self.data, 0).map_err(|e| PdfDeskError::FontEmbed(e.to_string()))
    }

    /// Glyph ids as big-endian pairs, the Identity-H code space
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let face = self.face()?;
        Ok(text
            .chars()
            .flat_map(|c| face.glyph_index(c).unwrap_or(GlyphId(0)).0.to_be_bytes())
            .collect())
    }

    pub fn width_of(&self, text: &str, size: f32) -> Result<f32> {
        let face = self.face()?;
        let units: u32 = text
            .chars()
            .filter_map(|c| face.glyph_index(c))
            .filter_map(|gid| face.glyph_hor_advance(gid))
            .map(u32::from)
            .sum();
        Ok(units as f32 * size / self.units_per_em)
    }

    /// Add a Type0 font covering the characters of `texts` to `doc`
    pub fn embed<'t>(
        &self,
        doc: &mut Document,
        texts: impl IntoIterator<Item = &'t str>,
    ) -> Result<ObjectId> {
        let face = self.face()?;
        let to_units = |v: f32| (v * 1000.0 / self.units_per_em).round() as i64;

        let mut used: BTreeMap<u16, char> = BTreeMap::new();
        for c in texts.into_iter().flat_map(str::chars) {
            if let Some(gid) = face.glyph_index(c) {
                used.entry(gid.0).or_insert(c);
            }
        }

        let base_font = face
            .names()
            .into_iter()
            .filter(|name| name.name_id == name_id::POST_SCRIPT_NAME)
            .find_map(|name| name.to_string())
            .map(|name| {
                name.chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                    .collect::<String>()
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "EmbeddedFont".to_string());

        let bbox = face.global_bounding_box();
        let ascent = to_units(face.ascender() as f32);
        let descent = to_units(face.descender() as f32);
        let cap_height = face
            .capital_height()
            .map(|h| to_units(h as f32))
            .unwrap_or(ascent);

        let font_file = Stream::new(
            dictionary! {
                "Length1" => self.data.len() as i64,
                "Filter" => "FlateDecode",
            },
            deflate(&self.data)?,
        );
        let font_file_id = doc.add_object(font_file);

        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(base_font.clone().into_bytes()),
            "Flags" => 4,
            "FontBBox" => vec![
                to_units(bbox.x_min as f32).into(),
                to_units(bbox.y_min as f32).into(),
                to_units(bbox.x_max as f32).into(),
                to_units(bbox.y_max as f32).into(),
            ],
            "ItalicAngle" => 0,
            "Ascent" => ascent,
            "Descent" => descent,
            "CapHeight" => cap_height,
            "StemV" => 80,
            "FontFile2" => font_file_id,
        });

        let widths: Vec<Object> = used
            .keys()
            .flat_map(|&gid| {
                let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
                [
                    Object::Integer(gid as i64),
                    Object::Array(vec![Object::Integer(to_units(advance))]),
                ]
            })
            .collect();

        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => Object::Name(base_font.clone().into_bytes()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "CIDToGIDMap" => "Identity",
            "DW" => 1000,
            "W" => widths,
        });

        let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(&used)));

        Ok(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(base_font.into_bytes()),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![cid_font_id.into()],
            "ToUnicode" => to_unicode_id,
        }))
    }
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, char>) -> Vec<u8> {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    let entries: Vec<_> = glyphs.iter().collect();
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for (gid, c) in chunk {
            let mut utf16 = [0u16; 2];
            let hex: String = c
                .encode_utf16(&mut utf16)
                .iter()
                .map(|unit| format!("{:04X}", unit))
                .collect();
            let _ = writeln!(cmap, "<{:04X}> <{}>", gid, hex);
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap.into_bytes()
}
