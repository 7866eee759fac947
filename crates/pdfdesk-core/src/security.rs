//! Password protection with the standard security handler
//!
//! Revision 3, 128-bit RC4. The same password serves as user and owner
//! password and every permission is granted, so the password only gates
//! opening the file.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use md5::{Digest, Md5};
use tracing::info;

use crate::document::SourceDocument;
use crate::error::{PdfDeskError, Result};

/// Password padding string from the standard security handler
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const KEY_LENGTH: usize = 16;

/// Every permission bit set; bits 1-2 must be clear
const ALL_PERMISSIONS: i32 = -4;

struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (i, v) in s.iter_mut().enumerate() {
            *v = i as u8;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Self { s, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
            *byte ^= self.s[k as usize];
        }
    }
}

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    Rc4::new(key).apply(&mut out);
    out
}

/// RC4 applied once with `key` and then 19 more times with `key ^ i`
fn rc4_rounds(key: &[u8], data: &[u8]) -> Vec<u8> {
    (1..=19u8).fold(rc4(key, data), |acc, i| {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        rc4(&round_key, &acc)
    })
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

/// MD5, then 50 rehashes of the first `KEY_LENGTH` bytes
fn stretched_md5(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let mut hash = hasher.finalize().to_vec();
    for _ in 0..50 {
        hash = Md5::digest(&hash[..KEY_LENGTH]).to_vec();
    }
    hash.truncate(KEY_LENGTH);
    hash
}

fn owner_entry(owner_password: &[u8], user_password: &[u8]) -> Vec<u8> {
    let key = stretched_md5(&[&pad_password(owner_password)]);
    rc4_rounds(&key, &pad_password(user_password))
}

fn file_key(user_password: &[u8], owner: &[u8], permissions: i32, file_id: &[u8]) -> Vec<u8> {
    stretched_md5(&[
        &pad_password(user_password),
        owner,
        &permissions.to_le_bytes(),
        file_id,
    ])
}

fn user_entry(key: &[u8], file_id: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(file_id);
    let mut entry = rc4_rounds(key, &hasher.finalize());
    entry.extend_from_slice(&[0u8; 16]);
    entry
}

fn object_key(key: &[u8], (num, gen): ObjectId) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(&num.to_le_bytes()[..3]);
    hasher.update(gen.to_le_bytes());
    let hash = hasher.finalize();
    hash[..(key.len() + 5).min(16)].to_vec()
}

fn encrypt_strings(object: &mut Object, key: &[u8]) {
    match object {
        Object::String(bytes, format) => {
            *bytes = rc4(key, bytes);
            *format = StringFormat::Hexadecimal;
        }
        Object::Array(items) => items.iter_mut().for_each(|item| encrypt_strings(item, key)),
        Object::Dictionary(dict) => encrypt_dict(dict, key),
        Object::Stream(stream) => {
            encrypt_dict(&mut stream.dict, key);
            stream.content = rc4(key, &stream.content);
        }
        _ => {}
    }
}

fn encrypt_dict(dict: &mut Dictionary, key: &[u8]) {
    for (_, value) in dict.iter_mut() {
        encrypt_strings(value, key);
    }
}

fn is_xref_stream(object: &Object) -> bool {
    object
        .as_stream()
        .and_then(|s| s.dict.get(b"Type"))
        .and_then(Object::as_name)
        .map(|name| name == b"XRef")
        .unwrap_or(false)
}

/// Encrypt the document so that `password` is needed to open it
pub fn protect(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(PdfDeskError::Operation("password must not be empty".into()));
    }
    let mut doc = SourceDocument::load(bytes)?.into_document();
    encrypt_document(&mut doc, password.as_bytes(), Md5::digest(bytes).to_vec());

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfDeskError::Operation(format!("Failed to save PDF: {}", e)))?;
    info!("Protected document ({} bytes)", buffer.len());
    Ok(buffer)
}

fn encrypt_document(doc: &mut Document, password: &[u8], file_id: Vec<u8>) {
    doc.prune_objects();
    // Streams must be compressed before encryption, never after
    doc.compress();

    let owner = owner_entry(password, password);
    let key = file_key(password, &owner, ALL_PERMISSIONS, &file_id);
    let user = user_entry(&key, &file_id);

    doc.objects.retain(|_, object| !is_xref_stream(object));
    for (&id, object) in doc.objects.iter_mut() {
        encrypt_strings(object, &object_key(&key, id));
    }

    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 2,
        "R" => 3,
        "Length" => (KEY_LENGTH * 8) as i64,
        "O" => Object::String(owner, StringFormat::Hexadecimal),
        "U" => Object::String(user, StringFormat::Hexadecimal),
        "P" => ALL_PERMISSIONS as i64,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    doc.trailer.set(
        "ID",
        vec![
            Object::String(file_id.clone(), StringFormat::Hexadecimal),
            Object::String(file_id, StringFormat::Hexadecimal),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::letter_pdf;
    use pretty_assertions::assert_eq;

    /// Encrypted copy of a one-page document, inspected before serialization
    fn encrypted(password: &[u8]) -> Document {
        let mut doc = Document::load_mem(&letter_pdf(1, "Secret")).unwrap();
        encrypt_document(&mut doc, password, Md5::digest(b"file").to_vec());
        doc
    }

    fn encrypt_dictionary(doc: &Document) -> Dictionary {
        let id = doc.trailer.get(b"Encrypt").unwrap().as_reference().unwrap();
        doc.get_object(id).unwrap().as_dict().unwrap().clone()
    }

    fn string_entry(dict: &Dictionary, key: &[u8]) -> Vec<u8> {
        match dict.get(key).unwrap() {
            Object::String(bytes, _) => bytes.clone(),
            other => panic!("expected string, got {:?}", other),
        }
    }

    fn first_file_id(doc: &Document) -> Vec<u8> {
        match &doc.trailer.get(b"ID").unwrap().as_array().unwrap()[0] {
            Object::String(bytes, _) => bytes.clone(),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_rc4_known_vector() {
        assert_eq!(
            rc4(b"Key", b"Plaintext"),
            vec![0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]
        );
    }

    #[test]
    fn test_pad_password_truncates_and_fills() {
        let padded = pad_password(b"abc");
        assert_eq!(&padded[..3], b"abc");
        assert_eq!(&padded[3..], &PADDING[..29]);
        assert_eq!(pad_password(&[b'x'; 40]), [b'x'; 32]);
    }

    #[test]
    fn test_protected_document_needs_password_to_load() {
        let out = protect(&letter_pdf(1, "Secret"), "hunter2").unwrap();
        assert!(matches!(SourceDocument::load(&out), Err(PdfDeskError::Load(_))));
    }

    #[test]
    fn test_encrypt_dictionary_fields() {
        let doc = encrypted(b"hunter2");
        let dict = encrypt_dictionary(&doc);

        assert_eq!(dict.get(b"Filter").unwrap().as_name().unwrap(), b"Standard");
        assert_eq!(dict.get(b"V").unwrap().as_i64().unwrap(), 2);
        assert_eq!(dict.get(b"R").unwrap().as_i64().unwrap(), 3);
        assert_eq!(dict.get(b"Length").unwrap().as_i64().unwrap(), 128);
        assert_eq!(dict.get(b"P").unwrap().as_i64().unwrap(), -4);
        assert_eq!(string_entry(&dict, b"O").len(), 32);
        assert_eq!(string_entry(&dict, b"U").len(), 32);
    }

    #[test]
    fn test_user_password_authenticates() {
        let doc = encrypted(b"hunter2");
        let dict = encrypt_dictionary(&doc);
        let owner = string_entry(&dict, b"O");
        let id = first_file_id(&doc);

        let right = file_key(b"hunter2", &owner, ALL_PERMISSIONS, &id);
        let wrong = file_key(b"hunter3", &owner, ALL_PERMISSIONS, &id);
        let stored = string_entry(&dict, b"U");
        assert_eq!(user_entry(&right, &id)[..16], stored[..16]);
        assert_ne!(user_entry(&wrong, &id)[..16], stored[..16]);
    }

    #[test]
    fn test_content_decrypts_with_derived_key() {
        let doc = encrypted(b"hunter2");
        let dict = encrypt_dictionary(&doc);
        let id = first_file_id(&doc);
        let key = file_key(b"hunter2", &string_entry(&dict, b"O"), ALL_PERMISSIONS, &id);

        let page_id = *doc.get_pages().values().next().unwrap();
        let contents_id = doc
            .get_object(page_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Contents")
            .unwrap()
            .as_reference()
            .unwrap();
        let stream = doc.get_object(contents_id).unwrap().as_stream().unwrap();

        let mut plain = stream.clone();
        plain.content = rc4(&object_key(&key, contents_id), &stream.content);
        let decoded = plain
            .decompressed_content()
            .unwrap_or_else(|_| plain.content.clone());
        assert!(String::from_utf8_lossy(&decoded).contains("Secret-1"));
        assert!(!String::from_utf8_lossy(&stream.content).contains("Secret-1"));
    }

    #[test]
    fn test_empty_password_is_rejected() {
        assert!(matches!(
            protect(&letter_pdf(1, "Open"), ""),
            Err(PdfDeskError::Operation(_))
        ));
    }
}
