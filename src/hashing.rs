// ============================================
// catalogsetup - hashing.rs
// ============================================
// The integrity record the update service checks before trusting a custom
// catalog. It is stored as one REG_SZ value:
//
//   [{"CatalogHashValues": {"Key": "C:\\lab\\catalog.xml", "Value": "<digest>"}}]
//
// Digest = SHA-384 over the file bytes, base64 (standard alphabet) with
// the `=` padding removed.
//
// The service has always been fed JSON in Python's json.dumps layout
// (", " and ": " separators, non-ASCII escaped as \uXXXX), so we write
// exactly that.
// ============================================

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD_NO_PAD};
use serde::Serialize;
use sha2::{Digest, Sha384};

// ============================================
// DIGEST
// ============================================

/// SHA-384 of everything readable from `reader`, base64 without padding.
pub fn digest_reader(mut reader: impl io::Read) -> io::Result<String> {
    let mut hasher = Sha384::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(BASE64_STANDARD_NO_PAD.encode(hasher.finalize()))
}

/// SHA-384 digest of a file's full content
pub fn digest_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    digest_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read {} for hashing", path.display()))
}

// ============================================
// HASH RECORD
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogHashValue {
    /// Absolute path of the catalog XML the client will read
    pub key: String,
    /// Unpadded base64 SHA-384
    pub value: String,
}

/// One entry of the CustomCatalogHashValues list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashRecord {
    #[serde(rename = "CatalogHashValues")]
    pub catalog_hash_values: CatalogHashValue,
}

impl HashRecord {
    pub fn new(key: impl Into<String>, digest: impl Into<String>) -> Self {
        HashRecord {
            catalog_hash_values: CatalogHashValue {
                key: key.into(),
                value: digest.into(),
            },
        }
    }

    /// Hash a catalog file. The key is the path exactly as given, so pass
    /// the absolute path the client settings will point at.
    pub fn from_file(path: &Path) -> Result<Self> {
        let digest = digest_file(path)?;
        tracing::info!(path = %path.display(), digest = %digest, "catalog hashed");
        Ok(HashRecord::new(path.to_string_lossy(), digest))
    }

    pub fn digest(&self) -> &str {
        &self.catalog_hash_values.value
    }

    /// The registry payload: a one-element JSON list.
    pub fn to_registry_json(&self) -> Result<String> {
        let mut out = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, DumpsFormatter);
        [self]
            .serialize(&mut serializer)
            .context("Failed to serialize catalog hash record")?;
        String::from_utf8(out).context("Catalog hash record is not valid UTF-8")
    }
}

// ============================================
// JSON LAYOUT
// ============================================

/// Compact JSON with ", " / ": " separators and ASCII-only strings.
struct DumpsFormatter;

impl serde_json::ser::Formatter for DumpsFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

// ============================================
// TESTS
// ============================================
