// ============================================
// catalogsetup - catalog_xml.rs
// ============================================
// Rewrites an expanded catalog so the update client reads every package
// from the catalog's own folder instead of the vendor download site:
//
//   <Manifest baseLocation="downloads.dell.com" ...>       -> baseLocation=""
//     <SoftwareComponent path="FOLDER123/XYZ/file.exe">    -> path="file.exe"
//
// Only SoftwareComponent elements in the catalog namespace are touched.
// The document is streamed event by event, so comments, ordering and all
// other attributes survive. Output is always UTF-8 with a declaration.
// ============================================

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use xml::attribute::Attribute;
use xml::name::Name;
use xml::reader::{ParserConfig, XmlEvent as ReaderEvent};
use xml::writer::{EmitterConfig, XmlEvent as WriterEvent};

/// Default namespace of a vendor catalog
pub const CATALOG_NAMESPACE: &str = "openmanage/cm/dm";

const COMPONENT_ELEMENT: &str = "SoftwareComponent";
const PATH_ATTRIBUTE: &str = "path";
const BASE_LOCATION_ATTRIBUTE: &str = "baseLocation";

/// What normalization changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    /// SoftwareComponent elements seen
    pub components: usize,
    /// Components whose path attribute was shortened
    pub rewritten: usize,
}

/// Last segment of a catalog path ("a/b/file.exe" -> "file.exe").
/// Backslashes count as separators too.
pub fn final_segment(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Normalize a catalog file in place.
pub fn normalize_catalog(path: &Path) -> Result<NormalizeStats> {
    let input = fs::read(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;

    let (output, stats) = normalize_bytes(&input)
        .with_context(|| format!("Failed to normalize catalog {}", path.display()))?;

    fs::write(path, output)
        .with_context(|| format!("Failed to write catalog {}", path.display()))?;

    tracing::info!(
        path = %path.display(),
        components = stats.components,
        rewritten = stats.rewritten,
        "catalog normalized"
    );
    Ok(stats)
}

/// Normalize an in-memory catalog document.
pub fn normalize_bytes(input: &[u8]) -> Result<(Vec<u8>, NormalizeStats)> {
    let reader = ParserConfig::new()
        .trim_whitespace(false)
        .whitespace_to_characters(false)
        .cdata_to_characters(false)
        .ignore_comments(false)
        .create_reader(input);

    let mut output = Vec::with_capacity(input.len());
    let mut writer = EmitterConfig::new()
        .perform_indent(false)
        .write_document_declaration(true)
        .create_writer(&mut output);

    let mut stats = NormalizeStats::default();
    let mut seen_root = false;

    for event in reader {
        let event = event.context("Catalog is not well-formed XML")?;

        match &event {
            ReaderEvent::StartDocument {
                version,
                standalone,
                ..
            } => {
                // Re-encoded as UTF-8 whatever the source was
                writer.write(WriterEvent::StartDocument {
                    version: *version,
                    encoding: Some("utf-8"),
                    standalone: *standalone,
                })?;
            }

            ReaderEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                let mut attrs: Vec<Attribute<'_>> = attributes.iter().map(|a| a.borrow()).collect();

                if !seen_root {
                    seen_root = true;
                    clear_base_location(&mut attrs);
                }

                if name.local_name == COMPONENT_ELEMENT
                    && name.namespace.as_deref() == Some(CATALOG_NAMESPACE)
                {
                    stats.components += 1;
                    if shorten_path(&mut attrs) {
                        stats.rewritten += 1;
                    }
                }

                writer.write(WriterEvent::StartElement {
                    name: name.borrow(),
                    attributes: Cow::Owned(attrs),
                    namespace: Cow::Borrowed(namespace),
                })?;
            }

            other => {
                if let Some(w_event) = other.as_writer_event() {
                    writer.write(w_event)?;
                }
            }
        }
    }

    if !seen_root {
        anyhow::bail!("Catalog has no root element");
    }

    drop(writer);
    Ok((output, stats))
}

/// Set the root's baseLocation to "" (adding it if missing)
fn clear_base_location(attrs: &mut Vec<Attribute<'_>>) {
    let existing = attrs
        .iter_mut()
        .find(|a| a.name.prefix.is_none() && a.name.local_name == BASE_LOCATION_ATTRIBUTE);

    match existing {
        Some(attr) => attr.value = "",
        None => attrs.push(Attribute::new(Name::local(BASE_LOCATION_ATTRIBUTE), "")),
    }
}

/// Cut the path attribute down to its last segment. Returns true if it changed.
fn shorten_path(attrs: &mut [Attribute<'_>]) -> bool {
    for attr in attrs.iter_mut() {
        if attr.name.prefix.is_none() && attr.name.local_name == PATH_ATTRIBUTE {
            let short = final_segment(attr.value);
            if short.len() != attr.value.len() {
                attr.value = short;
                return true;
            }
            return false;
        }
    }
    false
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use xml::reader::EventReader;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Manifest xmlns="openmanage/cm/dm" baseLocation="downloads.dell.com" version="2024.01">
  <!-- lab catalog -->
  <SoftwareComponent path="dir1/dir2/file.exe" packageID="A1"><Name>BIOS</Name></SoftwareComponent>
  <SoftwareComponent path="dir1/dir2/file.exe" packageID="A2"/>
  <SoftwareComponent path="dir1/dir2/file.exe" packageID="A3"/>
  <SoftwareComponent packageID="NOPATH"/>
  <InventoryComponent path="keep/this/inv.exe"/>
</Manifest>
"#;

    /// (local name, attribute name, attribute value) for every attribute
    fn attributes_of(doc: &[u8]) -> Vec<(String, String, String)> {
        let mut found = Vec::new();
        for event in EventReader::new(doc) {
            if let ReaderEvent::StartElement { name, attributes, .. } = event.unwrap() {
                for a in attributes {
                    found.push((name.local_name.clone(), a.name.local_name, a.value));
                }
            }
        }
        found
    }

    #[test]
    fn test_final_segment() {
        assert_eq!(final_segment("dir1/dir2/file.exe"), "file.exe");
        assert_eq!(final_segment(r"dir1\file.exe"), "file.exe");
        assert_eq!(final_segment("file.exe"), "file.exe");
        assert_eq!(final_segment("dir/"), "");
    }

    #[test]
    fn test_paths_shortened_and_base_cleared() {
        let (out, stats) = normalize_bytes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(stats, NormalizeStats { components: 4, rewritten: 3 });

        let attrs = attributes_of(&out);
        let paths: Vec<&str> = attrs
            .iter()
            .filter(|(el, attr, _)| el == "SoftwareComponent" && attr == "path")
            .map(|(_, _, v)| v.as_str())
            .collect();
        assert_eq!(paths, vec!["file.exe", "file.exe", "file.exe"]);

        let base = attrs
            .iter()
            .find(|(el, attr, _)| el == "Manifest" && attr == "baseLocation")
            .unwrap();
        assert_eq!(base.2, "");

        // Other elements and attributes are left alone
        assert!(attrs.contains(&(
            "InventoryComponent".into(),
            "path".into(),
            "keep/this/inv.exe".into()
        )));
        assert!(attrs.contains(&("Manifest".into(), "version".into(), "2024.01".into())));
    }

    #[test]
    fn test_output_is_utf8_with_declaration_and_namespace() {
        let (out, _) = normalize_bytes(SAMPLE.as_bytes()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("utf-8"));
        assert!(text.contains(r#"xmlns="openmanage/cm/dm""#));
        assert!(text.contains("lab catalog"));
        assert!(!text.contains("dir1/dir2"));
    }

    #[test]
    fn test_base_location_added_when_missing() {
        let doc = r#"<Manifest xmlns="openmanage/cm/dm"><SoftwareComponent path="a/b.exe"/></Manifest>"#;
        let (out, stats) = normalize_bytes(doc.as_bytes()).unwrap();
        assert_eq!(stats.rewritten, 1);
        let attrs = attributes_of(&out);
        assert!(attrs.contains(&("Manifest".into(), "baseLocation".into(), "".into())));
    }

    #[test]
    fn test_components_outside_namespace_untouched() {
        let doc = r#"<Manifest baseLocation="x"><SoftwareComponent path="a/b.exe"/></Manifest>"#;
        let (out, stats) = normalize_bytes(doc.as_bytes()).unwrap();
        assert_eq!(stats.components, 0);
        let attrs = attributes_of(&out);
        assert!(attrs.contains(&("SoftwareComponent".into(), "path".into(), "a/b.exe".into())));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let (once, _) = normalize_bytes(SAMPLE.as_bytes()).unwrap();
        let (twice, stats) = normalize_bytes(&once).unwrap();
        assert_eq!(stats.rewritten, 0);
        assert_eq!(attributes_of(&once), attributes_of(&twice));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(normalize_bytes(b"<Manifest><SoftwareComponent></Manifest>").is_err());
        assert!(normalize_bytes(b"").is_err());
    }

    #[test]
    fn test_normalize_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.xml");
        fs::write(&path, SAMPLE).unwrap();

        let stats = normalize_catalog(&path).unwrap();
        assert_eq!(stats.rewritten, 3);

        let written = fs::read(&path).unwrap();
        for (el, attr, value) in attributes_of(&written) {
            if el == "SoftwareComponent" && attr == "path" {
                assert!(!value.contains('/'));
            }
        }
    }
}
