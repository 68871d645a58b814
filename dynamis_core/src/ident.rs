// src/ident.rs
//! Drive item, site and drive identifier handling.
//!
//! Callers address SharePoint/OneDrive resources either by opaque Graph ID
//! or by slash-delimited path. The explicit form is a tagged object
//! (`{"id": "..."}` / `{"path": "..."}`); a bare string falls back to a
//! best-effort classification. The heuristic cannot distinguish a long
//! extension-less filename from an ID, which is exactly why the tagged form
//! exists; bare strings are accepted for compatibility only.

use serde_json::Value;

use crate::error::ConnectorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    Id(String),
    Path(String),
}

impl ItemRef {
    /// Classify a bare string. A string containing `/` is always a path;
    /// `!` (composite drive-item ids), a `driveItem_` prefix, or length
    /// over 40 with neither `/` nor `.` reads as an ID.
    pub fn classify(input: &str) -> ItemRef {
        let is_likely_id = input.contains('!')
            || input.starts_with("driveItem_")
            || (input.len() > 40 && !input.contains('/') && !input.contains('.'));
        if is_likely_id {
            ItemRef::Id(input.to_string())
        } else {
            ItemRef::Path(input.to_string())
        }
    }

    /// Accept the tagged object form, falling back to [`classify`] for
    /// strings.
    pub fn from_value(value: &Value) -> Result<ItemRef, ConnectorError> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Ok(ItemRef::classify(s.trim())),
            Value::Object(map) => {
                if let Some(id) = map.get("id").and_then(|v| v.as_str()) {
                    return Ok(ItemRef::Id(id.to_string()));
                }
                if let Some(path) = map.get("path").and_then(|v| v.as_str()) {
                    return Ok(ItemRef::Path(path.to_string()));
                }
                Err(ConnectorError::InvalidParams(
                    "item reference object must carry 'id' or 'path'".to_string(),
                ))
            }
            _ => Err(ConnectorError::InvalidParams(
                "item reference must be a string or an {id}/{path} object".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemRef::Id(s) | ItemRef::Path(s) => s,
        }
    }
}

/// True when the input is already a canonical Graph site identifier and
/// needs no lookup: composite (`host,siteId,webId`), server-relative
/// (`host:/sites/x`), a `sites/{...}` segment, the literal `root`, or a
/// bare GUID.
pub fn site_ref_is_canonical(site: &str) -> bool {
    if site.is_empty() {
        return false;
    }
    let is_composite = site.contains(',');
    let is_server_relative = site.contains(':') && (site.contains("/sites/") || site.contains("/teams/"));
    let is_path_segment = site.starts_with("sites/") && site.contains('{') && site.contains('}');
    let is_root = site.eq_ignore_ascii_case("root");
    let is_guid_like = site.len() == 36 && site.matches('-').count() == 4;
    is_composite || is_server_relative || is_path_segment || is_root || is_guid_like
}

/// True when a drive identifier looks like an opaque drive ID rather than a
/// display name: contains `!`, or is longer than 30 chars with neither
/// spaces nor slashes.
pub fn drive_ref_is_likely_id(drive: &str) -> bool {
    drive.contains('!')
        || (drive.len() > 30 && !drive.contains(' ') && !drive.contains('/'))
}

/// Folder references in listing endpoints: IDs are slash-free and either
/// long or composite.
pub fn folder_ref_is_likely_id(folder: &str) -> bool {
    !folder.contains('/') && (folder.len() > 40 || folder.contains('!'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slash_is_always_a_path() {
        for input in [
            "/Documents/report.docx",
            "a/b",
            "0123456789012345678901234567890123456789012/x", // >40 chars but slashed
        ] {
            assert_eq!(ItemRef::classify(input), ItemRef::Path(input.to_string()));
        }
    }

    #[test]
    fn composite_and_prefixed_ids() {
        assert_eq!(
            ItemRef::classify("01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K!103"),
            ItemRef::Id("01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K!103".to_string())
        );
        assert!(matches!(
            ItemRef::classify("driveItem_abc123"),
            ItemRef::Id(_)
        ));
    }

    #[test]
    fn long_opaque_string_reads_as_id_but_dotted_does_not() {
        let opaque = "ABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLMNOPQ"; // 43 chars
        assert!(matches!(ItemRef::classify(opaque), ItemRef::Id(_)));
        let dotted = "ABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLM.docx";
        assert!(matches!(ItemRef::classify(dotted), ItemRef::Path(_)));
        // the ambiguous middle ground: short names classify as paths
        assert!(matches!(ItemRef::classify("notes"), ItemRef::Path(_)));
    }

    #[test]
    fn tagged_object_bypasses_heuristic() {
        // would classify as a path if run through the heuristic
        let r = ItemRef::from_value(&json!({"id": "short"})).unwrap();
        assert_eq!(r, ItemRef::Id("short".to_string()));
        // would classify as an ID if run through the heuristic
        let long = "ABCDEFGHIJKLMNOPQRSTUVWXYZABCDEFGHIJKLMNOPQ";
        let r = ItemRef::from_value(&json!({ "path": long })).unwrap();
        assert_eq!(r, ItemRef::Path(long.to_string()));
    }

    #[test]
    fn invalid_reference_objects_are_rejected() {
        assert!(ItemRef::from_value(&json!({"name": "x"})).is_err());
        assert!(ItemRef::from_value(&json!(42)).is_err());
        assert!(ItemRef::from_value(&json!("")).is_err());
    }

    #[test]
    fn site_formats() {
        assert!(site_ref_is_canonical(
            "contoso.sharepoint.com,2C712604-1370-44E7-A1F5-426573FDA80A,2D2244C3-251A-49EA-93A8-39E1C3A060FE"
        ));
        assert!(site_ref_is_canonical("contoso.sharepoint.com:/sites/ops"));
        assert!(site_ref_is_canonical("root"));
        assert!(site_ref_is_canonical("2C712604-1370-44E7-A1F5-426573FDA80A".to_lowercase().as_str()));
        assert!(!site_ref_is_canonical("/sites/ops"));
        assert!(!site_ref_is_canonical("ops"));
    }

    #[test]
    fn drive_formats() {
        assert!(drive_ref_is_likely_id("b!x4bNdSDvF0qRyHWPxakPlQxHpXUkoJ1DrYRoTRgCDK1"));
        assert!(!drive_ref_is_likely_id("Documents"));
        assert!(!drive_ref_is_likely_id("Shared Documents"));
    }
}
