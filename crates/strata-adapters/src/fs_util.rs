//! Filesystem helpers shared by the local adapters.

use crate::error::{AdapterError, AdapterResult};
use std::path::{Path, PathBuf};

/// Write to a sibling temp file, then rename over the target so readers see
/// either the old content or the new content, never a torn write.
pub(crate) async fn write_atomic(adapter: &str, path: &Path, content: &[u8]) -> AdapterResult<()> {
    let subject = path.display().to_string();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AdapterError::from_io(adapter, &subject, e))?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| AdapterError::from_io(adapter, &subject, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(AdapterError::from_io(adapter, &subject, e));
    }
    Ok(())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4().simple()))
}

pub(crate) fn is_tmp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".tmp-")
}

pub(crate) async fn ensure_dir(adapter: &str, root: &Path) -> AdapterResult<()> {
    let subject = root.display().to_string();
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| AdapterError::unavailable(adapter, format!("cannot create {}: {}", subject, e)))?;
    let meta = tokio::fs::metadata(root)
        .await
        .map_err(|e| AdapterError::unavailable(adapter, format!("cannot stat {}: {}", subject, e)))?;
    if !meta.is_dir() {
        return Err(AdapterError::unavailable(adapter, format!("{} is not a directory", subject)));
    }
    Ok(())
}

/// Encode an arbitrary key as a single safe file name.
pub(crate) fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub(crate) fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_roundtrips_reserved_chars() {
        for key in ["file:acme:s-1:f1", "a/b/c", "plain", "sp ace%"] {
            let enc = encode_key(key);
            assert!(!enc.contains('/') && !enc.contains(':'));
            assert_eq!(decode_key(&enc).as_deref(), Some(key));
        }
    }

    #[test]
    fn tmp_names_are_recognised() {
        let tmp = tmp_path(Path::new("/x/doc.json"));
        let name = tmp.file_name().unwrap().to_string_lossy().to_string();
        assert!(is_tmp_name(&name));
        assert!(!is_tmp_name("doc.json"));
    }
}
