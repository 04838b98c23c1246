//! Save attachments of a rendered message to disk.

use std::path::{Path, PathBuf};

use crate::error::{MimeTreeError, Result};
use crate::model::part::PartRef;
use crate::render::ParsedMessage;

/// Longest filename written, in characters.
const MAX_FILENAME_LEN: usize = 150;

/// Write the decoded payload of one attachment part into `output_dir`.
///
/// The file never overwrites an existing one; a counter is appended instead.
pub fn save_attachment(part: PartRef<'_>, output_dir: &Path) -> Result<PathBuf> {
    let node = part
        .node()
        .ok_or_else(|| MimeTreeError::Export(format!("part {} has no content", part.id().index())))?;
    let filename = sanitize_filename(part.filename().unwrap_or("unnamed"), MAX_FILENAME_LEN);
    let path = unique_path(&output_dir.join(filename));
    std::fs::write(&path, node.decoded_content()).map_err(|e| MimeTreeError::io(&path, e))?;
    tracing::debug!(path = %path.display(), bytes = node.decoded_content().len(), "Saved attachment");
    Ok(path)
}

/// Save every attachment of `message`, creating `output_dir` if needed.
///
/// A part that fails to save is logged and skipped.
pub fn save_attachments(message: &ParsedMessage, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir).map_err(|e| MimeTreeError::io(output_dir, e))?;
    let mut paths = Vec::new();

    for part in message.attachment_parts() {
        match save_attachment(part, output_dir) {
            Ok(path) => paths.push(path),
            Err(e) => {
                tracing::warn!(
                    filename = part.filename().unwrap_or("unnamed"),
                    error = %e,
                    "Failed to export attachment"
                );
            }
        }
    }

    Ok(paths)
}

/// Replace characters that are unsafe in filenames and truncate to `max_len`.
pub fn sanitize_filename(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    // A name made only of dots would resolve to the directory itself.
    if sanitized.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    parent.join(format!("{stem}_dup.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MessageParser;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("hello world.txt", 20), "hello_world.txt");
        assert_eq!(sanitize_filename("../../etc/passwd", 30), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a/b\\c:d*e", 20), "a_b_c_d_e");
        assert_eq!(sanitize_filename("", 20), "unnamed");
        assert_eq!(sanitize_filename("..", 20), "unnamed");
        assert_eq!(sanitize_filename("abcdef", 3), "abc");
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        assert_eq!(unique_path(&path), path);
        std::fs::write(&path, "x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("a_1.txt"));
    }

    #[test]
    fn test_save_attachments_with_duplicate_and_unnamed() {
        let raw = "Content-Type: multipart/mixed; boundary=b\n\n\
--b\nContent-Type: text/plain\n\nbody\n\
--b\nContent-Type: application/octet-stream\nContent-Disposition: attachment; filename=\"x.bin\"\n\none\n\
--b\nContent-Type: application/octet-stream\nContent-Disposition: attachment; filename=\"x.bin\"\n\ntwo\n\
--b\nContent-Type: application/octet-stream\nContent-Disposition: attachment\n\nthree\n\
--b--\n";
        let message = MessageParser::new().parse_bytes(raw.as_bytes());
        let dir = tempfile::tempdir().unwrap();
        let paths = save_attachments(&message, dir.path()).unwrap();

        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.bin", "x_1.bin", "unnamed"]);
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap().trim_end(), "one");
        assert_eq!(std::fs::read_to_string(&paths[1]).unwrap().trim_end(), "two");
    }
}
