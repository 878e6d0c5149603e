use std::path::{Component, Path};

use crate::error::{Result, SharkError};

/// Validate and normalize an entity file path.
///
/// Paths are stored relative to the project root. Absolute paths, empty
/// paths, and paths that escape the root through `..` are rejected. When
/// `require_md` is set (entity description files) the extension must be
/// `.md`.
pub fn validate_file_path(input: &str, require_md: bool) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SharkError::validation("file_path", "path is empty"));
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        return Err(SharkError::validation(
            "file_path",
            format!("'{trimmed}' is absolute; paths are relative to the project root"),
        ));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => {
                    return Err(SharkError::validation(
                        "file_path",
                        format!("'{trimmed}' is not valid UTF-8"),
                    ))
                }
            },
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(SharkError::validation(
                        "file_path",
                        format!("'{trimmed}' escapes the project root"),
                    ));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SharkError::validation(
                    "file_path",
                    format!("'{trimmed}' is absolute; paths are relative to the project root"),
                ))
            }
        }
    }
    if parts.is_empty() {
        return Err(SharkError::validation(
            "file_path",
            format!("'{trimmed}' resolves to nothing"),
        ));
    }

    let normalized = parts.join("/");
    if require_md && !normalized.ends_with(".md") {
        return Err(SharkError::validation(
            "file_path",
            format!("'{normalized}' must have a .md extension"),
        ));
    }
    Ok(normalized)
}
