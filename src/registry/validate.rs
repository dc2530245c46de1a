// Path string validation and lexical normalization

use crate::output::errors::{ControlNodeError, ValidationErrors};
use crate::output::messages;

/// Collapse repeated slashes, drop `.` segments and any trailing slash.
///
/// `..` segments are kept so validation can reject them.
pub fn normalize_path(raw: &str) -> String {
    let segments: Vec<&str> = raw
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if raw.starts_with('/') {
        format!("/{}", segments.join("/"))
    } else {
        segments.join("/")
    }
}

fn has_traversal(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}

/// Validate a control-node path and return its normalized form.
///
/// Surrounding whitespace is not part of the path.
pub fn validate_path(raw: &str) -> Result<String, ControlNodeError> {
    let raw = raw.trim();
    let mut errors = ValidationErrors::new();

    if raw.is_empty() {
        errors.add_field_error("path", messages::PATH_EMPTY);
        return Err(errors.into());
    }

    if !raw.starts_with('/') {
        errors.add_field_error("path", messages::PATH_NOT_ABSOLUTE);
    }
    if has_traversal(raw) {
        errors.add_field_error("path", messages::PATH_TRAVERSAL);
    }

    errors.into_result()?;
    Ok(normalize_path(raw))
}

/// Validate the playbook path of a run request; it is relative to the
/// control node's playbook directory
pub fn validate_playbook_path(raw: &str) -> Result<String, ControlNodeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ControlNodeError::field(
            "playbookPath",
            messages::PLAYBOOK_PATH_EMPTY,
        ));
    }
    if raw.starts_with('/') {
        return Err(ControlNodeError::field(
            "playbookPath",
            messages::PLAYBOOK_PATH_ABSOLUTE,
        ));
    }
    if has_traversal(raw) {
        return Err(ControlNodeError::field(
            "playbookPath",
            messages::PATH_TRAVERSAL,
        ));
    }

    Ok(normalize_path(raw))
}

/// Join `relative` onto `root`, refusing anything that would leave `root`.
///
/// Returns `(full_path, normalized_relative)`.
pub fn confine_relative(root: &str, relative: &str) -> Result<(String, String), ControlNodeError> {
    let outside = || ControlNodeError::field("playbookRelPath", messages::PLAYBOOK_OUTSIDE_ROOT);

    if relative.trim().is_empty() {
        return Err(ControlNodeError::field(
            "playbookRelPath",
            messages::PLAYBOOK_PATH_EMPTY,
        ));
    }
    if relative.starts_with('/') {
        return Err(outside());
    }

    let mut stack: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(outside());
                }
            }
            other => stack.push(other),
        }
    }

    if stack.is_empty() {
        return Err(outside());
    }

    let rel = stack.join("/");
    let root = normalize_path(root);
    let full = if root == "/" {
        format!("/{}", rel)
    } else {
        format!("{}/{}", root, rel)
    };

    Ok((full, rel))
}
