//! Post and comment text rules.

use time::{format_description::FormatItem, macros::format_description};

use crate::domain::error::DomainError;

pub const POST_TEXT_REQUIRED: &str = "Post text must not be empty.";
pub const COMMENT_TEXT_REQUIRED: &str = "Comment text must not be empty.";
pub const GROUP_INVALID: &str = "Select a valid group.";
pub const IMAGE_INVALID: &str = "Upload a valid image.";

pub const DISPLAY_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[day] [month repr:long] [year], [hour]:[minute]");

/// Trim and validate the body of a post.
pub fn normalize_post_text(raw: &str) -> Result<String, DomainError> {
    normalize_text(raw, POST_TEXT_REQUIRED)
}

/// Trim and validate the body of a comment.
pub fn normalize_comment_text(raw: &str) -> Result<String, DomainError> {
    normalize_text(raw, COMMENT_TEXT_REQUIRED)
}

fn normalize_text(raw: &str, message: &'static str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(message));
    }
    Ok(trimmed.to_string())
}

/// Accept only uploads whose file name maps to an `image/*` media type.
pub fn validate_image_name(file_name: &str) -> Result<(), DomainError> {
    let is_image = mime_guess::from_path(file_name)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE);
    if is_image {
        Ok(())
    } else {
        Err(DomainError::validation(IMAGE_INVALID))
    }
}

/// Short preview used in page titles; never splits a multi-byte character.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
