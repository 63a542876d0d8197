use crate::error::SyncError;

/// Trim and check message content. Returns the trimmed text to persist.
pub fn validate_content(raw: &str, max_chars: usize) -> Result<String, SyncError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidContent("message is empty".into()));
    }

    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(SyncError::InvalidContent(format!(
            "message is {len} characters, limit is {max_chars}"
        )));
    }

    Ok(trimmed.to_string())
}

pub fn validate_emoji(raw: &str) -> Result<&str, SyncError> {
    let emoji = raw.trim();
    if emoji.is_empty() {
        return Err(SyncError::InvalidContent("emoji is empty".into()));
    }
    Ok(emoji)
}
