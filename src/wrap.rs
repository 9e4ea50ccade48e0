use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WrapError {
    #[error("invalid argument: max chars per line must be positive, got {0}")]
    InvalidArgument(usize),
}

/// Greedy word wrap. Lengths are counted in chars, so accented text wraps the
/// same way as ASCII. A word longer than `max_chars_per_line` stays whole on
/// its own line.
pub fn wrap(text: &str, max_chars_per_line: usize) -> Result<Vec<String>, WrapError> {
    if max_chars_per_line == 0 {
        return Err(WrapError::InvalidArgument(max_chars_per_line));
    }

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        // `current` carries a trailing space, which counts against the bound.
        if current_len > 0 && current_len + word_len > max_chars_per_line {
            lines.push(current.trim_end().to_string());
            current.clear();
            current_len = 0;
        }
        current.push_str(word);
        current.push(' ');
        current_len += word_len + 1;
    }

    if !current.trim().is_empty() {
        lines.push(current.trim_end().to_string());
    }

    Ok(lines)
}
