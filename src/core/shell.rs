//! DR-003: Shell word splitting and quoting.
//!
//! Covers the POSIX subset recipe lines use: whitespace separation, single
//! quotes, double quotes with `\"`-style escapes, and backslash escapes.
//! Variable references are kept literally; expansion is the caller's job.

/// Characters that never need quoting. `$` and braces stay bare so
/// `${SINGULARITY_ROOTFS}/ext` renders the way people write it.
fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-./:=@%+,${}".contains(c)
}

/// Quote a word so that [`split_words`] returns it unchanged.
pub fn quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Quote a word so a shell reads it back without expanding `$` references.
pub fn quote_literal(word: &str) -> String {
    if word.contains('$') {
        return format!("'{}'", word.replace('\'', r"'\''"));
    }
    quote(word)
}

/// Characters with meaning to a shell beyond word splitting.
pub fn has_metachars(line: &str) -> bool {
    line.chars().any(|c| "|&;<>`()*?~".contains(c))
}

/// Split a line into words. Errors on an unterminated quote or a trailing
/// backslash.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.peek() {
                            Some(&next @ ('"' | '\\' | '$' | '`')) => {
                                current.push(next);
                                chars.next();
                            }
                            _ => current.push('\\'),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(next) => current.push(next),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
