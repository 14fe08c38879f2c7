//! Preprocessor stripping: comments and directives the parser cannot use.
//!
//! This is not a C preprocessor. Nesting is not tracked, string literals are
//! not recognised, macros are not expanded and multi-line directives are not
//! joined. Removed lines are left empty so the line structure survives.

/// Directives dropped wholesale (the whole line goes).
const DROPPED_DIRECTIVES: &[&str] = &["ifdef", "ifndef", "if", "elif", "else", "endif", "include"];

/// Strip comments, conditional/include directives, `extern` lines and lines
/// holding only a closing brace (the tail of an `extern "C" { ... }` block).
pub fn strip(text: &str) -> String {
    let uncommented = strip_comments(text);
    let mut out = String::with_capacity(uncommented.len());
    for (i, line) in uncommented.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if !is_dropped_line(line.trim()) {
            out.push_str(line);
        }
    }
    out
}

fn is_dropped_line(line: &str) -> bool {
    if line == "}" {
        return true;
    }
    if starts_with_word(line, "extern") {
        return true;
    }
    if let Some(rest) = line.strip_prefix('#') {
        let rest = rest.trim_start();
        let word: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if DROPPED_DIRECTIVES.contains(&word.as_str()) {
            return true;
        }
        if word == "pragma" && rest[word.len()..].trim() == "once" {
            return true;
        }
    }
    false
}

fn starts_with_word(line: &str, word: &str) -> bool {
    line.strip_prefix(word)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_'))
}

/// Remove `/* */` and `//` comments, keeping the newlines they span.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '/' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            Some('*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
                // Keep the tokens on either side apart.
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}
