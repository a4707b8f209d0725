//! Lexical preprocessing shared by the write-intent detector and the
//! schema-aware checker.
//!
//! Comment removal is quote-aware: `//` or `/*` inside a string literal
//! (`'http://host'`) is not a comment.

/// Quote characters that open a literal or an escaped identifier.
fn is_quote(c: char) -> bool {
    matches!(c, '\'' | '"' | '`')
}

/// Remove `//` line comments and `/* */` block comments that appear outside
/// string literals and backtick-quoted identifiers.
///
/// A removed comment becomes a single space so adjacent tokens stay apart.
/// An unterminated block comment is kept verbatim: the text after it stays
/// visible to every downstream check.
pub fn strip_comments(query: &str) -> String {
    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && q != '`' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 2;
                    continue;
                }
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        if is_quote(c) {
            quote = Some(c);
            out.push(c);
            i += 1;
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            out.push(' ');
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let close = (i + 2..chars.len().saturating_sub(1))
                .find(|&j| chars[j] == '*' && chars[j + 1] == '/');
            match close {
                Some(j) => {
                    out.push(' ');
                    i = j + 2;
                }
                None => {
                    out.extend(&chars[i..]);
                    break;
                }
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comment-free, whitespace-collapsed, uppercased form used for keyword
/// matching. The caller's text is never modified.
pub fn normalize_for_matching(query: &str) -> String {
    collapse_whitespace(&strip_comments(query)).to_uppercase()
}

/// Replace the contents of `'...'` and `"..."` literals with spaces, keeping
/// the quotes and every character offset. Backtick identifiers are left
/// intact since they name labels, types and properties.
pub fn mask_string_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in query.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    out.push(' ');
                } else if c == '\\' {
                    escaped = true;
                    out.push(' ');
                } else if c == q {
                    quote = None;
                    out.push(c);
                } else {
                    out.push(' ');
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }

    out
}
