//! Built-in minifier.
//!
//! Strips comments outside string literals and drops indentation and blank
//! lines. It never rewrites identifiers, so its output is always safe to
//! load; problems fall back to the unminified text.

use super::Minifier;

/// Result of a minification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinifyOutput {
    /// Minified text, or the input when minification failed.
    pub text: String,
    /// Problems found; non-empty means `text` is the unminified input.
    pub errors: Vec<String>,
}

/// Comment and whitespace stripping minifier for scripts and stylesheets.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinMinifier;

impl Minifier for BuiltinMinifier {
    fn minify(&self, path: &str, text: &str) -> MinifyOutput {
        let line_comments = path.ends_with(".js");
        match strip_comments(text, line_comments) {
            Ok(stripped) => MinifyOutput {
                text: collapse_lines(&stripped),
                errors: Vec::new(),
            },
            Err(error) => MinifyOutput {
                text: text.to_string(),
                errors: vec![format!("{path}: {error}")],
            },
        }
    }
}

fn strip_comments(text: &str, line_comments: bool) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut at_line_start = true;

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                out.push(c);
                let mut closed = false;
                while let Some(s) = chars.next() {
                    out.push(s);
                    if s == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if s == c {
                        closed = true;
                        break;
                    } else if s == '\n' && c != '`' {
                        break;
                    }
                }
                if !closed && chars.peek().is_none() {
                    return Err("unterminated string literal".to_string());
                }
                at_line_start = false;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        closed = true;
                        break;
                    }
                    prev = s;
                }
                if !closed {
                    return Err("unterminated comment".to_string());
                }
            }
            '/' if line_comments && at_line_start && chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '\n' => {
                out.push(c);
                at_line_start = true;
            }
            c if c.is_whitespace() => out.push(c),
            c => {
                out.push(c);
                at_line_start = false;
            }
        }
    }
    Ok(out)
}

fn collapse_lines(text: &str) -> String {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_comments_and_indentation() {
        let js = "/* header */\ndefine('A', [], function () {\n    // note\n    return 'a /* not a comment */';\n});\n";
        let out = BuiltinMinifier.minify("A.js", js);
        assert!(out.errors.is_empty());
        assert_eq!(out.text, "define('A', [], function () {\nreturn 'a /* not a comment */';\n});");
    }

    #[test]
    fn test_css_keeps_double_slash() {
        let css = ".a {\n  background: url(//cdn/x.png); /* c */\n}\n";
        let out = BuiltinMinifier.minify("A.css", css);
        assert_eq!(out.text, ".a {\nbackground: url(//cdn/x.png);\n}");
    }

    #[test]
    fn test_unterminated_comment_falls_back() {
        let out = BuiltinMinifier.minify("A.js", "var a; /* oops");
        assert_eq!(out.text, "var a; /* oops");
        assert_eq!(out.errors.len(), 1);
    }
}
