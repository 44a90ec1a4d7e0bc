//! SQL quoting for names and values that arrive from paths.
//!
//! Every statement built from a path segment or buffered content goes through
//! these two functions. Nothing else in the crate splices user text into SQL.

/// Quote `s` as a delimited SQLite identifier.
///
/// ```
/// use relfs_kernel::quote::quote_identifier;
/// assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
/// ```
pub fn quote_identifier(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote `s` as an SQLite string literal.
///
/// A NUL cannot appear inside a string token, so it is spliced in with
/// `char(0)` and the whole expression is parenthesized.
///
/// ```
/// use relfs_kernel::quote::quote_literal;
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// assert_eq!(quote_literal("a\0b"), "('a' || char(0) || 'b')");
/// ```
pub fn quote_literal(s: &str) -> String {
    if !s.contains('\0') {
        return quote_plain_literal(s);
    }
    let parts: Vec<String> = s.split('\0').map(quote_plain_literal).collect();
    format!("({})", parts.join(" || char(0) || "))
}

fn quote_plain_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Quote a schema-qualified name: `"schema"."name"`.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
}
