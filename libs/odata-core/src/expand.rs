//! `$expand` peeling.
//!
//! The expand expression stays raw text inside [`QueryParams`](crate::QueryParams);
//! the response builder peels one level at a time with [`parse_expand`]:
//!
//! ```text
//! expand_list := item (',' item)*
//! item        := NAME [ '(' option (';' option)* ')' ]
//! option      := KEY '=' <balanced text up to a top-level ';' or ')'>
//! ```
//!
//! Option values are kept verbatim, so a nested `$expand=...` is handed to the
//! next level untouched.

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    Open,
    Close,
    Comma,
    Semicolon,
    Text,
}

#[derive(Clone, Copy, Debug)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

/// One navigation property named at a single expand level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpandItem {
    pub property: String,
    pub options: Vec<(String, String)>,
}

/// Split one level of an expand expression into its items.
///
/// # Errors
/// Returns `Error::InvalidExpand` carrying the original text on unbalanced
/// parentheses, unterminated string literals, empty names or options without `=`.
pub fn parse_expand(raw: &str) -> Result<Vec<ExpandItem>, Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let tokens = tokenize(raw)?;
    let mut parser = Parser {
        input: raw,
        tokens,
        pos: 0,
    };
    parser.expand_list()
}

fn invalid(text: &str, reason: impl Into<String>) -> Error {
    Error::InvalidExpand {
        text: text.to_owned(),
        reason: reason.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let punct = match bytes[i] {
            b'(' => Some(TokenKind::Open),
            b')' => Some(TokenKind::Close),
            b',' => Some(TokenKind::Comma),
            b';' => Some(TokenKind::Semicolon),
            _ => None,
        };
        if let Some(kind) = punct {
            tokens.push(Token {
                kind,
                start: i,
                end: i + 1,
            });
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && !matches!(bytes[i], b'(' | b')' | b',' | b';') {
            if bytes[i] != b'\'' {
                i += 1;
                continue;
            }
            // quoted literal; '' is an escaped quote
            i += 1;
            loop {
                match bytes.get(i) {
                    None => return Err(invalid(input, "unterminated string literal")),
                    Some(b'\'') if bytes.get(i + 1) == Some(&b'\'') => i += 2,
                    Some(b'\'') => {
                        i += 1;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
        }
        tokens.push(Token {
            kind: TokenKind::Text,
            start,
            end: i,
        });
    }

    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn text(&self, tok: Token) -> &str {
        &self.input[tok.start..tok.end]
    }

    fn skip_blank(&mut self) {
        while let Some(tok) = self.peek() {
            if tok.kind == TokenKind::Text && self.text(tok).trim().is_empty() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expand_list(&mut self) -> Result<Vec<ExpandItem>, Error> {
        let mut items = Vec::new();
        loop {
            items.push(self.item()?);
            self.skip_blank();
            match self.bump() {
                None => return Ok(items),
                Some(tok) if tok.kind == TokenKind::Comma => {}
                Some(tok) => {
                    return Err(invalid(
                        self.input,
                        format!("unexpected '{}' at offset {}", self.text(tok), tok.start),
                    ));
                }
            }
        }
    }

    fn item(&mut self) -> Result<ExpandItem, Error> {
        let name = match self.bump() {
            Some(tok) if tok.kind == TokenKind::Text => self.text(tok).trim().to_owned(),
            _ => String::new(),
        };
        if name.is_empty() {
            return Err(invalid(self.input, "expected a navigation property name"));
        }
        if name.chars().any(char::is_whitespace) || name.contains('\'') {
            return Err(invalid(
                self.input,
                format!("'{name}' is not a navigation property name"),
            ));
        }

        let mut options = Vec::new();
        if self.peek().is_some_and(|t| t.kind == TokenKind::Open) {
            self.pos += 1;
            options = self.options()?;
        }

        Ok(ExpandItem {
            property: name,
            options,
        })
    }

    fn options(&mut self) -> Result<Vec<(String, String)>, Error> {
        let mut options = Vec::new();
        loop {
            let (start, end) = self.raw_option();
            let text = self.input[start..end].trim();
            if !text.is_empty() {
                let Some((key, value)) = text.split_once('=') else {
                    return Err(invalid(
                        self.input,
                        format!("expected name=value, got '{text}'"),
                    ));
                };
                options.push((key.trim().to_owned(), value.trim().to_owned()));
            }
            match self.bump() {
                Some(tok) if tok.kind == TokenKind::Semicolon => {}
                Some(tok) if tok.kind == TokenKind::Close => return Ok(options),
                _ => return Err(invalid(self.input, "unbalanced parentheses")),
            }
        }
    }

    /// Consume tokens up to a top-level `;` or `)`, returning the byte span.
    fn raw_option(&mut self) -> (usize, usize) {
        let start = self.peek().map_or(self.input.len(), |t| t.start);
        let mut end = start;
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Close | TokenKind::Semicolon if depth == 0 => break,
                TokenKind::Open => depth += 1,
                TokenKind::Close => depth -= 1,
                _ => {}
            }
            end = tok.end;
            self.pos += 1;
        }
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[ExpandItem]) -> Vec<&str> {
        items.iter().map(|i| i.property.as_str()).collect()
    }

    fn option<'a>(item: &'a ExpandItem, key: &str) -> Option<&'a str> {
        item.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn empty_expand_has_no_items() {
        assert!(parse_expand("").unwrap().is_empty());
        assert!(parse_expand("   ").unwrap().is_empty());
    }

    #[test]
    fn splits_on_top_level_commas() {
        let items = parse_expand("manager, members ,tags").unwrap();
        assert_eq!(names(&items), vec!["manager", "members", "tags"]);
        assert!(items.iter().all(|i| i.options.is_empty()));
    }

    #[test]
    fn peels_options_of_one_level() {
        let items = parse_expand("members($select=id,name;$top=2),owner").unwrap();
        assert_eq!(names(&items), vec!["members", "owner"]);
        assert_eq!(option(&items[0], "$select"), Some("id,name"));
        assert_eq!(option(&items[0], "$TOP"), Some("2"));
        assert_eq!(option(&items[0], "$filter"), None);
    }

    #[test]
    fn nested_expand_is_kept_verbatim() {
        let items =
            parse_expand("members($expand=groups($select=id;$expand=owner);$select=id)").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            option(&items[0], "$expand").unwrap(),
            "groups($select=id;$expand=owner)"
        );
        assert_eq!(option(&items[0], "$select"), Some("id"));

        let next = parse_expand(option(&items[0], "$expand").unwrap()).unwrap();
        assert_eq!(names(&next), vec!["groups"]);
        assert_eq!(option(&next[0], "$expand").unwrap(), "owner");
    }

    #[test]
    fn quoted_literals_may_contain_separators() {
        let items = parse_expand("members($filter=name eq 'a,b;(c)'''),owner").unwrap();
        assert_eq!(names(&items), vec!["members", "owner"]);
        assert_eq!(option(&items[0], "$filter"), Some("name eq 'a,b;(c)'''"));
    }

    #[test]
    fn function_calls_inside_filter_stay_whole() {
        let items = parse_expand("members($filter=contains(name,'jo'))").unwrap();
        assert_eq!(option(&items[0], "$filter"), Some("contains(name,'jo')"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        for raw in [
            "members($select=id",
            "members(select)",
            ",members",
            "members,",
            "members($top=1)x",
            "mem bers",
            "members($filter=name eq 'x)",
        ] {
            let err = parse_expand(raw).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidExpand { text, .. } if text == raw),
                "{raw}: {err}"
            );
        }
    }
}
