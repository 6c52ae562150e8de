//! Minimal GraphQL tokenizer: enough structure for scoring, no grammar.

/// A lexical token borrowed from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Spread,
    At,
    Dollar,
    Ident(&'a str),
    /// String literal including its quotes
    Str(&'a str),
    /// Numbers and any other punctuation
    Other(&'a str),
}

impl<'a> Token<'a> {
    /// Source text of the token.
    pub(crate) fn as_source(&self) -> &'a str {
        match self {
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Colon => ":",
            Token::Spread => "...",
            Token::At => "@",
            Token::Dollar => "$",
            Token::Ident(s) | Token::Str(s) | Token::Other(s) => s,
        }
    }
}

/// Tokenize, dropping whitespace, commas, and `#` comments.
///
/// Unterminated strings run to the end of the line (or input for block
/// strings) instead of failing.
pub(crate) fn tokenize(src: &str) -> Vec<Token<'_>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => i += 1,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'"' => {
                let end = string_end(bytes, i);
                tokens.push(Token::Str(&src[i..end]));
                i = end;
            }
            b'{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            b'}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            b'@' => {
                tokens.push(Token::At);
                i += 1;
            }
            b'$' => {
                tokens.push(Token::Dollar);
                i += 1;
            }
            b'.' if bytes[i..].starts_with(b"...") => {
                tokens.push(Token::Spread);
                i += 3;
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                let start = i;
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                tokens.push(Token::Ident(&src[start..i]));
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'.' | b'+' | b'-'))
                {
                    i += 1;
                }
                tokens.push(Token::Other(&src[start..i]));
            }
            _ => {
                // Keep multi-byte characters intact.
                let width = src[i..].chars().next().map_or(1, char::len_utf8);
                tokens.push(Token::Other(&src[i..i + width]));
                i += width;
            }
        }
    }

    tokens
}

/// Index one past the end of the string literal starting at `start`.
fn string_end(bytes: &[u8], start: usize) -> usize {
    if bytes[start..].starts_with(b"\"\"\"") {
        let mut i = start + 3;
        while i < bytes.len() {
            if bytes[i] == b'\\' && bytes[i + 1..].starts_with(b"\"\"\"") {
                i += 4;
                continue;
            }
            if bytes[i..].starts_with(b"\"\"\"") {
                return i + 3;
            }
            i += 1;
        }
        return bytes.len();
    }

    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokens() {
        let tokens = tokenize("query { user(id: 1) { ...F } }");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("query"),
                Token::LBrace,
                Token::Ident("user"),
                Token::LParen,
                Token::Ident("id"),
                Token::Colon,
                Token::Other("1"),
                Token::RParen,
                Token::LBrace,
                Token::Spread,
                Token::Ident("F"),
                Token::RBrace,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_strings_hide_braces_and_comments() {
        let tokens = tokenize(r#"{ a(s: "{ # }") }"#);
        assert!(tokens.contains(&Token::Str(r#""{ # }""#)));
        assert_eq!(tokens.iter().filter(|t| **t == Token::LBrace).count(), 1);
    }

    #[test]
    fn test_block_string() {
        let tokens = tokenize("{ a(s: \"\"\"x\n{y}\"\"\") }");
        assert_eq!(tokens.iter().filter(|t| **t == Token::LBrace).count(), 1);
    }

    #[test]
    fn test_unterminated_string_stops_at_newline() {
        let tokens = tokenize("{ a(s: \"oops\n) }");
        assert_eq!(tokens.last(), Some(&Token::RBrace));
    }

    #[test]
    fn test_non_ascii_does_not_panic() {
        let tokens = tokenize("{ naïve ☃ }");
        assert!(tokens.len() >= 3);
    }

    #[test]
    fn test_trailing_backslash_in_string() {
        let tokens = tokenize("\"abc\\");
        assert_eq!(tokens.len(), 1);
    }
}
