//! Hand-written scanner for `.arm` source text.
//!
//! Total over arbitrary input: unknown characters and unterminated strings
//! become `Unexpected` tokens, and the parser decides what to report.
//! Newlines are significant (they terminate declarations and object entries)
//! so runs of them are emitted as a single `Newline` token.

use super::types::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Declarations
    TargetScope,
    Param,
    Var,
    Resource,
    Output,
    Module,
    Import,
    // Literals
    Identifier,
    StringLit,
    IntLit,
    True,
    False,
    Null,
    // Punctuation
    Assign,
    Colon,
    Comma,
    Dot,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Newline,
    Eof,
    /// Anything the scanner could not classify.
    Unexpected,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// For `StringLit` this is the unescaped value, otherwise the raw lexeme.
    pub text: String,
    pub span: Span,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

/// Scan source text into a token stream ending with `Eof`. Never fails.
pub fn lex(source: &str) -> Vec<Token> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token(source);
        let done = token.kind == TokenKind::Eof;
        // Collapse newline runs
        if token.kind == TokenKind::Newline
            && tokens.last().map(|t: &Token| t.kind) == Some(TokenKind::Newline)
        {
            if done {
                break;
            }
            continue;
        }
        tokens.push(token);
        if done {
            break;
        }
    }
    tokens
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn span_from(&self, start: usize, line: usize) -> Span {
        Span::new(start, self.pos, line)
    }

    fn next_token(&mut self, source: &str) -> Token {
        self.skip_trivia();

        let start = self.pos;
        let line = self.line;
        let c = match self.bump() {
            Some(c) => c,
            None => {
                return Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    span: Span::new(start, start, line),
                }
            }
        };

        let kind = match c {
            b'\n' => {
                self.line += 1;
                TokenKind::Newline
            }
            b'=' => TokenKind::Assign,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'\'' => return self.string_token(start, line),
            b'0'..=b'9' => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
                let text = &source[start..self.pos];
                // Reject values that do not fit an i64
                if text.parse::<i64>().is_ok() {
                    TokenKind::IntLit
                } else {
                    TokenKind::Unexpected
                }
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
                    self.pos += 1;
                }
                keyword_or_identifier(&source[start..self.pos])
            }
            _ => {
                // Consume the remainder of a multi-byte scalar so the lexeme
                // slice below stays on a char boundary
                let extra = utf8_len(c).saturating_sub(1).min(self.src.len() - self.pos);
                self.pos += extra;
                TokenKind::Unexpected
            }
        };

        Token {
            kind,
            text: source[start..self.pos].to_string(),
            span: self.span_from(start, line),
        }
    }

    /// Single-quoted string with `\'`, `\\` and `\n` escapes. An unterminated
    /// string (newline or end of input before the closing quote) yields an
    /// `Unexpected` token covering the opening quote to the break point.
    fn string_token(&mut self, start: usize, line: usize) -> Token {
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Token {
                        kind: TokenKind::Unexpected,
                        text: value,
                        span: self.span_from(start, line),
                    };
                }
                Some(b'\'') => {
                    self.pos += 1;
                    return Token {
                        kind: TokenKind::StringLit,
                        text: value,
                        span: self.span_from(start, line),
                    };
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.bump() {
                        Some(b'\'') => value.push('\''),
                        Some(b'\\') => value.push('\\'),
                        Some(b'n') => value.push('\n'),
                        Some(other) => {
                            value.push('\\');
                            value.push(other as char);
                        }
                        None => {}
                    }
                }
                Some(first) => {
                    // Consume one UTF-8 scalar, not one byte
                    let take = utf8_len(first).min(self.src.len() - self.pos);
                    let slice = &self.src[self.pos..self.pos + take];
                    value.push_str(&String::from_utf8_lossy(slice));
                    self.pos += take;
                }
            }
        }
    }

    /// Skip spaces, tabs, carriage returns, and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

fn keyword_or_identifier(text: &str) -> TokenKind {
    match text {
        "targetScope" => TokenKind::TargetScope,
        "param" => TokenKind::Param,
        "var" => TokenKind::Var,
        "resource" => TokenKind::Resource,
        "output" => TokenKind::Output,
        "module" => TokenKind::Module,
        "import" => TokenKind::Import,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => TokenKind::Identifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lexer_declaration() {
        let tokens = lex("param location string = 'global'");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Param,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::StringLit,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[4].text, "global");
    }

    #[test]
    fn test_lexer_keywords() {
        assert_eq!(
            kinds("targetScope var resource output module import"),
            vec![
                TokenKind::TargetScope,
                TokenKind::Var,
                TokenKind::Resource,
                TokenKind::Output,
                TokenKind::Module,
                TokenKind::Import,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_collapses_newlines() {
        assert_eq!(
            kinds("a\n\n\nb"),
            vec![
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_string_escapes() {
        let tokens = lex(r"var x = 'it\'s\na test\\'");
        let s = &tokens[3];
        assert_eq!(s.kind, TokenKind::StringLit);
        assert_eq!(s.text, "it's\na test\\");
    }

    #[test]
    fn test_lexer_unterminated_string() {
        let tokens = lex("var x = 'oops\nvar y = 1");
        assert_eq!(tokens[3].kind, TokenKind::Unexpected);
        // Scanning resumes on the next line
        assert!(tokens.iter().any(|t| t.kind == TokenKind::IntLit));
    }

    #[test]
    fn test_lexer_comments_skipped() {
        assert_eq!(
            kinds("var x = 1 // trailing\n// full line\nvar y = 2"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::IntLit,
                TokenKind::Newline,
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::IntLit,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lexer_line_tracking() {
        let tokens = lex("var a = 1\nvar b = 2");
        let second_var = &tokens[5];
        assert_eq!(second_var.kind, TokenKind::Var);
        assert_eq!(second_var.span.line, 2);
    }

    #[test]
    fn test_lexer_unknown_character() {
        let tokens = lex("var x = €");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Unexpected));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_lexer_int_overflow_is_unexpected() {
        let tokens = lex("var x = 99999999999999999999999999");
        assert_eq!(tokens[3].kind, TokenKind::Unexpected);
    }

    proptest! {
        /// The scanner is total: any input produces a token stream that ends
        /// with Eof and covers in-bounds spans.
        #[test]
        fn test_lexer_total(source in ".{0,200}") {
            let tokens = lex(&source);
            prop_assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
            for t in &tokens {
                prop_assert!(t.span.end <= source.len());
                prop_assert!(t.span.start <= t.span.end);
            }
        }
    }
}
