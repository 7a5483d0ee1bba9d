//! Lexer for the DSL's S-expression surface.

use crate::error::{Errors, Pos};

/// A token with its source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// Position of the token's first character.
    pub pos: Pos,
    /// The token itself.
    pub kind: TokenKind,
}

/// The kinds of token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// `(`.
    LParen,
    /// `)`.
    RParen,
    /// An identifier: anything that is not whitespace, parens, or a number.
    Symbol(String),
    /// An integer literal, decimal or `0x` hexadecimal, possibly negative.
    Int(i128),
}

fn is_symbol_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && c != ';'
}

/// Tokenize `src`. Comments run from `;` to the end of the line.
pub fn lex(src: &str) -> Result<Vec<Token>, Errors> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    let mut line = 1usize;
    let mut col = 1usize;

    macro_rules! bump {
        () => {{
            let c = chars.next();
            if c == Some('\n') {
                line += 1;
                col = 1;
            } else if c.is_some() {
                col += 1;
            }
            c
        }};
    }

    while let Some(&c) = chars.peek() {
        let pos = Pos { line, col };
        match c {
            '(' => {
                bump!();
                tokens.push(Token {
                    pos,
                    kind: TokenKind::LParen,
                });
            }
            ')' => {
                bump!();
                tokens.push(Token {
                    pos,
                    kind: TokenKind::RParen,
                });
            }
            ';' => {
                // Comment to end of line.
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    bump!();
                }
            }
            c if c.is_whitespace() => {
                bump!();
            }
            _ => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_symbol_char(c) {
                        break;
                    }
                    text.push(c);
                    bump!();
                }
                debug_assert!(!text.is_empty());

                // A leading digit (or sign followed by a digit) makes it a
                // number.
                let looks_numeric = text
                    .strip_prefix('-')
                    .unwrap_or(&text)
                    .starts_with(|c: char| c.is_ascii_digit());
                if looks_numeric {
                    let value = parse_int(&text)
                        .ok_or_else(|| Errors::one(pos, format!("bad integer literal `{text}`")))?;
                    tokens.push(Token {
                        pos,
                        kind: TokenKind::Int(value),
                    });
                } else {
                    tokens.push(Token {
                        pos,
                        kind: TokenKind::Symbol(text),
                    });
                }
            }
        }
    }
    Ok(tokens)
}

fn parse_int(text: &str) -> Option<i128> {
    let (neg, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i128::from_str_radix(&hex.replace('_', ""), 16).ok()?
    } else {
        body.replace('_', "").parse::<i128>().ok()?
    };
    Some(if neg { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            kinds("(rule (lower x) 42)"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol("rule".into()),
                TokenKind::LParen,
                TokenKind::Symbol("lower".into()),
                TokenKind::Symbol("x".into()),
                TokenKind::RParen,
                TokenKind::Int(42),
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn comments_and_positions() {
        let tokens = lex(";; header\n(x)\n").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].pos, Pos { line: 2, col: 1 });
        assert_eq!(tokens[1].pos, Pos { line: 2, col: 2 });
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1 -2 0x10 1_000"), vec![
            TokenKind::Int(1),
            TokenKind::Int(-2),
            TokenKind::Int(16),
            TokenKind::Int(1000),
        ]);
        assert!(lex("12abc").is_err());
    }

    #[test]
    fn dashes_are_symbols() {
        assert_eq!(
            kinds("imm12-from-value -"),
            vec![
                TokenKind::Symbol("imm12-from-value".into()),
                TokenKind::Symbol("-".into())
            ]
        );
    }
}
