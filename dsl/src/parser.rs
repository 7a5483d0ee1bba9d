//! Recursive-descent parser from tokens to the AST.

use crate::ast::{Def, Expr, Pattern, Rule};
use crate::error::{Errors, Pos};
use crate::lexer::{Token, TokenKind};

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

/// Parse a token stream into definitions.
pub fn parse(tokens: Vec<Token>) -> Result<Vec<Def>, Errors> {
    let mut parser = Parser { tokens, at: 0 };
    let mut defs = Vec::new();
    while !parser.done() {
        defs.push(parser.def()?);
    }
    Ok(defs)
}

impl Parser {
    fn done(&self) -> bool {
        self.at >= self.tokens.len()
    }

    fn pos(&self) -> Pos {
        self.tokens
            .get(self.at)
            .map(|t| t.pos)
            .or_else(|| self.tokens.last().map(|t| t.pos))
            .unwrap_or_default()
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.at).map(|t| &t.kind)
    }

    fn next(&mut self) -> Result<Token, Errors> {
        let token = self
            .tokens
            .get(self.at)
            .cloned()
            .ok_or_else(|| Errors::one(self.pos(), "unexpected end of input"))?;
        self.at += 1;
        Ok(token)
    }

    fn expect_lparen(&mut self) -> Result<Pos, Errors> {
        let token = self.next()?;
        match token.kind {
            TokenKind::LParen => Ok(token.pos),
            other => Err(Errors::one(token.pos, format!("expected `(`, found {other:?}"))),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), Errors> {
        let token = self.next()?;
        match token.kind {
            TokenKind::RParen => Ok(()),
            other => Err(Errors::one(token.pos, format!("expected `)`, found {other:?}"))),
        }
    }

    fn symbol(&mut self) -> Result<(Pos, String), Errors> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Symbol(s) => Ok((token.pos, s)),
            other => Err(Errors::one(
                token.pos,
                format!("expected a symbol, found {other:?}"),
            )),
        }
    }

    fn def(&mut self) -> Result<Def, Errors> {
        let pos = self.expect_lparen()?;
        let (kw_pos, keyword) = self.symbol()?;
        let def = match keyword.as_str() {
            "type" => {
                let (_, name) = self.symbol()?;
                let (epos, ext) = self.symbol()?;
                if ext != "extern" {
                    return Err(Errors::one(epos, "only extern types are supported"));
                }
                Def::Type { pos, name }
            }
            "decl" => {
                let (_, name) = self.symbol()?;
                self.expect_lparen()?;
                let mut args = Vec::new();
                while self.peek() != Some(&TokenKind::RParen) {
                    let (_, arg) = self.symbol()?;
                    args.push(arg);
                }
                self.expect_rparen()?;
                let (_, ret) = self.symbol()?;
                Def::Decl {
                    pos,
                    name,
                    args,
                    ret,
                }
            }
            "extern" => {
                let (kpos, kind) = self.symbol()?;
                let (_, term) = self.symbol()?;
                let (_, func) = self.symbol()?;
                match kind.as_str() {
                    "constructor" => Def::ExternConstructor { pos, term, func },
                    "extractor" => Def::ExternExtractor { pos, term, func },
                    other => {
                        return Err(Errors::one(
                            kpos,
                            format!("unknown extern kind `{other}`"),
                        ))
                    }
                }
            }
            "rule" => {
                // Optional integer priority.
                let prio = if let Some(TokenKind::Int(p)) = self.peek() {
                    let p = *p;
                    self.next()?;
                    i64::try_from(p)
                        .map_err(|_| Errors::one(pos, "priority out of range"))?
                } else {
                    0
                };
                let pattern = self.pattern()?;
                let expr = self.expr()?;
                Def::Rule(Rule {
                    pos,
                    prio,
                    pattern,
                    expr,
                })
            }
            other => {
                return Err(Errors::one(
                    kw_pos,
                    format!("unknown definition form `{other}`"),
                ))
            }
        };
        self.expect_rparen()?;
        Ok(def)
    }

    fn pattern(&mut self) -> Result<Pattern, Errors> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Int(value) => Ok(Pattern::ConstInt {
                pos: token.pos,
                value,
            }),
            TokenKind::Symbol(name) if name == "_" => Ok(Pattern::Wildcard { pos: token.pos }),
            TokenKind::Symbol(name) => Ok(Pattern::Var {
                pos: token.pos,
                name,
            }),
            TokenKind::LParen => {
                let (spos, sym) = self.symbol()?;
                if sym == "and" {
                    let mut subpats = Vec::new();
                    while self.peek() != Some(&TokenKind::RParen) {
                        subpats.push(self.pattern()?);
                    }
                    self.expect_rparen()?;
                    if subpats.is_empty() {
                        return Err(Errors::one(spos, "`and` needs at least one sub-pattern"));
                    }
                    Ok(Pattern::And {
                        pos: token.pos,
                        subpats,
                    })
                } else {
                    let mut args = Vec::new();
                    while self.peek() != Some(&TokenKind::RParen) {
                        args.push(self.pattern()?);
                    }
                    self.expect_rparen()?;
                    Ok(Pattern::Term {
                        pos: token.pos,
                        sym,
                        args,
                    })
                }
            }
            TokenKind::RParen => Err(Errors::one(token.pos, "unexpected `)` in pattern")),
        }
    }

    fn expr(&mut self) -> Result<Expr, Errors> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Int(value) => Ok(Expr::ConstInt {
                pos: token.pos,
                value,
            }),
            TokenKind::Symbol(name) => Ok(Expr::Var {
                pos: token.pos,
                name,
            }),
            TokenKind::LParen => {
                let (_, sym) = self.symbol()?;
                let mut args = Vec::new();
                while self.peek() != Some(&TokenKind::RParen) {
                    args.push(self.expr()?);
                }
                self.expect_rparen()?;
                Ok(Expr::Term {
                    pos: token.pos,
                    sym,
                    args,
                })
            }
            TokenKind::RParen => Err(Errors::one(token.pos, "unexpected `)` in expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_str(src: &str) -> Result<Vec<Def>, Errors> {
        parse(lex(src).unwrap())
    }

    #[test]
    fn parses_decl_and_rule() {
        let defs = parse_str(
            "(decl lower (Value) Inst)\n(rule 10 (lower (iadd x _)) (add_inst x))",
        )
        .unwrap();
        assert_eq!(defs.len(), 2);
        match &defs[0] {
            Def::Decl { name, args, ret, .. } => {
                assert_eq!(name, "lower");
                assert_eq!(args, &["Value".to_string()]);
                assert_eq!(ret, "Inst");
            }
            other => panic!("unexpected def {other:?}"),
        }
        match &defs[1] {
            Def::Rule(rule) => {
                assert_eq!(rule.prio, 10);
                match &rule.pattern {
                    Pattern::Term { sym, args, .. } => {
                        assert_eq!(sym, "lower");
                        assert_eq!(args.len(), 1);
                    }
                    other => panic!("unexpected pattern {other:?}"),
                }
            }
            other => panic!("unexpected def {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_forms() {
        assert!(parse_str("(frobnicate a b)").is_err());
        assert!(parse_str("(extern destructor t f)").is_err());
        assert!(parse_str("(rule (f x)").is_err());
    }

    #[test]
    fn and_patterns() {
        let defs = parse_str("(rule (lower (and x (iadd a b))) x)").unwrap();
        match &defs[0] {
            Def::Rule(rule) => match &rule.pattern {
                Pattern::Term { args, .. } => {
                    assert!(matches!(args[0], Pattern::And { .. }));
                }
                other => panic!("unexpected pattern {other:?}"),
            },
            other => panic!("unexpected def {other:?}"),
        }
    }
}
