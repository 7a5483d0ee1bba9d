//! Abstract syntax tree for the rule DSL.

use crate::error::Pos;

/// A top-level definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Def {
    /// `(type NAME extern)`: declare an extern type.
    Type {
        /// Where the definition starts.
        pos: Pos,
        /// The type name.
        name: String,
    },
    /// `(decl NAME (ARG-TYPES...) RET-TYPE)`: declare a term.
    Decl {
        /// Where the definition starts.
        pos: Pos,
        /// The term name.
        name: String,
        /// Argument type names.
        args: Vec<String>,
        /// Return type name.
        ret: String,
    },
    /// `(extern constructor TERM RUST-FN)`: bind a term's construction to a
    /// Rust function on the context.
    ExternConstructor {
        /// Where the definition starts.
        pos: Pos,
        /// The term.
        term: String,
        /// The Rust function name.
        func: String,
    },
    /// `(extern extractor TERM RUST-FN)`: bind a term's matching to a Rust
    /// function that inverts it, returning the argument bindings.
    ExternExtractor {
        /// Where the definition starts.
        pos: Pos,
        /// The term.
        term: String,
        /// The Rust function name.
        func: String,
    },
    /// `(rule PRIO? PATTERN EXPR)`.
    Rule(Rule),
}

/// One rewrite rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    /// Where the rule starts.
    pub pos: Pos,
    /// Explicit priority; rules without one default to 0.
    pub prio: i64,
    /// The left-hand side.
    pub pattern: Pattern,
    /// The right-hand side.
    pub expr: Expr,
}

/// A left-hand-side pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pattern {
    /// Bind (or, on a repeated name, require equality with) a variable.
    Var {
        /// Position.
        pos: Pos,
        /// Variable name.
        name: String,
    },
    /// Match anything, bind nothing.
    Wildcard {
        /// Position.
        pos: Pos,
    },
    /// Match an integer constant.
    ConstInt {
        /// Position.
        pos: Pos,
        /// The value.
        value: i128,
    },
    /// Match a term: the term's extractor must succeed and the
    /// sub-patterns match its outputs.
    Term {
        /// Position.
        pos: Pos,
        /// The term name.
        sym: String,
        /// Sub-patterns over the extracted arguments.
        args: Vec<Pattern>,
    },
    /// Match every sub-pattern against the same value.
    And {
        /// Position.
        pos: Pos,
        /// The conjuncts.
        subpats: Vec<Pattern>,
    },
}

impl Pattern {
    /// Position of this pattern.
    pub fn pos(&self) -> Pos {
        match self {
            Pattern::Var { pos, .. }
            | Pattern::Wildcard { pos }
            | Pattern::ConstInt { pos, .. }
            | Pattern::Term { pos, .. }
            | Pattern::And { pos, .. } => *pos,
        }
    }

    /// How specific is this pattern? Counts the structure a value must
    /// exhibit to match: terms and constants score, variables and
    /// wildcards don't.
    pub fn specificity(&self) -> u32 {
        match self {
            Pattern::Var { .. } | Pattern::Wildcard { .. } => 0,
            Pattern::ConstInt { .. } => 1,
            Pattern::Term { args, .. } => {
                1 + args.iter().map(Pattern::specificity).sum::<u32>()
            }
            Pattern::And { subpats, .. } => {
                subpats.iter().map(Pattern::specificity).sum::<u32>()
            }
        }
    }
}

/// A right-hand-side expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// A bound variable.
    Var {
        /// Position.
        pos: Pos,
        /// The variable.
        name: String,
    },
    /// An integer constant.
    ConstInt {
        /// Position.
        pos: Pos,
        /// The value.
        value: i128,
    },
    /// A term construction.
    Term {
        /// Position.
        pos: Pos,
        /// The term name.
        sym: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Position of this expression.
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Var { pos, .. } | Expr::ConstInt { pos, .. } | Expr::Term { pos, .. } => *pos,
        }
    }
}
