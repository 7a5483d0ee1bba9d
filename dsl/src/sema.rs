//! Semantic analysis: type and term resolution, rule validation.

use crate::ast::{Def, Expr, Pattern, Rule};
use crate::error::{Error, Errors, Pos};
use std::collections::HashMap;

/// A declared term and its bindings.
#[derive(Clone, Debug)]
pub struct TermSig {
    /// The term name.
    pub name: String,
    /// Argument type names.
    pub args: Vec<String>,
    /// Return type name.
    pub ret: String,
    /// Rust constructor bound with `(extern constructor ...)`.
    pub constructor: Option<String>,
    /// Rust extractor bound with `(extern extractor ...)`.
    pub extractor: Option<String>,
    /// Does any rule define this term's construction?
    pub has_rules: bool,
}

/// A validated rule.
#[derive(Clone, Debug)]
pub struct CheckedRule {
    /// Index of the root term in `Sema::terms`.
    pub root: usize,
    /// Priority (0 when unspecified).
    pub prio: i64,
    /// Declaration order among all rules.
    pub decl_index: usize,
    /// The validated pattern (root term application).
    pub pattern: Pattern,
    /// The validated right-hand side.
    pub expr: Expr,
    /// Variable types bound by the pattern.
    pub bindings: HashMap<String, String>,
}

/// The output of semantic analysis.
#[derive(Clone, Debug, Default)]
pub struct Sema {
    /// Extern type names, in declaration order.
    pub types: Vec<String>,
    /// Terms, in declaration order.
    pub terms: Vec<TermSig>,
    /// Validated rules, in declaration order.
    pub rules: Vec<CheckedRule>,
}

impl Sema {
    /// Find a term by name.
    pub fn term(&self, name: &str) -> Option<usize> {
        self.terms.iter().position(|t| t.name == name)
    }
}

/// Run semantic analysis over the parsed definitions.
pub fn analyze(defs: &[Def]) -> Result<Sema, Errors> {
    let mut sema = Sema::default();
    let mut errors: Vec<Error> = Vec::new();

    // First pass: types and terms.
    for def in defs {
        match def {
            Def::Type { pos, name } => {
                if sema.types.contains(name) {
                    errors.push(Error::new(*pos, format!("type `{name}` already declared")));
                } else {
                    sema.types.push(name.clone());
                }
            }
            Def::Decl {
                pos,
                name,
                args,
                ret,
            } => {
                if sema.term(name).is_some() {
                    errors.push(Error::new(*pos, format!("term `{name}` already declared")));
                    continue;
                }
                for ty in args.iter().chain(Some(ret)) {
                    if !sema.types.contains(ty) {
                        errors.push(Error::new(*pos, format!("unknown type `{ty}`")));
                    }
                }
                sema.terms.push(TermSig {
                    name: name.clone(),
                    args: args.clone(),
                    ret: ret.clone(),
                    constructor: None,
                    extractor: None,
                    has_rules: false,
                });
            }
            _ => {}
        }
    }

    // Second pass: extern bindings.
    for def in defs {
        match def {
            Def::ExternConstructor { pos, term, func } => {
                match sema.term(term) {
                    Some(ix) => {
                        let sig = &mut sema.terms[ix];
                        if sig.constructor.is_some() {
                            errors.push(Error::new(
                                *pos,
                                format!("term `{term}` already has a constructor"),
                            ));
                        } else {
                            sig.constructor = Some(func.clone());
                        }
                    }
                    None => errors.push(Error::new(*pos, format!("unknown term `{term}`"))),
                }
            }
            Def::ExternExtractor { pos, term, func } => match sema.term(term) {
                Some(ix) => {
                    let sig = &mut sema.terms[ix];
                    if sig.extractor.is_some() {
                        errors.push(Error::new(
                            *pos,
                            format!("term `{term}` already has an extractor"),
                        ));
                    } else {
                        sig.extractor = Some(func.clone());
                    }
                }
                None => errors.push(Error::new(*pos, format!("unknown term `{term}`"))),
            },
            _ => {}
        }
    }

    // Third pass: rules.
    let mut decl_index = 0;
    for def in defs {
        if let Def::Rule(rule) = def {
            match check_rule(&sema, rule, decl_index) {
                Ok(checked) => {
                    let root = checked.root;
                    sema.rules.push(checked);
                    sema.terms[root].has_rules = true;
                }
                Err(mut errs) => errors.append(&mut errs.0),
            }
            decl_index += 1;
        }
    }

    if errors.is_empty() {
        Ok(sema)
    } else {
        Err(Errors(errors))
    }
}

fn check_rule(sema: &Sema, rule: &Rule, decl_index: usize) -> Result<CheckedRule, Errors> {
    // The left-hand side must be an application of a declared internal
    // term.
    let (root_sym, root_args, root_pos) = match &rule.pattern {
        Pattern::Term { sym, args, pos } => (sym, args, *pos),
        other => {
            return Err(Errors::one(
                other.pos(),
                "rule left-hand side must be a term application",
            ))
        }
    };
    let root = sema
        .term(root_sym)
        .ok_or_else(|| Errors::one(root_pos, format!("unknown term `{root_sym}`")))?;
    let root_sig = &sema.terms[root];
    if root_sig.extractor.is_some() || root_sig.constructor.is_some() {
        return Err(Errors::one(
            root_pos,
            format!("term `{root_sym}` is extern; rules can only define internal terms"),
        ));
    }
    if root_args.len() != root_sig.args.len() {
        return Err(Errors::one(
            root_pos,
            format!(
                "term `{root_sym}` takes {} arguments, pattern has {}",
                root_sig.args.len(),
                root_args.len()
            ),
        ));
    }

    let mut bindings: HashMap<String, String> = HashMap::new();
    for (pat, ty) in root_args.iter().zip(&root_sig.args) {
        check_pattern(sema, pat, ty, &mut bindings)?;
    }

    let expr_ty = check_expr(sema, &rule.expr, &bindings)?;
    if let Some(expr_ty) = expr_ty {
        if expr_ty != root_sig.ret {
            return Err(Errors::one(
                rule.expr.pos(),
                format!(
                    "rule produces `{expr_ty}`, term `{root_sym}` returns `{}`",
                    root_sig.ret
                ),
            ));
        }
    }

    Ok(CheckedRule {
        root,
        prio: rule.prio,
        decl_index,
        pattern: rule.pattern.clone(),
        expr: rule.expr.clone(),
        bindings,
    })
}

fn check_pattern(
    sema: &Sema,
    pattern: &Pattern,
    expected_ty: &str,
    bindings: &mut HashMap<String, String>,
) -> Result<(), Errors> {
    match pattern {
        Pattern::Wildcard { .. } | Pattern::ConstInt { .. } => Ok(()),
        Pattern::Var { pos, name } => {
            if let Some(prev) = bindings.get(name) {
                return Err(Errors::one(
                    *pos,
                    format!("variable `{name}` is already bound (as `{prev}`)"),
                ));
            }
            bindings.insert(name.clone(), expected_ty.to_string());
            Ok(())
        }
        Pattern::Term { pos, sym, args } => {
            let ix = sema
                .term(sym)
                .ok_or_else(|| Errors::one(*pos, format!("unknown term `{sym}`")))?;
            let sig = &sema.terms[ix];
            if sig.extractor.is_none() {
                return Err(Errors::one(
                    *pos,
                    format!("term `{sym}` has no extractor; it cannot appear in a pattern"),
                ));
            }
            if sig.ret != expected_ty {
                return Err(Errors::one(
                    *pos,
                    format!("pattern of type `{}` used where `{expected_ty}` is expected", sig.ret),
                ));
            }
            if args.len() != sig.args.len() {
                return Err(Errors::one(
                    *pos,
                    format!(
                        "term `{sym}` takes {} arguments, pattern has {}",
                        sig.args.len(),
                        args.len()
                    ),
                ));
            }
            for (arg, ty) in args.iter().zip(&sig.args) {
                check_pattern(sema, arg, ty, bindings)?;
            }
            Ok(())
        }
        Pattern::And { subpats, .. } => {
            for sub in subpats {
                check_pattern(sema, sub, expected_ty, bindings)?;
            }
            Ok(())
        }
    }
}

fn check_expr(
    sema: &Sema,
    expr: &Expr,
    bindings: &HashMap<String, String>,
) -> Result<Option<String>, Errors> {
    match expr {
        Expr::Var { pos, name } => bindings
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| Errors::one(*pos, format!("unbound variable `{name}`"))),
        // Integer literals take whatever type context they land in.
        Expr::ConstInt { .. } => Ok(None),
        Expr::Term { pos, sym, args } => {
            let ix = sema
                .term(sym)
                .ok_or_else(|| Errors::one(*pos, format!("unknown term `{sym}`")))?;
            let sig = &sema.terms[ix];
            if sig.constructor.is_none() && sig.extractor.is_some() {
                return Err(Errors::one(
                    *pos,
                    format!("term `{sym}` is an extractor; it cannot be constructed"),
                ));
            }
            if args.len() != sig.args.len() {
                return Err(Errors::one(
                    *pos,
                    format!(
                        "term `{sym}` takes {} arguments, call has {}",
                        sig.args.len(),
                        args.len()
                    ),
                ));
            }
            for (arg, ty) in args.iter().zip(&sig.args) {
                if let Some(actual) = check_expr(sema, arg, bindings)? {
                    if &actual != ty {
                        return Err(Errors::one(
                            arg.pos(),
                            format!("argument of type `{actual}` where `{ty}` is expected"),
                        ));
                    }
                }
            }
            Ok(Some(sig.ret.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn analyze_str(src: &str) -> Result<Sema, Errors> {
        analyze(&parse(lex(src).unwrap()).unwrap())
    }

    const PRELUDE: &str = r#"
        (type Value extern)
        (decl lower (Value) Value)
        (decl iadd (Value Value) Value)
        (extern extractor iadd extract_iadd)
        (decl add_inst (Value Value) Value)
        (extern constructor add_inst emit_add)
    "#;

    #[test]
    fn accepts_well_formed_rules() {
        let sema =
            analyze_str(&format!("{PRELUDE}(rule (lower (iadd x y)) (add_inst x y))")).unwrap();
        assert_eq!(sema.rules.len(), 1);
        assert_eq!(sema.terms[sema.rules[0].root].name, "lower");
        assert!(sema.terms[sema.term("lower").unwrap()].has_rules);
    }

    #[test]
    fn rejects_arity_mismatch() {
        let err =
            analyze_str(&format!("{PRELUDE}(rule (lower (iadd x)) (add_inst x x))")).unwrap_err();
        assert!(err.to_string().contains("takes 2 arguments"));
    }

    #[test]
    fn rejects_unbound_variable() {
        let err =
            analyze_str(&format!("{PRELUDE}(rule (lower (iadd x _)) (add_inst x q))"))
                .unwrap_err();
        assert!(err.to_string().contains("unbound variable `q`"));
    }

    #[test]
    fn rejects_pattern_without_extractor() {
        let err = analyze_str(&format!(
            "{PRELUDE}(rule (lower (add_inst x y)) (add_inst x y))"
        ))
        .unwrap_err();
        assert!(err.to_string().contains("no extractor"));
    }

    #[test]
    fn rejects_rebinding() {
        let err =
            analyze_str(&format!("{PRELUDE}(rule (lower (iadd x x)) (add_inst x x))"))
                .unwrap_err();
        assert!(err.to_string().contains("already bound"));
    }

    #[test]
    fn rejects_unknown_type_in_decl() {
        let err = analyze_str("(decl f (Mystery) Mystery)").unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }
}
