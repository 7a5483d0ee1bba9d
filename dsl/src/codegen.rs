//! Code generation: serialize the decision tries into Rust source.
//!
//! The output is one free function per internal term, generic over a
//! `Context` trait that carries the extern constructors and extractors. The
//! dispatch body is a nest of `if let` tests mirroring the trie; the first
//! leaf reached returns.

use crate::sema::Sema;
use crate::trie::{TermTrie, Test, TrieEntry, TrieNode};
use std::fmt::Write;

/// Emit the Rust source for the analyzed rule set.
pub fn emit(sema: &Sema, tries: &[TermTrie]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Generated by the rule compiler. Do not edit.");
    let _ = writeln!(out);

    emit_context_trait(sema, &mut out);
    for trie in tries {
        emit_term(sema, trie, &mut out);
    }
    out
}

fn emit_context_trait(sema: &Sema, out: &mut String) {
    let _ = writeln!(
        out,
        "/// External constructors and extractors the rules call into."
    );
    let _ = writeln!(out, "pub trait Context {{");
    for term in &sema.terms {
        if let Some(func) = &term.constructor {
            let args: Vec<String> = term
                .args
                .iter()
                .enumerate()
                .map(|(i, ty)| format!("arg{i}: {ty}"))
                .collect();
            let _ = writeln!(
                out,
                "    fn {func}(&mut self, {}) -> {};",
                args.join(", "),
                term.ret
            );
        }
        if let Some(func) = &term.extractor {
            let outputs = tuple_of(&term.args);
            let _ = writeln!(
                out,
                "    fn {func}(&mut self, value: {}) -> Option<{outputs}>;",
                term.ret
            );
        }
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
}

fn tuple_of(tys: &[String]) -> String {
    match tys.len() {
        0 => "()".to_string(),
        1 => tys[0].clone(),
        _ => format!("({})", tys.join(", ")),
    }
}

fn emit_term(sema: &Sema, trie: &TermTrie, out: &mut String) {
    let sig = &sema.terms[trie.term];
    let args: Vec<String> = sig
        .args
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("a{i}: {ty}"))
        .collect();
    let _ = writeln!(
        out,
        "/// The generated dispatch for `{}`: {} rule(s).",
        sig.name,
        trie.order.len()
    );
    let _ = writeln!(
        out,
        "pub fn constructor_{}<C: Context>(ctx: &mut C, {}) -> Option<{}> {{",
        sig.name,
        args.join(", "),
        sig.ret
    );
    emit_node(sema, &trie.root, 1, out);
    let _ = writeln!(out, "    None");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn emit_node(sema: &Sema, node: &TrieNode, depth: usize, out: &mut String) {
    for entry in &node.entries {
        match entry {
            TrieEntry::Decision { test, node } => {
                match test {
                    Test::Extract {
                        term,
                        input,
                        outputs,
                    } => {
                        let func = sema.terms[*term]
                            .extractor
                            .as_ref()
                            .expect("validated by sema");
                        indent(out, depth);
                        let binding = match outputs.len() {
                            0 => "()".to_string(),
                            1 => outputs[0].clone(),
                            _ => format!("({})", outputs.join(", ")),
                        };
                        let _ = writeln!(
                            out,
                            "if let Some({binding}) = ctx.{func}({input}) {{"
                        );
                    }
                    Test::EqInt { input, value } => {
                        indent(out, depth);
                        let _ = writeln!(out, "if {input} == {value} {{");
                    }
                }
                emit_node(sema, node, depth + 1, out);
                indent(out, depth);
                let _ = writeln!(out, "}}");
            }
            TrieEntry::Leaf { rule, bindings } => {
                let rule = &sema.rules[*rule];
                let expr = emit_expr(sema, &rule.expr, bindings);
                indent(out, depth);
                let _ = writeln!(out, "return Some({expr});");
                // Entries after an unconditional leaf are shadowed.
                return;
            }
        }
    }
}

fn emit_expr(
    sema: &Sema,
    expr: &crate::ast::Expr,
    bindings: &[(String, String)],
) -> String {
    match expr {
        crate::ast::Expr::Var { name, .. } => bindings
            .iter()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value.clone())
            .expect("validated by sema"),
        crate::ast::Expr::ConstInt { value, .. } => format!("{value}"),
        crate::ast::Expr::Term { sym, args, .. } => {
            let term = sema.term(sym).expect("validated by sema");
            let sig = &sema.terms[term];
            let args: Vec<String> = args
                .iter()
                .map(|arg| emit_expr(sema, arg, bindings))
                .collect();
            match &sig.constructor {
                Some(func) => format!("ctx.{func}({})", args.join(", ")),
                // An internal term with rules dispatches recursively.
                None => format!(
                    "constructor_{}(ctx, {})?",
                    sig.name,
                    args.join(", ")
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::sema::analyze;
    use crate::trie::build_tries;

    fn compile(src: &str) -> String {
        let sema = analyze(&parse(lex(src).unwrap()).unwrap()).unwrap();
        let tries = build_tries(&sema);
        super::emit(&sema, &tries)
    }

    const PRELUDE: &str = r#"
        (type Value extern)
        (decl lower (Value) Value)
        (decl iadd (Value Value) Value)
        (extern extractor iadd extract_iadd)
        (decl imm (Value) Value)
        (extern extractor imm extract_imm)
        (decl add_ri (Value Value) Value)
        (extern constructor add_ri emit_add_ri)
        (decl add_rr (Value Value) Value)
        (extern constructor add_rr emit_add_rr)
    "#;

    #[test]
    fn generates_trait_and_dispatch() {
        let out = compile(&format!(
            "{PRELUDE}(rule (lower (iadd x y)) (add_rr x y))"
        ));
        assert!(out.contains("pub trait Context"));
        assert!(out.contains("fn extract_iadd(&mut self, value: Value) -> Option<(Value, Value)>;"));
        assert!(out.contains("fn emit_add_rr(&mut self, arg0: Value, arg1: Value) -> Value;"));
        assert!(out.contains("pub fn constructor_lower<C: Context>(ctx: &mut C, a0: Value) -> Option<Value>"));
        assert!(out.contains("if let Some((a0_0, a0_1)) = ctx.extract_iadd(a0)"));
        assert!(out.contains("return Some(ctx.emit_add_rr(a0_0, a0_1));"));
    }

    #[test]
    fn more_specific_rule_is_tested_first() {
        let out = compile(&format!(
            "{PRELUDE}\
             (rule (lower (iadd x y)) (add_rr x y))\n\
             (rule (lower (iadd x (imm c))) (add_ri x c))"
        ));
        // The immediate form's test appears before the general fallback.
        let imm_at = out.find("extract_imm").unwrap();
        let rr_at = out.find("emit_add_rr").unwrap();
        let ri_at = out.find("emit_add_ri").unwrap();
        assert!(imm_at < rr_at);
        assert!(ri_at < rr_at);
    }

    #[test]
    fn integer_literal_patterns_compare() {
        let out = compile(&format!(
            "{PRELUDE}\
             (rule (lower (iadd x (imm 0))) x)\n\
             (rule (lower (iadd x y)) (add_rr x y))"
        ));
        assert!(out.contains("if a0_1_0 == 0"));
    }
}
