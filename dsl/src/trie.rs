//! Decision-trie construction.
//!
//! Each internal term's rules compile into one trie. A rule's pattern
//! linearizes into a sequence of tests (extractor applications and constant
//! comparisons) over named intermediate values; rules sharing a test prefix
//! share trie nodes, so the generated dispatch performs each extractor call
//! once per distinct shape.
//!
//! Rule order is the contract downstream code relies on: rules are inserted
//! by descending explicit priority, then descending pattern specificity
//! (more bound structure first), and declaration order breaks remaining
//! ties. Within a node, entries fire in insertion order.

use crate::ast::Pattern;
use crate::sema::Sema;

/// One test in a linearized pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Test {
    /// Apply a term's extractor to `input`, binding `outputs` on success.
    Extract {
        /// The term index in `Sema::terms`.
        term: usize,
        /// The input value's name.
        input: String,
        /// The output value names.
        outputs: Vec<String>,
    },
    /// Compare `input` to an integer constant.
    EqInt {
        /// The input value's name.
        input: String,
        /// The expected value.
        value: i128,
    },
}

/// One entry in a trie node, fired in order.
#[derive(Clone, Debug)]
pub enum TrieEntry {
    /// Perform a test; on success, continue in the sub-trie.
    Decision {
        /// The test to perform.
        test: Test,
        /// The sub-trie on success.
        node: TrieNode,
    },
    /// All tests for this rule passed: fire it.
    Leaf {
        /// Rule index in `Sema::rules`.
        rule: usize,
        /// Variable name -> intermediate value name.
        bindings: Vec<(String, String)>,
    },
}

/// A trie node.
#[derive(Clone, Debug, Default)]
pub struct TrieNode {
    /// The ordered entries.
    pub entries: Vec<TrieEntry>,
}

/// The trie for one internal term.
#[derive(Clone, Debug)]
pub struct TermTrie {
    /// The term index in `Sema::terms`.
    pub term: usize,
    /// Rule indexes in match order.
    pub order: Vec<usize>,
    /// The decision trie.
    pub root: TrieNode,
}

/// The match order for one term's rules: priority, then specificity, then
/// declaration order (stable sort).
pub fn rule_order(sema: &Sema, term: usize) -> Vec<usize> {
    let mut rules: Vec<usize> = (0..sema.rules.len())
        .filter(|&r| sema.rules[r].root == term)
        .collect();
    rules.sort_by_key(|&r| {
        let rule = &sema.rules[r];
        (
            core::cmp::Reverse(rule.prio),
            core::cmp::Reverse(rule.pattern.specificity()),
            rule.decl_index,
        )
    });
    rules
}

/// Build the tries for every term that has rules.
pub fn build_tries(sema: &Sema) -> Vec<TermTrie> {
    let mut tries = Vec::new();
    for term in 0..sema.terms.len() {
        if !sema.terms[term].has_rules {
            continue;
        }
        let order = rule_order(sema, term);
        let mut root = TrieNode::default();
        for &rule_ix in &order {
            let (tests, bindings) = linearize(sema, rule_ix);
            insert(&mut root, &tests, rule_ix, bindings);
        }
        tries.push(TermTrie { term, order, root });
    }
    tries
}

/// Linearize a rule's pattern into its test sequence and variable bindings.
///
/// Intermediate values are named deterministically by their path from the
/// root (`a0`, `a0_1`, ...), so equal prefixes of different rules produce
/// identical test sequences and share trie nodes.
fn linearize(sema: &Sema, rule_ix: usize) -> (Vec<Test>, Vec<(String, String)>) {
    let rule = &sema.rules[rule_ix];
    let root_args = match &rule.pattern {
        Pattern::Term { args, .. } => args,
        _ => unreachable!("validated by sema"),
    };
    let mut tests = Vec::new();
    let mut bindings: Vec<(String, String)> = Vec::new();
    for (i, arg) in root_args.iter().enumerate() {
        let name = format!("a{i}");
        walk(sema, arg, &name, &mut tests, &mut bindings);
    }
    (tests, bindings)
}

fn walk(
    sema: &Sema,
    pattern: &Pattern,
    input: &str,
    tests: &mut Vec<Test>,
    bindings: &mut Vec<(String, String)>,
) {
    match pattern {
        Pattern::Wildcard { .. } => {}
        Pattern::Var { name, .. } => {
            bindings.push((name.clone(), input.to_string()));
        }
        Pattern::ConstInt { value, .. } => {
            tests.push(Test::EqInt {
                input: input.to_string(),
                value: *value,
            });
        }
        Pattern::Term { sym, args, .. } => {
            let term = sema.term(sym).expect("validated by sema");
            let outputs: Vec<String> = (0..args.len())
                .map(|i| format!("{input}_{i}"))
                .collect();
            tests.push(Test::Extract {
                term,
                input: input.to_string(),
                outputs: outputs.clone(),
            });
            for (arg, out) in args.iter().zip(&outputs) {
                walk(sema, arg, out, tests, bindings);
            }
        }
        Pattern::And { subpats, .. } => {
            for sub in subpats {
                walk(sema, sub, input, tests, bindings);
            }
        }
    }
}

fn insert(node: &mut TrieNode, tests: &[Test], rule: usize, bindings: Vec<(String, String)>) {
    match tests.split_first() {
        None => {
            node.entries.push(TrieEntry::Leaf { rule, bindings });
        }
        Some((first, rest)) => {
            // Reuse an existing decision for the same test.
            for entry in node.entries.iter_mut() {
                if let TrieEntry::Decision { test, node: child } = entry {
                    if test == first {
                        insert(child, rest, rule, bindings);
                        return;
                    }
                }
            }
            let mut child = TrieNode::default();
            insert(&mut child, rest, rule, bindings);
            node.entries.push(TrieEntry::Decision {
                test: first.clone(),
                node: child,
            });
        }
    }
}

/// Walk the trie collecting the rule indexes in the order the generated
/// dispatch would try them; used by tests and by downstream tools that
/// inspect the ordering.
pub fn firing_order(node: &TrieNode) -> Vec<usize> {
    let mut out = Vec::new();
    fn rec(node: &TrieNode, out: &mut Vec<usize>) {
        for entry in &node.entries {
            match entry {
                TrieEntry::Leaf { rule, .. } => out.push(*rule),
                TrieEntry::Decision { node, .. } => rec(node, out),
            }
        }
    }
    rec(node, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::sema::analyze;

    fn tries_for(src: &str) -> (Sema, Vec<TermTrie>) {
        let sema = analyze(&parse(lex(src).unwrap()).unwrap()).unwrap();
        let tries = build_tries(&sema);
        (sema, tries)
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
    fn specificity_orders_more_specific_first() {
        // The immediate-form rule is more specific than the general one,
        // whatever the declaration order.
        let src = format!(
            "{PRELUDE}\
             (rule (lower (iadd x y)) (add_rr x y))\n\
             (rule (lower (iadd x (imm c))) (add_ri x c))"
        );
        let (sema, tries) = tries_for(&src);
        let order = &tries[0].order;
        assert_eq!(order.len(), 2);
        // Rule 1 (the imm form) fires first.
        assert_eq!(sema.rules[order[0]].pattern.specificity(), 3);
        assert_eq!(order[0], 1);
        assert_eq!(firing_order(&tries[0].root), vec![1, 0]);
    }

    #[test]
    fn explicit_priority_beats_specificity() {
        let src = format!(
            "{PRELUDE}\
             (rule 10 (lower (iadd x y)) (add_rr x y))\n\
             (rule (lower (iadd x (imm c))) (add_ri x c))"
        );
        let (_, tries) = tries_for(&src);
        assert_eq!(tries[0].order, vec![0, 1]);
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let src = format!(
            "{PRELUDE}\
             (rule (lower (iadd x (imm c))) (add_ri x c))\n\
             (rule (lower (iadd (imm c) x)) (add_ri x c))"
        );
        let (_, tries) = tries_for(&src);
        assert_eq!(tries[0].order, vec![0, 1]);
    }

    #[test]
    fn shared_prefixes_share_nodes() {
        let src = format!(
            "{PRELUDE}\
             (rule (lower (iadd x (imm c))) (add_ri x c))\n\
             (rule (lower (iadd x y)) (add_rr x y))"
        );
        let (_, tries) = tries_for(&src);
        // One top-level decision (the iadd extraction) with both rules
        // below it.
        assert_eq!(tries[0].root.entries.len(), 1);
        match &tries[0].root.entries[0] {
            TrieEntry::Decision { node, .. } => {
                assert_eq!(node.entries.len(), 2);
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }
}
