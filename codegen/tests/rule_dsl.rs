//! The rewrite-rule DSL and the backend agree on dispatch semantics: rule
//! priority and specificity decide the order in which lowering patterns are
//! tried. This test compiles a miniature version of the AArch64 add-lowering
//! rules and checks the generated dispatch's observable order, which the
//! handwritten dispatch in `isa/aarch64/lower_inst.rs` mirrors.

#[test]
fn add_lowering_rules_order_like_the_backend() {
    let src = r#"
        ;; Types and terms for a miniature iadd lowering.
        (type Value extern)
        (type Inst extern)

        (decl lower_iadd (Value Value) Inst)

        (decl imm12 (Value) Value)
        (extern extractor imm12 imm12_from_value)
        (decl imul_pair (Value) Value)
        (extern extractor imul_pair extract_imul)

        (decl add_imm (Value Value) Inst)
        (extern constructor add_imm emit_add_imm)
        (decl madd (Value Value) Inst)
        (extern constructor madd emit_madd)
        (decl add_rr (Value Value) Inst)
        (extern constructor add_rr emit_add_rr)

        ;; The same precedence the backend dispatch uses: immediate form
        ;; first, then the multiply fusion, then the register-register
        ;; fallback.
        (rule (lower_iadd x (imm12 y)) (add_imm x y))
        (rule (lower_iadd x (imul_pair m)) (madd x m))
        (rule (lower_iadd x y) (add_rr x y))
    "#;

    let generated = ingot_dsl::compile(src).expect("rules compile");

    // All three constructors appear, and the fallback comes last.
    let imm_at = generated.find("emit_add_imm").unwrap();
    let madd_at = generated.find("emit_madd").unwrap();
    let rr_at = generated.find("emit_add_rr").unwrap();
    assert!(imm_at < rr_at);
    assert!(madd_at < rr_at);

    // The extractor tests guard the specialized forms.
    assert!(generated.contains("imm12_from_value"));
    assert!(generated.contains("extract_imul"));
    assert!(generated.contains("pub fn constructor_lower_iadd"));
}

#[test]
fn priority_overrides_specificity() {
    let src = r#"
        (type Value extern)
        (decl lower (Value) Value)
        (decl special (Value) Value)
        (extern extractor special extract_special)
        (decl fast_path (Value) Value)
        (extern constructor fast_path emit_fast)
        (decl slow_path (Value) Value)
        (extern constructor slow_path emit_slow)

        ;; The general rule outranks the specific one by explicit priority.
        (rule 100 (lower x) (fast_path x))
        (rule (lower (special x)) (slow_path x))
    "#;
    let generated = ingot_dsl::compile(src).expect("rules compile");
    let fast_at = generated.find("emit_fast").unwrap();
    let slow_at = generated.find("emit_slow").unwrap();
    assert!(
        fast_at < slow_at,
        "priority 100 must fire before the more specific rule"
    );
}
