use super::*;

/// Rewritten inner body, without the `try`/`catch` wrapper.
fn rewritten(source: &str) -> String {
    let guarded = guard_expression(source).unwrap();
    let code = guarded.as_str();
    let start = code.find("try {\n").unwrap() + "try {\n".len();
    let end = code.rfind("\n} catch (e)").unwrap();
    let inner = &code[start..end];
    match guarded.form() {
        ExpressionForm::Expression => inner
            .strip_prefix("return (")
            .and_then(|s| s.strip_suffix(");"))
            .unwrap()
            .to_string(),
        ExpressionForm::Statements => inner
            .strip_prefix("return (() => {\n")
            .and_then(|s| s.strip_suffix("\n})();"))
            .unwrap()
            .to_string(),
    }
}

fn violation(source: &str) -> GuardViolation {
    guard_expression(source).unwrap_err()
}

fn assert_forbidden(source: &str, expected: &str) {
    match violation(source) {
        GuardViolation::ForbiddenProperty { name } => assert_eq!(name, expected, "{source}"),
        other => panic!("expected forbidden property for {source}, got {other:?}"),
    }
}

fn assert_reserved(source: &str) {
    assert!(
        matches!(violation(source), GuardViolation::ReservedIdentifier { .. }),
        "should reject reserved binding in {source}"
    );
}

fn assert_banned(source: &str, expected_rule: &str) {
    match violation(source) {
        GuardViolation::BannedPattern { rule, .. } => assert_eq!(rule, expected_rule, "{source}"),
        other => panic!("expected banned pattern for {source}, got {other:?}"),
    }
}

// --- Wrapping ---

#[test]
fn guard_01_wraps_expression_in_try_catch() {
    let guarded = guard_expression("$json.email").unwrap();
    assert_eq!(guarded.form(), ExpressionForm::Expression);
    assert_eq!(
        guarded.as_str(),
        "var __data = this;\ntry {\nreturn (__data.$json.email);\n} catch (e) {\nreturn E(e, __data);\n}"
    );
}

#[test]
fn guard_02_statement_list_runs_as_function_body() {
    let guarded = guard_expression("const x = 1; return x + y").unwrap();
    assert_eq!(guarded.form(), ExpressionForm::Statements);
    assert_eq!(rewritten("const x = 1; return x + y"), "const x = 1; return x + __data.y");
}

#[test]
fn guard_03_trailing_semicolon_is_still_an_expression() {
    let guarded = guard_expression("a + 1;").unwrap();
    assert_eq!(guarded.form(), ExpressionForm::Expression);
    assert_eq!(rewritten("a + 1;"), "__data.a + 1");
}

#[test]
fn guard_04_lone_string_literal_is_an_expression() {
    let guarded = guard_expression("'hello'").unwrap();
    assert_eq!(guarded.form(), ExpressionForm::Expression);
    assert_eq!(rewritten("'hello'"), "'hello'");
}

// --- Identifier rewriting ---

#[test]
fn guard_05_free_identifiers_resolve_through_data() {
    assert_eq!(rewritten("a + b * c"), "__data.a + __data.b * __data.c");
    assert_eq!(rewritten("$json.items[0].name"), "__data.$json.items[0].name");
}

#[test]
fn guard_06_declared_names_are_left_alone() {
    assert_eq!(
        rewritten("items.map(i => i * factor)"),
        "__data.items.map(i => i * __data.factor)"
    );
    assert_eq!(
        rewritten("(function f(a, { b }, ...rest) { var v = a; return f && v && b && rest && z; })()"),
        "(function f(a, { b }, ...rest) { var v = a; return f && v && b && rest && __data.z; })()"
    );
}

#[test]
fn guard_07_block_scoped_names_do_not_leak() {
    assert_eq!(
        rewritten("{ let t = 1; } return t"),
        "{ let t = 1; } return __data.t"
    );
    assert_eq!(
        rewritten("for (let i = 0; i < n; i++) {} return i"),
        "for (let i = 0; i < __data.n; i++) {} return __data.i"
    );
}

#[test]
fn guard_08_var_hoists_out_of_blocks() {
    assert_eq!(
        rewritten("if (a) { var v = 1; } return v"),
        "if (__data.a) { var v = 1; } return v"
    );
}

#[test]
fn guard_09_catch_parameter_is_local() {
    assert_eq!(
        rewritten("try { x() } catch (err) { return err } return err"),
        "try { __data.x() } catch (err) { return err } return __data.err"
    );
}

#[test]
fn guard_10_native_constants_pass_through() {
    assert_eq!(rewritten("undefined === NaN"), "undefined === NaN");
    assert_eq!(rewritten("Infinity"), "Infinity");
}

#[test]
fn guard_11_typeof_free_identifier_never_throws() {
    assert_eq!(
        rewritten("typeof missing"),
        "(\"missing\" in __data ? typeof __data.missing : \"undefined\")"
    );
    assert_eq!(rewritten("(x => typeof x)(1)"), "(x => typeof x)(1)");
}

#[test]
fn guard_12_shorthand_properties_expand() {
    assert_eq!(rewritten("({ a, b: 1 })"), "({ a: __data.a, b: 1 })");
    assert_eq!(rewritten("(a => ({ a }))(1)"), "(a => ({ a }))(1)");
}

#[test]
fn guard_13_shorthand_destructuring_assignment_expands() {
    assert_eq!(rewritten("({ a } = src)"), "({ a: __data.a } = __data.src)");
}

#[test]
fn guard_14_dynamic_keys_go_through_sanitizer() {
    assert_eq!(rewritten("obj[key]"), "__data.obj[__sanitize(__data.key)]");
    assert_eq!(rewritten("obj['name']"), "__data.obj['name']");
    assert_eq!(rewritten("obj[0]"), "__data.obj[0]");
    assert_eq!(
        rewritten("obj[a + 'x']"),
        "__data.obj[__sanitize(__data.a + 'x')]"
    );
}

#[test]
fn guard_15_nested_dynamic_keys() {
    assert_eq!(
        rewritten("a[b[c]]"),
        "__data.a[__sanitize(__data.b[__sanitize(__data.c)])]"
    );
}

// --- Extension calls ---

#[test]
fn guard_16_extension_call_is_dispatched() {
    assert_eq!(
        rewritten("$json.email.isEmail()"),
        "__data.extend(__data.$json.email, \"isEmail\", [])"
    );
    assert_eq!(
        rewritten("list.chunk(2)"),
        "__data.extend(__data.list, \"chunk\", [2])"
    );
    assert_eq!(
        rewritten("d.plus(1, 'days')"),
        "__data.extend(__data.d, \"plus\", [1, 'days'])"
    );
}

#[test]
fn guard_17_chained_extension_calls_nest() {
    assert_eq!(
        rewritten("xs.unique().first()"),
        "__data.extend(__data.extend(__data.xs, \"unique\", []), \"first\", [])"
    );
    assert_eq!(
        rewritten("xs.sum(ys.first())"),
        "__data.extend(__data.xs, \"sum\", [__data.extend(__data.ys, \"first\", [])])"
    );
}

#[test]
fn guard_18_non_extension_methods_are_untouched() {
    assert_eq!(rewritten("s.toUpperCase()"), "__data.s.toUpperCase()");
}

#[test]
fn guard_19_optional_chains_are_not_dispatched() {
    assert_eq!(rewritten("a?.first()"), "__data.a?.first()");
    assert_eq!(rewritten("a?.b.first()"), "__data.a?.b.first()");
}

#[test]
fn guard_20_extension_inside_callback_in_chain_is_dispatched() {
    assert_eq!(
        rewritten("a?.map(x => x.first())"),
        "__data.a?.map(x => __data.extend(x, \"first\", []))"
    );
}

// --- Forbidden property names ---

#[test]
fn guard_21_forbidden_names_in_every_position() {
    assert_forbidden("a.constructor", "constructor");
    assert_forbidden("a['constructor']", "constructor");
    assert_forbidden("a[`__proto__`]", "__proto__");
    assert_forbidden("a?.prototype", "prototype");
    assert_forbidden("constructor", "constructor");
    assert_forbidden("({ __defineGetter__: 1 })", "__defineGetter__");
    assert_forbidden("({ ['__lookupSetter__']: 1 })", "__lookupSetter__");
    assert_forbidden("const { constructor } = a; return 1", "constructor");
    assert_forbidden("({ prototype: p } = a)", "prototype");
    assert_forbidden("typeof __proto__", "__proto__");
}

#[test]
fn guard_22_class_constructor_method_is_allowed() {
    let out = rewritten("class A { constructor() { this.v = 1 } } return new A().v");
    assert_eq!(out, "class A { constructor() { this.v = 1 } } return new A().v");
}

#[test]
fn guard_23_forbidden_names_inside_string_values_are_fine() {
    assert_eq!(rewritten("'constructor'"), "'constructor'");
    assert_eq!(rewritten("a === 'prototype'"), "__data.a === 'prototype'");
}

// --- Reserved identifiers ---

#[test]
fn guard_24_reserved_identifiers_cannot_be_bound() {
    assert_reserved("var __data = 1");
    assert_reserved("let [__sanitize] = []");
    assert_reserved("const { a: __data } = x");
    assert_reserved("function f(__data) {}");
    assert_reserved("(__sanitize = 1) => 1");
    assert_reserved("function __data() {}");
    assert_reserved("class __sanitize {}");
    assert_reserved("try {} catch (__data) {}");
    assert_reserved("__data = 1");
    assert_reserved("__sanitize++");
    assert_reserved("[__data] = [1]");
    assert_reserved("({ __data } = {})");
    assert_reserved("for (__data of xs) {}");
}

#[test]
fn guard_25_reserved_identifiers_can_be_read() {
    assert_eq!(rewritten("__data"), "__data");
}

// --- Banned patterns ---

#[test]
fn guard_26_code_generation_is_banned() {
    assert_banned("eval('1')", "code-generation");
    assert_banned("Function('return 1')()", "code-generation");
    assert_banned("new Function('return 1')", "code-generation");
    assert_banned("new AsyncFunction('')", "code-generation");
}

#[test]
fn guard_27_reflection_globals_are_banned() {
    assert_banned("new Proxy({}, {})", "banned-global");
    assert_banned("Reflect.ownKeys(a)", "banned-global");
    assert_banned("WebAssembly.compile(b)", "banned-global");
    assert_banned("Deno.readFile('x')", "banned-global");
    assert_banned("globalThis[k]", "global-computed-access");
}

#[test]
fn guard_28_module_features_are_banned() {
    assert_banned("import('fs')", "dynamic-import");
    assert_banned("import.meta", "import-meta");
    assert_banned("import x from 'y'; return x", "module-syntax");
}

#[test]
fn guard_29_symbol_coercion_hooks_are_banned() {
    assert_banned("({ [Symbol.toPrimitive]: f })", "symbol-coercion");
    assert_banned("a[Symbol.hasInstance]", "symbol-coercion");
}

#[test]
fn guard_30_with_statement_is_rejected() {
    assert!(guard_expression("with (a) { b }").is_err());
}

// --- Parse and depth ---

#[test]
fn guard_31_syntax_errors_are_parse_errors() {
    assert!(matches!(violation("a +"), GuardViolation::ParseError(_)));
    assert!(matches!(violation("{{{"), GuardViolation::ParseError(_)));
}

#[test]
fn guard_32_nesting_depth_is_bounded() {
    let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
    assert!(matches!(
        violation(&deep),
        GuardViolation::NestingTooDeep { max: 256, actual: 300 }
    ));
    let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
    assert!(guard_expression(&shallow).is_ok());
}

// --- Error translation ---

#[test]
fn guard_33_violations_translate_to_expression_errors() {
    let err: ExpressionError = violation("a.constructor").into();
    assert_eq!(err.code(), codes::SECURITY_VIOLATION);
    assert_eq!(err.message(), "Cannot access \"constructor\" due to security concerns");
    assert_eq!(err.details().unwrap()["identifier"], "constructor");

    let err: ExpressionError = violation("a +").into();
    assert_eq!(err.code(), codes::SYNTAX_ERROR);
}

// --- Hooks ---

struct CommentHook {
    name: &'static str,
    text: &'static str,
}

impl GuardHook for CommentHook {
    fn name(&self) -> &str {
        self.name
    }

    fn transform(&self, program: &Program<'_>, _source: &str) -> Result<Vec<Edit>, GuardViolation> {
        Ok(vec![Edit::insert(program.span.start, self.text)])
    }
}

struct ReplaceAllHook;

impl GuardHook for ReplaceAllHook {
    fn name(&self) -> &str {
        "replace-all"
    }

    fn transform(&self, _program: &Program<'_>, source: &str) -> Result<Vec<Edit>, GuardViolation> {
        Ok(vec![Edit::replace_range(0, source.len() as u32, "0")])
    }
}

struct FailingHook;

impl GuardHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    fn transform(&self, _program: &Program<'_>, _source: &str) -> Result<Vec<Edit>, GuardViolation> {
        Err(GuardViolation::ParseError("hook could not run".into()))
    }
}

fn hooks(before: Vec<Arc<dyn GuardHook>>, after: Vec<Arc<dyn GuardHook>>) -> GuardHooks {
    GuardHooks { before, after }
}

#[test]
fn guard_34_hook_edits_keep_registration_order() {
    let hooks = hooks(
        vec![Arc::new(CommentHook { name: "b", text: "/*before*/" })],
        vec![Arc::new(CommentHook { name: "a", text: "/*after*/" })],
    );
    let guarded = guard_expression_with_hooks("x", &hooks).unwrap();
    assert!(
        guarded.as_str().contains("return (/*before*//*after*/__data.x);"),
        "{}",
        guarded.as_str()
    );
}

#[test]
fn guard_35_conflicting_hook_edit_is_rejected() {
    let hooks = hooks(vec![], vec![Arc::new(ReplaceAllHook)]);
    let err = guard_expression_with_hooks("x + y", &hooks).unwrap_err();
    assert!(matches!(err, GuardViolation::EditConflict { .. }));
    let err: ExpressionError = err.into();
    assert_eq!(err.code(), codes::GUARD_CONFLICT);
}

#[test]
fn guard_36_hook_failure_names_the_hook() {
    let hooks = hooks(vec![Arc::new(FailingHook)], vec![]);
    match guard_expression_with_hooks("x", &hooks).unwrap_err() {
        GuardViolation::Hook { hook, message } => {
            assert_eq!(hook, "failing");
            assert!(message.contains("hook could not run"));
        }
        other => panic!("expected hook failure, got {other:?}"),
    }
}

#[test]
fn guard_37_empty_hooks_match_plain_guard() {
    let plain = guard_expression("a.first()").unwrap();
    let hooked = guard_expression_with_hooks("a.first()", &GuardHooks::default()).unwrap();
    assert_eq!(plain, hooked);
    assert!(GuardHooks::default().is_empty());
}

#[test]
fn guard_38_global_object_members_are_checked_like_bare_globals() {
    assert_banned("globalThis.Function('return 1')()", "code-generation");
    assert_banned("global.eval('1')", "code-generation");
    assert_banned("globalThis.Reflect.getPrototypeOf($json)", "banned-global");
    assert_banned("globalThis.Proxy", "banned-global");
    assert_banned("global.Deno.env", "banned-global");
    assert!(guard_expression("globalThis.Math.max(1, 2)").is_ok());
}
