//! Sandbox escape attempts through the full guard and isolate pipeline.

use std::sync::Arc;

use exprbox_error::{codes, ExpressionError};
use exprbox_sandbox::guard::{Edit, GuardViolation};
use exprbox_sandbox::{EvaluateOptions, Evaluator, GuardHook, GuardHooks, IsolateBridge, WorkflowData};
use oxc_ast::ast::Program;
use serde_json::{json, Value};

fn evaluator() -> Evaluator<IsolateBridge> {
    Evaluator::new(IsolateBridge::default())
}

fn sample() -> WorkflowData {
    WorkflowData::from_json(json!({
        "$json": {
            "name": "n8n",
            "key": "__proto__",
            "ctor": "constructor",
            "safe": "name",
        }
    }))
    .unwrap()
}

fn eval(ev: &mut Evaluator<IsolateBridge>, expression: &str) -> Result<Value, ExpressionError> {
    ev.evaluate(expression, &sample(), &EvaluateOptions::default())
}

fn assert_violation(result: Result<Value, ExpressionError>) {
    let err = result.expect_err("expected a security violation");
    assert!(matches!(err, ExpressionError::SecurityViolation(_)), "{err:?}");
    assert_eq!(err.code(), codes::SECURITY_VIOLATION);
    assert!(!err.retryable());
}

// --- Rejected before the isolate runs ---

#[test]
fn forbidden_properties_never_reach_the_isolate() {
    let mut ev = evaluator();
    for expression in [
        "$json.constructor",
        "$json['__proto__']",
        "''.constructor.constructor('return this')()",
        "Object.prototype",
        "({}).__defineGetter__('x', () => 1)",
        "const { constructor } = $json; constructor",
    ] {
        assert_violation(eval(&mut ev, expression));
    }
    // Nothing above ever booted the isolate.
    assert!(!ev.bridge().is_ready());
}

#[test]
fn reserved_identifiers_cannot_be_bound() {
    let mut ev = evaluator();
    for expression in [
        "const __data = 1; return __data;",
        "[__sanitize] = [1]",
        "((__data) => __data)(1)",
        "try { x() } catch (__data) { return 1; }",
        "function __sanitize() {} return 1;",
    ] {
        assert_violation(eval(&mut ev, expression));
    }
}

#[test]
fn code_generation_and_host_access_are_rejected() {
    let mut ev = evaluator();
    for expression in [
        "eval('1 + 1')",
        "Function('return 1')()",
        "new Proxy({}, {})",
        "Reflect.ownKeys($json)",
        "Deno.env",
        "globalThis['Deno']",
        "import('fs')",
        "WebAssembly.Module",
    ] {
        assert_violation(eval(&mut ev, expression));
    }
}

#[test]
fn syntax_errors_are_not_security_errors() {
    let mut ev = evaluator();
    let err = eval(&mut ev, "$json.(").unwrap_err();
    assert_eq!(err.code(), codes::SYNTAX_ERROR);
}

// --- Blocked at runtime ---

#[test]
fn dynamic_keys_are_sanitized() {
    let mut ev = evaluator();
    assert_violation(eval(&mut ev, "$json[$json.key]"));
    assert_violation(eval(&mut ev, "''[$json.ctor]"));
    assert_eq!(eval(&mut ev, "$json[$json.safe]").unwrap(), json!("n8n"));
}

#[test]
fn sanitizer_coerces_keys_once() {
    let mut ev = evaluator();
    // A key object that changes its string form between reads.
    let expression = "let n = 0; const key = { toString() { return n++ === 0 ? 'name' : 'constructor'; } }; return $json[key];";
    assert_eq!(eval(&mut ev, expression).unwrap(), json!("n8n"));
}

#[test]
fn reflective_object_methods_are_blocked() {
    let mut ev = evaluator();
    assert_violation(eval(&mut ev, "Object.getPrototypeOf($json)"));
    assert_eq!(eval(&mut ev, "typeof Object.defineProperty").unwrap(), json!("undefined"));
    assert_eq!(eval(&mut ev, "typeof Object.getOwnPropertyDescriptor").unwrap(), json!("undefined"));
    // Ordinary helpers still work.
    assert_eq!(eval(&mut ev, "Object.keys({ a: 1 })").unwrap(), json!(["a"]));
}

#[test]
fn stack_trace_hooks_are_blocked() {
    let mut ev = evaluator();
    assert_violation(eval(&mut ev, "Error.prepareStackTrace"));
    assert_violation(eval(&mut ev, "Error.prepareStackTrace = (e, s) => s; return 1;"));
    assert_violation(eval(&mut ev, "Error.captureStackTrace({})"));
    assert_eq!(eval(&mut ev, "new Error('x').message").unwrap(), json!("x"));
}

#[test]
fn function_constructor_is_unreachable_through_aliases() {
    let mut ev = evaluator();
    for expression in [
        "const F = Function; return F('return 1')();",
        "[Function][0]('return 1')()",
        "const F = [globalThis][0].Function; return new F('return 1')();",
    ] {
        assert_violation(eval(&mut ev, expression));
    }
    assert_eq!(eval(&mut ev, "(() => 1) instanceof Function").unwrap(), json!(true));
    assert_eq!(eval(&mut ev, "typeof Function").unwrap(), json!("function"));
}

#[test]
fn reflect_and_proxy_are_wrapped_behind_the_global_object() {
    let mut ev = evaluator();
    assert_violation(eval(&mut ev, "[globalThis][0].Reflect.getPrototypeOf($json)"));
    assert_violation(eval(&mut ev, "const R = [globalThis][0].Reflect; return R.get($json, '__proto__');"));
    assert_violation(eval(&mut ev, "const P = [globalThis][0].Proxy; return new P({}, {});"));
    assert_violation(eval(&mut ev, "const P = [globalThis][0].Proxy; return P.revocable({}, {});"));
    assert_eq!(
        eval(&mut ev, "const R = [globalThis][0].Reflect; return typeof R.defineProperty;").unwrap(),
        json!("undefined")
    );
    assert_eq!(
        eval(&mut ev, "const R = [globalThis][0].Reflect; return R.get($json, 'name');").unwrap(),
        json!("n8n")
    );
}

#[test]
fn global_object_is_frozen() {
    let mut ev = evaluator();
    // Assignment to a frozen global throws a TypeError, which reads as "no value".
    assert_eq!(eval(&mut ev, "globalThis.JSON = 1; return 2;").unwrap(), Value::Null);
    assert_eq!(eval(&mut ev, "typeof JSON").unwrap(), json!("object"));
}

#[test]
fn security_errors_are_not_swallowed_as_type_errors() {
    let mut ev = evaluator();
    assert_violation(eval(&mut ev, "$json.missing ?? Object.getPrototypeOf({})"));
}

// --- Hooks ---

/// Uppercases the whole expression result.
struct Shout;

impl GuardHook for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    fn transform(&self, program: &Program<'_>, _source: &str) -> Result<Vec<Edit>, GuardViolation> {
        Ok(vec![Edit::insert(program.span.end, ".toUpperCase()")])
    }
}

#[test]
fn hooks_rewrite_before_execution() {
    let hooks = GuardHooks {
        before: Vec::new(),
        after: vec![Arc::new(Shout)],
    };
    let mut hooked = evaluator().with_hooks(hooks);
    assert_eq!(
        hooked.evaluate("$json.name", &sample(), &EvaluateOptions::default()).unwrap(),
        json!("N8N")
    );

    let mut plain = evaluator();
    assert_eq!(eval(&mut plain, "$json.name").unwrap(), json!("n8n"));
}
