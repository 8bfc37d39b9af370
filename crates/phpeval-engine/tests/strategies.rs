//! Both execution strategies on whole programs
//!
//! Every program runs interpreted and compiled; the two runs must agree on
//! return value, output and diagnostics.

use phpeval_core::{Env, ErrorKind, Program, Runtime, RuntimeError, Value};
use phpeval_engine::{Engine, EngineError, Strategy};
use serde_json::{json, Value as Json};

#[derive(Debug, PartialEq)]
struct Outcome {
    result: Result<Value, String>,
    output: String,
    diagnostics: Vec<(ErrorKind, u32)>,
    reporting: bool,
}

fn program(functions: Json, main: Json) -> Program {
    let source = json!({ "functions": functions, "main": main }).to_string();
    Program::from_json(&source).unwrap()
}

fn run(program: &Program, strategy: Strategy, env: Env) -> Outcome {
    let mut env = env;
    let engine = Engine::new(program.clone(), strategy);
    let result = engine.run(&mut env).map_err(|e| e.to_string());
    Outcome {
        result,
        output: env.output(),
        diagnostics: env
            .diagnostics()
            .iter()
            .map(|d| (d.kind, d.line))
            .collect(),
        reporting: env.error_reporting(),
    }
}

/// Run under both strategies, assert they agree and return the outcome
fn run_both(program: &Program) -> Outcome {
    let interpreted = run(program, Strategy::Interpret, Env::new());
    let compiled = run(program, Strategy::Compile, Env::new());
    assert_eq!(interpreted, compiled);
    interpreted
}

fn long(n: i64) -> Json {
    json!({"Literal": {"Long": n}})
}

fn string(s: &str) -> Json {
    json!({"Literal": {"String": s}})
}

fn var(name: &str) -> Json {
    json!({"Var": name})
}

fn at(line: u32, kind: Json) -> Json {
    json!({"line": line, "kind": kind})
}

fn assign(target: Json, value: Json) -> Json {
    json!({"Expr": {"Assign": {"target": target, "value": value}}})
}

fn assign_ref(target: Json, value: Json) -> Json {
    json!({"Expr": {"AssignRef": {"target": target, "value": value}}})
}

fn binary(op: &str, left: Json, right: Json) -> Json {
    json!({"Binary": {"op": op, "left": left, "right": right}})
}

fn call(name: &str, args: Json) -> Json {
    json!({"Call": {"name": name, "args": args}})
}

fn index(base: Json, key: Json) -> Json {
    json!({"ArrayGet": {"base": base, "index": key}})
}

fn append(base: Json) -> Json {
    json!({"ArrayTail": {"base": base}})
}

fn inc_dec(target: Json, increment: bool, prefix: bool) -> Json {
    json!({"Expr": {"IncDec": {"target": target, "increment": increment, "prefix": prefix}}})
}

fn list(values: &[i64]) -> Json {
    Json::Array(
        values
            .iter()
            .map(|n| json!({"value": long(*n)}))
            .collect(),
    )
}

#[test]
fn test_assignment_copies() {
    // $a = 1; $b = $a; $b = 2; echo $a;
    let program = program(
        json!([]),
        json!([
            assign(var("a"), long(1)),
            assign(var("b"), var("a")),
            assign(var("b"), long(2)),
            {"Echo": [var("a")]}
        ]),
    );
    assert_eq!(run_both(&program).output, "1");
}

#[test]
fn test_reference_assignment_aliases() {
    // $a = 1; $b = &$a; $b = 2; echo $a;
    let program = program(
        json!([]),
        json!([
            assign(var("a"), long(1)),
            assign_ref(var("b"), var("a")),
            assign(var("b"), long(2)),
            {"Echo": [var("a")]}
        ]),
    );
    assert_eq!(run_both(&program).output, "2");
}

#[test]
fn test_copy_and_alias_inside_function() {
    // function f() {
    //   $a = [1]; $b = $a; $b[] = 2;
    //   $c = &$a; $c[] = 3;
    //   echo count($a), count($b), count($c);
    // }
    let program = program(
        json!([{"name": "f", "body": [
            assign(var("a"), json!({"ArrayLiteral": list(&[1])})),
            assign(var("b"), var("a")),
            assign(append(var("b")), long(2)),
            assign_ref(var("c"), var("a")),
            assign(append(var("c")), long(3)),
            {"Echo": [
                call("count", json!([var("a")])),
                call("count", json!([var("b")])),
                call("count", json!([var("c")]))
            ]}
        ]}]),
        json!([{"Expr": call("f", json!([]))}]),
    );
    assert_eq!(run_both(&program).output, "222");
}

#[test]
fn test_writes_through_original_reach_alias() {
    // $a = 1; $b = &$a; $a = 7; echo $b;
    let program = program(
        json!([]),
        json!([
            assign(var("a"), long(1)),
            assign_ref(var("b"), var("a")),
            assign(var("a"), long(7)),
            {"Echo": [var("b")]}
        ]),
    );
    assert_eq!(run_both(&program).output, "7");
}

#[test]
fn test_writes_through_original_reach_alias_inside_function() {
    // function f() {
    //   $a = 1; $b = &$a; $a = 7; $a++;
    //   $x = [1]; $y = &$x; $x[] = 2;
    //   echo $b, count($y);
    // }
    let program = program(
        json!([{"name": "f", "body": [
            assign(var("a"), long(1)),
            assign_ref(var("b"), var("a")),
            assign(var("a"), long(7)),
            inc_dec(var("a"), true, false),
            assign(var("x"), json!({"ArrayLiteral": list(&[1])})),
            assign_ref(var("y"), var("x")),
            assign(append(var("x")), long(2)),
            {"Echo": [var("b"), call("count", json!([var("y")]))]}
        ]}]),
        json!([{"Expr": call("f", json!([]))}]),
    );
    assert_eq!(run_both(&program).output, "82");
}

#[test]
fn test_maybe_undefined_read_warns_once() {
    // function f($c) { if ($c) { $x = 1; } echo $x; }  f(false); f(true);
    let program = program(
        json!([{"name": "f", "params": [{"name": "c"}], "body": [
            {"If": {"test": var("c"), "then": [assign(var("x"), long(1))]}},
            {"Echo": [at(3, var("x"))]}
        ]}]),
        json!([
            {"Expr": call("f", json!([{"Literal": {"Bool": false}}]))},
            {"Expr": call("f", json!([{"Literal": {"Bool": true}}]))}
        ]),
    );
    let outcome = run_both(&program);
    assert_eq!(outcome.output, "1");
    assert_eq!(outcome.diagnostics, vec![(ErrorKind::UndefinedVariable, 3)]);

    let engine = Engine::new(program, Strategy::Compile);
    let listing = engine.listing("f").unwrap();
    assert!(listing.contains("load.checked $x#"), "{}", listing);
}

#[test]
fn test_binary_concatenation_is_chained() {
    // echo "a" . "b" . "c", $x . "y" . "z"; written as nested binary operations
    let program = in_function(json!([
        assign(var("x"), long(1)),
        {"Echo": [
            binary("Concat", binary("Concat", string("a"), string("b")), string("c")),
            binary("Concat", binary("Concat", var("x"), string("y")), string("z"))
        ]},
        {"Return": null}
    ]));
    assert_eq!(run_both(&program).output, "abc1yz");

    let engine = Engine::new(program, Strategy::Compile);
    let listing = engine.listing("f").unwrap();
    assert!(listing.contains("\"abc\""), "{}", listing);
    assert!(listing.contains("\"yz\""), "{}", listing);
}

#[test]
fn test_concatenation_chain() {
    // echo "a" . "b" . "c", 1 . "x";
    let program = program(
        json!([]),
        json!([{"Echo": [
            {"Concat": [string("a"), string("b"), string("c")]},
            {"Concat": [long(1), string("x")]}
        ]}]),
    );
    assert_eq!(run_both(&program).output, "abc1x");
}

#[test]
fn test_append_vivifies_array() {
    // function f() { $arr[] = 5; return $arr; }  return f();
    let program = program(
        json!([{"name": "f", "body": [
            assign(append(var("arr")), long(5)),
            {"Return": var("arr")}
        ]}]),
        json!([{"Return": call("f", json!([]))}]),
    );
    let outcome = run_both(&program);
    let expected = Value::array([Value::Long(5)].into_iter().collect());
    assert_eq!(outcome.result, Ok(expected));
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_nested_vivification_and_compound_assignment() {
    // function f() { $m["a"]["b"] = 1; $m["a"]["b"] += 2; $m["a"]["c"]++; return $m["a"]["b"] + $m["a"]["c"]; }
    let ab = || index(index(var("m"), string("a")), string("b"));
    let ac = || index(index(var("m"), string("a")), string("c"));
    let program = program(
        json!([{"name": "f", "body": [
            assign(ab(), long(1)),
            {"Expr": at(2, json!({"AssignOp": {"op": "Add", "target": ab(), "value": long(2)}}))},
            {"Expr": at(3, json!({"IncDec": {"target": ac(), "increment": true, "prefix": false}}))},
            {"Return": binary("Add", ab(), ac())}
        ]}]),
        json!([{"Return": call("f", json!([]))}]),
    );
    let outcome = run_both(&program);
    assert_eq!(outcome.result, Ok(Value::Long(4)));
    assert_eq!(outcome.diagnostics, vec![(ErrorKind::UndefinedIndex, 3)]);
}

#[test]
fn test_by_reference_parameter() {
    // function inc(&$x) { $x++; }  $a = 1; inc($a); inc($a); echo $a;
    let program = program(
        json!([{"name": "inc", "params": [{"name": "x", "by_ref": true}], "body": [
            {"Expr": {"IncDec": {"target": var("x"), "increment": true, "prefix": true}}}
        ]}]),
        json!([
            assign(var("a"), long(1)),
            {"Expr": call("inc", json!([var("a")]))},
            {"Expr": call("inc", json!([var("a")]))},
            {"Echo": [var("a")]}
        ]),
    );
    assert_eq!(run_both(&program).output, "3");
}

#[test]
fn test_foreach_by_reference_updates_elements() {
    // function f() { $arr = [1, 2, 3]; foreach ($arr as &$v) { $v = $v * 2; } echo $arr[0], $arr[1], $arr[2]; }
    let program = program(
        json!([{"name": "f", "body": [
            assign(var("arr"), json!({"ArrayLiteral": list(&[1, 2, 3])})),
            {"Foreach": {"subject": var("arr"), "value": var("v"), "by_ref": true, "body": [
                assign(var("v"), binary("Mul", var("v"), long(2)))
            ]}},
            {"Echo": [
                index(var("arr"), long(0)),
                index(var("arr"), long(1)),
                index(var("arr"), long(2))
            ]}
        ]}]),
        json!([{"Expr": call("f", json!([]))}]),
    );
    assert_eq!(run_both(&program).output, "246");
}

#[test]
fn test_foreach_by_value_with_key() {
    // foreach (["x" => 1, "y" => 2] as $k => $v) { echo $k, $v; }
    let program = program(
        json!([]),
        json!([{"Foreach": {
            "subject": {"ArrayLiteral": [
                {"key": string("x"), "value": long(1)},
                {"key": string("y"), "value": long(2)}
            ]},
            "key": var("k"),
            "value": var("v"),
            "body": [{"Echo": [var("k"), var("v")]}]
        }}]),
    );
    assert_eq!(run_both(&program).output, "x1y2");
}

#[test]
fn test_typed_loop_matches_boxed_result() {
    // function sum() {
    //   $w = 3; $h = 4; $i = 0; $s = 0;
    //   while ($i < 10) { $s = $s + $i; $i++; }
    //   return $s + $w * $h;
    // }
    let program = program(
        json!([{"name": "sum", "body": [
            assign(var("w"), long(3)),
            assign(var("h"), long(4)),
            assign(var("i"), long(0)),
            assign(var("s"), long(0)),
            {"While": {"test": binary("Lt", var("i"), long(10)), "body": [
                assign(var("s"), binary("Add", var("s"), var("i"))),
                inc_dec(var("i"), true, false)
            ]}},
            {"Return": binary("Add", var("s"), binary("Mul", var("w"), var("h")))}
        ]}]),
        json!([{"Return": call("sum", json!([]))}]),
    );
    let outcome = run_both(&program);
    assert_eq!(outcome.result, Ok(Value::Long(57)));

    let engine = Engine::new(program, Strategy::Compile);
    let listing = engine.listing("sum").unwrap();
    assert!(listing.contains("long.Mul"), "{}", listing);
}

/// Wrap `body` in a function so its locals get slots, and echo its result
fn in_function(body: Json) -> Program {
    program(
        json!([{"name": "f", "body": body}]),
        json!([{"Echo": [call("f", json!([]))]}]),
    )
}

#[test]
fn test_addition_overflows_to_double() {
    // $a = PHP_INT_MAX; $b = $a + 1; return $b;
    let program = in_function(json!([
        assign(var("a"), long(i64::MAX)),
        assign(var("b"), binary("Add", var("a"), long(1))),
        {"Return": var("b")}
    ]));
    assert_eq!(run_both(&program).output, "9.2233720368548E+18");
}

#[test]
fn test_subtraction_overflows_to_double() {
    // $a = PHP_INT_MIN; return $a - 1;
    let program = in_function(json!([
        assign(var("a"), long(i64::MIN)),
        {"Return": binary("Sub", var("a"), long(1))}
    ]));
    assert_eq!(run_both(&program).output, "-9.2233720368548E+18");
}

#[test]
fn test_multiplication_overflows_to_double() {
    // $a = 1 << 62; return $a * 4;
    let program = in_function(json!([
        assign(var("a"), binary("Shl", long(1), long(62))),
        {"Return": binary("Mul", var("a"), long(4))}
    ]));
    assert_eq!(run_both(&program).output, "1.844674407371E+19");
}

#[test]
fn test_negation_of_min_is_double() {
    // $m = PHP_INT_MIN; return -$m;
    let program = in_function(json!([
        assign(var("m"), long(i64::MIN)),
        {"Return": {"Unary": {"op": "Neg", "expr": var("m")}}}
    ]));
    assert_eq!(run_both(&program).output, "9.2233720368548E+18");
}

#[test]
fn test_increment_and_decrement_overflow_to_double() {
    // $a = PHP_INT_MAX; ++$a; $b = PHP_INT_MIN; $b--; echo $a, ",", $b;
    let program = in_function(json!([
        assign(var("a"), long(i64::MAX)),
        inc_dec(var("a"), true, true),
        assign(var("b"), long(i64::MIN)),
        inc_dec(var("b"), false, false),
        {"Echo": [var("a"), string(","), var("b")]},
        {"Return": null}
    ]));
    assert_eq!(
        run_both(&program).output,
        "9.2233720368548E+18,-9.2233720368548E+18"
    );
}

#[test]
fn test_compound_assignment_overflows_to_double() {
    // $a = PHP_INT_MAX; $a += 1; $b = 1 << 62; $b *= 4; echo $a, ",", $b;
    let program = in_function(json!([
        assign(var("a"), long(i64::MAX)),
        {"Expr": {"AssignOp": {"op": "Add", "target": var("a"), "value": long(1)}}},
        assign(var("b"), binary("Shl", long(1), long(62))),
        {"Expr": {"AssignOp": {"op": "Mul", "target": var("b"), "value": long(4)}}},
        {"Echo": [var("a"), string(","), var("b")]},
        {"Return": null}
    ]));
    assert_eq!(
        run_both(&program).output,
        "9.2233720368548E+18,1.844674407371E+19"
    );
}

#[test]
fn test_in_range_arithmetic_stays_integer() {
    // $a = PHP_INT_MAX - 1; $a++; return $a - PHP_INT_MAX;
    let program = in_function(json!([
        assign(var("a"), binary("Sub", long(i64::MAX), long(1))),
        inc_dec(var("a"), true, false),
        {"Return": binary("Sub", var("a"), long(i64::MAX))}
    ]));
    assert_eq!(run_both(&program).output, "0");
}

#[test]
fn test_mixed_operand_sweep() {
    // $i = 3; $d = 1.5; $s = "4"; $b = true; then echo each expression followed by ","
    let cases = vec![
        binary("Add", var("i"), var("d")),
        binary("Mul", var("i"), var("s")),
        binary("Mod", var("i"), long(2)),
        binary("Shl", var("i"), long(2)),
        binary("Shr", var("s"), long(1)),
        binary("Lt", var("d"), var("i")),
        binary("Eq", var("s"), long(4)),
        binary("And", var("b"), var("i")),
        binary("Xor", var("b"), var("i")),
        json!({"Unary": {"op": "Not", "expr": var("i")}}),
        json!({"Unary": {"op": "Neg", "expr": var("d")}}),
        json!({"Unary": {"op": "Neg", "expr": var("i")}}),
        binary("Concat", var("i"), var("s")),
        json!({"Cast": {"kind": "Long", "expr": var("d")}}),
        binary("Div", var("i"), long(2)),
        binary("Sub", var("i"), var("d")),
        binary("Mul", var("d"), var("d")),
        json!({"Isset": [var("s"), var("i")]}),
        json!({"Empty": var("d")}),
    ];
    let mut body = vec![
        assign(var("i"), long(3)),
        assign(var("d"), json!({"Literal": {"Double": 1.5}})),
        assign(var("s"), string("4")),
        assign(var("b"), json!({"Literal": {"Bool": true}})),
    ];
    for case in cases {
        body.push(json!({"Echo": [case, string(",")]}));
    }
    body.push(json!({"Return": null}));

    let outcome = run_both(&in_function(Json::Array(body)));
    assert_eq!(
        outcome.output,
        "4.5,12,1,12,2,1,1,1,,,-1.5,-3,34,1,1.5,1.5,2.25,1,,"
    );
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_recursion_through_named_call() {
    // function fact($n) { if ($n <= 1) { return 1; } return $n * fact($n - 1); }  return fact(10);
    let program = program(
        json!([{"name": "fact", "params": [{"name": "n"}], "body": [
            {"If": {"test": binary("Le", var("n"), long(1)), "then": [{"Return": long(1)}]}},
            {"Return": binary("Mul", var("n"), call("fact", json!([binary("Sub", var("n"), long(1))])))}
        ]}]),
        json!([{"Return": call("fact", json!([long(10)]))}]),
    );
    let outcome = run_both(&program);
    assert_eq!(outcome.result, Ok(Value::Long(3_628_800)));

    let engine = Engine::new(program, Strategy::Compile);
    let fact = engine.listing("fact").unwrap();
    assert!(fact.contains("call fact/1"), "{}", fact);
    assert!(!fact.contains("call.direct"), "{}", fact);
    let main = engine.listing("{main}").unwrap();
    assert!(main.contains("call.direct fact/1"), "{}", main);
}

#[test]
fn test_suppression_silences_and_restores() {
    // function f() { return @$missing; }  echo f(); echo $other;
    let program = program(
        json!([{"name": "f", "body": [{"Return": {"Suppress": var("missing")}}]}]),
        json!([
            {"Echo": [call("f", json!([]))]},
            {"Echo": [at(2, var("other"))]}
        ]),
    );
    let outcome = run_both(&program);
    assert_eq!(outcome.diagnostics, vec![(ErrorKind::UndefinedVariable, 2)]);
    assert!(outcome.reporting);
}

#[test]
fn test_suppression_restored_after_failing_child() {
    // echo @(1 % 0);
    let program = program(
        json!([]),
        json!([{"Echo": [{"Suppress": binary("Mod", long(1), long(0))}]}]),
    );
    let outcome = run_both(&program);
    assert_eq!(
        outcome.result,
        Err(RuntimeError::ModuloByZero.to_string())
    );
    assert!(outcome.reporting);
}

#[test]
fn test_suppression_restored_after_internal_error() {
    // function f() { return @(1 = 2); }  echo f();
    let program = program(
        json!([{"name": "f", "body": [
            {"Return": {"Suppress": {"Assign": {"target": long(1), "value": long(2)}}}}
        ]}]),
        json!([{"Echo": [call("f", json!([]))]}]),
    );
    for strategy in [Strategy::Interpret, Strategy::Compile] {
        let outcome = run(&program, strategy, Env::new());
        assert!(outcome.result.is_err(), "{}", strategy);
        assert!(outcome.reporting, "{}", strategy);
    }
}

#[test]
fn test_caller_scope_builtins() {
    // function f() { extract(["q" => 5]); return $q + count(get_defined_vars()); }
    let program = program(
        json!([{"name": "f", "body": [
            {"Expr": call("extract", json!([{"ArrayLiteral": [{"key": string("q"), "value": long(5)}]}]))},
            {"Return": binary("Add", var("q"), call("count", json!([call("get_defined_vars", json!([]))])))}
        ]}]),
        json!([{"Return": call("f", json!([]))}]),
    );
    let outcome = run_both(&program);
    assert_eq!(outcome.result, Ok(Value::Long(6)));
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_global_import() {
    // function bump() { global $n; $n = $n + 1; }  $n = 41; bump(); echo $n;
    let program = program(
        json!([{"name": "bump", "body": [
            {"Global": ["n"]},
            assign(var("n"), binary("Add", var("n"), long(1)))
        ]}]),
        json!([
            assign(var("n"), long(41)),
            {"Expr": call("bump", json!([]))},
            {"Echo": [var("n")]}
        ]),
    );
    assert_eq!(run_both(&program).output, "42");
}

#[test]
fn test_undefined_function_is_fatal() {
    let program = program(json!([]), json!([{"Expr": call("nope", json!([]))}]));
    let outcome = run_both(&program);
    assert!(outcome.result.is_err());
}

#[test]
fn test_budget_stops_runaway_recursion() {
    // function spin() { return spin(); }  spin();
    let program = program(
        json!([{"name": "spin", "body": [{"Return": call("spin", json!([]))}]}]),
        json!([{"Expr": call("spin", json!([]))}]),
    );
    for strategy in [Strategy::Interpret, Strategy::Compile] {
        let outcome = run(&program, strategy, Env::new().with_budget(50));
        assert_eq!(
            outcome.result,
            Err(RuntimeError::BudgetExhausted.to_string()),
            "{}",
            strategy
        );
    }
}

#[test]
fn test_listing_of_unknown_function() {
    let program = program(json!([]), json!([]));
    let engine = Engine::new(program, Strategy::Compile);
    assert!(matches!(
        engine.listing("missing"),
        Err(EngineError::Analyze(_))
    ));
}
