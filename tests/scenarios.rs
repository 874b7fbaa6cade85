//! End-to-end interpreter scenarios, built as `ast::Block` values directly
//! (this crate has no parser) and driven through `LuaVM::run`.

use lua_core::ast::{BinOp, Expr, FuncBody, IfArm, LocalAttrib, Stmt, TableField};
use lua_core::{LuaVM, Value};

fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

fn int(i: i64) -> Expr {
    Expr::Int(i)
}

fn lstr(s: &str) -> Expr {
    Expr::Str(s.to_string())
}

fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call { callee: Box::new(callee), args, is_method: false, method_name: None }
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binop { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

fn func(params: &[&str], body: Vec<(Stmt, u32)>) -> FuncBody {
    FuncBody { params: params.iter().map(|s| s.to_string()).collect(), is_vararg: false, body, line: 1, name: None }
}

fn local(names: &[&str], exprs: Vec<Expr>) -> Stmt {
    Stmt::Local { names: names.iter().map(|s| s.to_string()).collect(), attribs: vec![LocalAttrib::None; names.len()], exprs }
}

#[test]
fn tail_recursion_does_not_overflow_the_rust_stack() {
    // local function f(n, acc)
    //   if n == 0 then return acc end
    //   return f(n-1, acc+1)
    // end
    // return f(1000000, 0)
    let body = vec![
        (Stmt::If { arms: vec![IfArm { cond: bin(BinOp::Eq, var("n"), int(0)), body: vec![(Stmt::Return(vec![var("acc")]), 2)] }], else_: None }, 2),
        (
            Stmt::Return(vec![call(var("f"), vec![bin(BinOp::Sub, var("n"), int(1)), bin(BinOp::Add, var("acc"), int(1))])]),
            3,
        ),
    ];
    let block: Vec<(Stmt, u32)> = vec![
        (Stmt::LocalFunction { name: "f".to_string(), body: func(&["n", "acc"], body) }, 1),
        (Stmt::Return(vec![call(var("f"), vec![int(1_000_000), int(0)])]), 5),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "tail_recursion", &[]).expect("tail-recursive chain should not fail");
    assert_eq!(result, vec![Value::Number(1_000_000.0)]);
}

#[test]
fn multret_only_forwards_from_the_last_expression() {
    // local function two() return 10, 20 end
    // local a, b, c = two(), 99
    // return a, b, c
    let block: Vec<(Stmt, u32)> = vec![
        (Stmt::LocalFunction { name: "two".to_string(), body: func(&[], vec![(Stmt::Return(vec![int(10), int(20)]), 1)]) }, 1),
        (local(&["a", "b", "c"], vec![call(var("two"), vec![]), int(99)]), 2),
        (Stmt::Return(vec![var("a"), var("b"), var("c")]), 3),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "multret", &[]).expect("multret forwarding should not fail");
    assert_eq!(result, vec![Value::Number(10.0), Value::Number(99.0), Value::Nil]);
}

#[test]
fn closures_over_the_same_local_share_one_upvalue() {
    // local function make()
    //   local x = 0
    //   local inc = function() x = x + 1; return x end
    //   local get = function() return x end
    //   return inc, get
    // end
    // local inc, get = make()
    // inc(); inc(); return get()
    let inc_body = func(&[], vec![(Stmt::Assign { targets: vec![var("x")], exprs: vec![bin(BinOp::Add, var("x"), int(1))] }, 2), (Stmt::Return(vec![var("x")]), 2)]);
    let get_body = func(&[], vec![(Stmt::Return(vec![var("x")]), 3)]);
    let make_body: Vec<(Stmt, u32)> = vec![
        (local(&["x"], vec![int(0)]), 1),
        (local(&["inc"], vec![Expr::Function(Box::new(inc_body))]), 2),
        (local(&["get"], vec![Expr::Function(Box::new(get_body))]), 3),
        (Stmt::Return(vec![var("inc"), var("get")]), 4),
    ];
    let block: Vec<(Stmt, u32)> = vec![
        (Stmt::LocalFunction { name: "make".to_string(), body: func(&[], make_body) }, 1),
        (local(&["inc", "get"], vec![call(var("make"), vec![])]), 2),
        (Stmt::Expr(call(var("inc"), vec![])), 3),
        (Stmt::Expr(call(var("inc"), vec![])), 3),
        (Stmt::Return(vec![call(var("get"), vec![])]), 4),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "upvalue_sharing", &[]).expect("closures should share the captured local");
    assert_eq!(result, vec![Value::Number(2.0)]);
}

#[test]
fn runtime_concatenated_strings_intern_to_the_same_id_as_a_literal() {
    // a = "hel" .. "lo"
    // b = "hello"
    let block: Vec<(Stmt, u32)> = vec![
        (Stmt::Assign { targets: vec![var("a")], exprs: vec![bin(BinOp::Concat, lstr("hel"), lstr("lo"))] }, 1),
        (Stmt::Assign { targets: vec![var("b")], exprs: vec![lstr("hello")] }, 2),
    ];

    let mut vm = LuaVM::new();
    vm.run(&block, "string_interning", &[]).expect("assigning globals should not fail");

    let a_key = vm.state.intern_value("a");
    let b_key = vm.state.intern_value("b");
    let globals = vm.state.gc.allocator.tables.get(vm.state.globals.index()).expect("globals table missing");
    let a = globals.raw_get(&a_key).expect("global `a` should be set");
    let b = globals.raw_get(&b_key).expect("global `b` should be set");
    assert_eq!(a, b, "a runtime-built string must intern to the same object as an equal literal");
}

#[test]
fn a_full_gc_cycle_preserves_a_reachable_self_referencing_table() {
    // t = {}
    // t.self = t
    let block: Vec<(Stmt, u32)> = vec![
        (Stmt::Assign { targets: vec![var("t")], exprs: vec![Expr::Table(vec![])] }, 1),
        (Stmt::Assign { targets: vec![Expr::Member { obj: Box::new(var("t")), name: "self".to_string() }], exprs: vec![var("t")] }, 2),
    ];

    let mut vm = LuaVM::new();
    vm.run(&block, "gc_cycle", &[]).expect("building the cycle should not fail");
    vm.state.full_gc();

    let t_key = vm.state.intern_value("t");
    let globals = vm.state.gc.allocator.tables.get(vm.state.globals.index()).expect("globals table missing");
    let t = globals.raw_get(&t_key).expect("global `t` should have survived the cycle").as_table().expect("`t` should still be a table");

    let self_key = vm.state.intern_value("self");
    let table = vm.state.gc.allocator.tables.get(t.index()).expect("`t` should have survived the cycle");
    let looped = table.raw_get(&self_key).expect("t.self should still be set").as_table().expect("t.self should still be a table");
    assert_eq!(looped, t, "t.self must still point back at the same table after collection");
}

#[test]
fn short_circuited_and_never_evaluates_its_right_operand() {
    // local called = false
    // local function side() called = true; return true end
    // local _ = false and side()
    // return called
    let side_body = func(&[], vec![(Stmt::Assign { targets: vec![var("called")], exprs: vec![Expr::True] }, 2), (Stmt::Return(vec![Expr::True]), 2)]);
    let block: Vec<(Stmt, u32)> = vec![
        (local(&["called"], vec![Expr::False]), 1),
        (Stmt::LocalFunction { name: "side".to_string(), body: side_body }, 2),
        (local(&["_"], vec![bin(BinOp::And, Expr::False, call(var("side"), vec![]))]), 3),
        (Stmt::Return(vec![var("called")]), 4),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "short_circuit", &[]).expect("short-circuit evaluation should not fail");
    assert_eq!(result, vec![Value::Boolean(false)]);
}

#[test]
fn table_field_round_trips_through_get_and_set() {
    // t = {}
    // t.x = 42
    // return t.x
    let block: Vec<(Stmt, u32)> = vec![
        (Stmt::Assign { targets: vec![var("t")], exprs: vec![Expr::Table(vec![])] }, 1),
        (Stmt::Assign { targets: vec![Expr::Member { obj: Box::new(var("t")), name: "x".to_string() }], exprs: vec![int(42)] }, 2),
        (Stmt::Return(vec![Expr::Member { obj: Box::new(var("t")), name: "x".to_string() }]), 3),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "table_roundtrip", &[]).expect("raw table get/set should round-trip");
    assert_eq!(result, vec![Value::Number(42.0)]);
}

#[test]
fn table_constructor_with_positional_and_named_fields() {
    // local t = { 1, 2, name = "x" }
    // return t[1], t[2], t.name
    let block: Vec<(Stmt, u32)> = vec![
        (
            local(
                &["t"],
                vec![Expr::Table(vec![TableField::Positional(int(1)), TableField::Positional(int(2)), TableField::Named("name".to_string(), lstr("x"))])],
            ),
            1,
        ),
        (
            Stmt::Return(vec![
                Expr::Index { obj: Box::new(var("t")), key: Box::new(int(1)) },
                Expr::Index { obj: Box::new(var("t")), key: Box::new(int(2)) },
                Expr::Member { obj: Box::new(var("t")), name: "name".to_string() },
            ]),
            2,
        ),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "table_ctor", &[]).expect("table constructor should not fail");
    assert_eq!(result, vec![Value::Number(1.0), Value::Number(2.0), Value::String(vm.state.intern("x"))]);
}

#[test]
fn numeric_for_visits_the_initial_value_on_its_first_iteration() {
    // local sum = 0
    // local first = nil
    // for i = 5, 7 do
    //   if first == nil then first = i end
    //   sum = sum + i
    // end
    // return first, sum
    let loop_body: Vec<(Stmt, u32)> = vec![
        (
            Stmt::If {
                arms: vec![IfArm { cond: bin(BinOp::Eq, var("first"), Expr::Nil), body: vec![(Stmt::Assign { targets: vec![var("first")], exprs: vec![var("i")] }, 4)] }],
                else_: None,
            },
            4,
        ),
        (Stmt::Assign { targets: vec![var("sum")], exprs: vec![bin(BinOp::Add, var("sum"), var("i"))] }, 5),
    ];
    let block: Vec<(Stmt, u32)> = vec![
        (local(&["sum"], vec![int(0)]), 1),
        (local(&["first"], vec![Expr::Nil]), 2),
        (Stmt::NumericFor { var: "i".to_string(), start: int(5), stop: int(7), step: None, body: loop_body }, 3),
        (Stmt::Return(vec![var("first"), var("sum")]), 6),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "numeric_for", &[]).expect("numeric for should not fail");
    assert_eq!(result, vec![Value::Number(5.0), Value::Number(18.0)]);
}

#[test]
fn relational_comparison_as_a_value_yields_the_correct_boolean_on_both_branches() {
    // local lt = 1 < 2
    // local ge = 2 < 1
    // return lt, ge
    let block: Vec<(Stmt, u32)> = vec![
        (local(&["lt"], vec![bin(BinOp::Lt, int(1), int(2))]), 1),
        (local(&["ge"], vec![bin(BinOp::Lt, int(2), int(1))]), 2),
        (Stmt::Return(vec![var("lt"), var("ge")]), 3),
    ];

    let mut vm = LuaVM::new();
    let result = vm.run(&block, "compare_as_value", &[]).expect("comparisons-as-values should not fail");
    assert_eq!(result, vec![Value::Boolean(true), Value::Boolean(false)]);
}
