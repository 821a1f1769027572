//! End-to-end tests: compile C source and execute it in the VM.

use cinder_compiler::compile;
use cinder_vm::values::Value;
use cinder_vm::vm::Vm;

/// Helper: compile `source`, link it and run the global initializers.
fn load(source: &str) -> Vm {
    let module = compile(source).expect("source should compile");
    let mut vm = Vm::new();
    let inits = vm.link(module).expect("module should link");
    for init in inits {
        vm.call(&init, &[]).expect("initializer should run");
    }
    vm
}

fn call(vm: &mut Vm, name: &str, args: &[Value]) -> Value {
    vm.call(name, args).expect("call should succeed").expect("function should return a value")
}

// ─── Control flow ───

#[test]
fn e2e_recursive_fibonacci() {
    let mut vm = load("int fib(int n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }");
    assert_eq!(call(&mut vm, "fib", &[Value::Int(15)]), Value::Int(610));
}

#[test]
fn e2e_while_and_conditional_operator() {
    let mut vm = load(
        r#"
int collatz(int n) {
    int steps = 0;
    while (n != 1) {
        n = n % 2 ? 3 * n + 1 : n / 2;
        steps++;
    }
    return steps;
}
"#,
    );
    assert_eq!(call(&mut vm, "collatz", &[Value::Int(6)]), Value::Int(8));
}

#[test]
fn e2e_for_loops_over_arrays() {
    let mut vm = load(
        r#"
int sum_squares() {
    int a[5];
    int i;
    for (i = 0; i < 5; i++) a[i] = i * i;
    int s = 0;
    for (i = 0; i < 5; ++i) s += a[i];
    return s;
}
"#,
    );
    assert_eq!(call(&mut vm, "sum_squares", &[]), Value::Int(30));
}

#[test]
fn e2e_logical_and_short_circuits() {
    let mut vm = load(
        r#"
int calls = 0;
int touch() { calls++; return 1; }
int check() { return 0 && touch(); }
"#,
    );
    assert_eq!(call(&mut vm, "check", &[]), Value::Int(0));
    let calls = vm.global_address("calls").unwrap();
    assert_eq!(vm.read(calls).unwrap(), Value::Int(0));
}

// ─── Memory ───

#[test]
fn e2e_pointers_write_through() {
    let mut vm = load(
        "void bump(int *p) { *p += 3; } int run() { int x = 4; bump(&x); return x; }",
    );
    assert_eq!(call(&mut vm, "run", &[]), Value::Int(7));
}

#[test]
fn e2e_struct_fields_through_pointer() {
    let mut vm = load(
        r#"
struct P { int x; double y; };
double area() {
    struct P p;
    p.x = 2;
    p.y = 1.5;
    struct P *q = &p;
    return q->x * q->y;
}
"#,
    );
    assert_eq!(call(&mut vm, "area", &[]), Value::Float(3.0));
}

#[test]
fn e2e_globals_initialise_before_use() {
    let mut vm = load("int base = 10; int twice() { return base * 2; }");
    assert_eq!(call(&mut vm, "twice", &[]), Value::Int(20));
}

// ─── Arithmetic ───

#[test]
fn e2e_unsigned_wraparound() {
    let mut vm = load("unsigned int half() { unsigned int v = 0; v = v - 1; return v / 2; }");
    assert_eq!(call(&mut vm, "half", &[]), Value::Int(0x7fff_ffff));
}

#[test]
fn e2e_division_by_zero_is_a_runtime_error() {
    let mut vm = load("int inv(int d) { return 1 / d; }");
    let err = vm.call("inv", &[Value::Int(0)]).unwrap_err();
    assert_eq!(err.message(), "division by zero");
    assert_eq!(call(&mut vm, "inv", &[Value::Int(1)]), Value::Int(1));
}

// ─── Builtins ───

#[test]
fn e2e_printf_writes_output() {
    let mut vm = load(
        r#"
int greet() {
    const char *name = "cinder";
    printf("hi %s %d %.2f\n", name, (int)strlen(name), 2.5);
    return 0;
}
"#,
    );
    call(&mut vm, "greet", &[]);
    assert_eq!(vm.take_output(), "hi cinder 6 2.50\n");
}

#[test]
fn e2e_math_builtins() {
    let mut vm = load("double hyp(double a, double b) { return sqrt(pow(a, 2) + pow(b, 2)); }");
    assert_eq!(call(&mut vm, "hyp", &[Value::Float(3.0), Value::Float(4.0)]), Value::Float(5.0));
}
