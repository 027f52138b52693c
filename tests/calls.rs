//! Llamadas, expansión en línea y valores función.

mod common;

use common::{check, check_with, compile_with};
use pretty_assertions::assert_eq;
use yabal::{import::MemoryReader, link::ListingOptions};

#[test]
fn inline_call_folds_to_literal() {
    let source = "
        inline int get_offset(int x, int y) { return x * 64 + y }
        var offset = get_offset(3, 5)
    ";

    check(source, |run| assert_eq!(run.global("offset"), 197));

    let compilation = compile_with(&MemoryReader::new(), source, true);
    let listing = compilation
        .image()
        .expect("image")
        .to_assembly(ListingOptions::empty());

    assert!(listing.contains("LDIA 197"), "{}", listing);
}

#[test]
fn inline_functions_with_statements() {
    let source = "
        inline int clamp(int value, int limit) {
            if (value > limit) return limit
            return value
        }

        var low = clamp(3, 10)
        var high = clamp(30, 10)
    ";

    check(source, |run| {
        assert_eq!(run.global("low"), 3);
        assert_eq!(run.global("high"), 10);
    });
}

#[test]
fn nested_calls() {
    let source = "
        int add(int a, int b) { return a + b }
        var total = add(add(1, 2), add(3, 4))
    ";

    check(source, |run| assert_eq!(run.global("total"), 10));
}

#[test]
fn default_arguments() {
    let source = "
        int add(int a, int b = 2) => a + b
        var short = add(5)
        var long = add(5, 10)
    ";

    check(source, |run| {
        assert_eq!(run.global("short"), 7);
        assert_eq!(run.global("long"), 15);
    });
}

#[test]
fn recursion_restores_locals() {
    let source = "
        int factorial(int n) {
            if (n <= 1) return 1
            return n * factorial(n - 1)
        }

        int fibonacci(int n) {
            if (n < 2) return n
            return fibonacci(n - 1) + fibonacci(n - 2)
        }

        var f = factorial(6)
        var g = fibonacci(10)
    ";

    check(source, |run| {
        assert_eq!(run.global("f"), 720);
        assert_eq!(run.global("g"), 55);
    });
}

#[test]
fn references_write_through() {
    let source = "
        void increment(ref int value) { value++ }

        int local() {
            var counter = 5
            increment(ref counter)
            increment(counter)
            return counter
        }

        var a = 1
        increment(ref a)
        var b = local()
    ";

    check(source, |run| {
        assert_eq!(run.global("a"), 2);
        assert_eq!(run.global("b"), 7);
    });
}

#[test]
fn structs_as_parameters_and_results() {
    let source = "
        struct Point { int x; int y }

        Point make(int x, int y) {
            Point p = { x: x, y: y }
            return p
        }

        int sum(Point p) => p.x + p.y

        Point moved = make(3, 4)
        var total = sum(make(10, 20))
    ";

    check(source, |run| {
        assert_eq!(run.word("moved", 0), 3);
        assert_eq!(run.word("moved", 1), 4);
        assert_eq!(run.global("total"), 30);
    });
}

#[test]
fn operator_and_cast_overloads() {
    let source = "
        struct Vector { int x; int y }

        Vector operator +(Vector a, Vector b) {
            Vector r = { x: a.x + b.x, y: a.y + b.y }
            return r
        }

        operator int(Vector v) => v.x + v.y

        Vector p = { x: 1, y: 2 }
        Vector q = { x: 10, y: 20 }
        Vector s = p + q
        var total = (int)s
    ";

    check(source, |run| {
        assert_eq!(run.word("s", 0), 11);
        assert_eq!(run.word("s", 1), 22);
        assert_eq!(run.global("total"), 33);
    });
}

#[test]
fn function_values_and_arrows() {
    let source = "
        int twice(int x) => x * 2

        func<int, int> f = twice
        var a = f(4)

        func<int, int, int> add = (x, y) => x + y
        var b = add(2, 3)
    ";

    check(source, |run| {
        assert_eq!(run.global("a"), 8);
        assert_eq!(run.global("b"), 5);
    });
}

#[test]
fn imports_and_namespaces() {
    let library = "
        var base = 10

        namespace math {
            int square(int x) => x * x
        }

        int add_base(int x) => x + base
    ";

    let reader = MemoryReader::new().with("lib.yabal", library);
    let source = "
        import \"lib.yabal\"
        use math

        var squared = square(7)
        var shifted = add_base(5)
    ";

    check_with(&reader, source, |run| {
        assert_eq!(run.global("squared"), 49);
        assert_eq!(run.global("shifted"), 15);
    });
}

#[test]
fn unused_functions_are_excluded() {
    let used = "
        int unused(int x) => x + 1
        var a = 1
    ";

    let compilation = compile_with(&MemoryReader::new(), used, true);
    let messages: Vec<_> = compilation
        .diagnostics()
        .messages(yabal::error::Severity::Debug)
        .collect();

    assert_eq!(
        messages,
        vec!["Function 'unused' is never called and will be excluded from the output."]
    );

    assert!(compilation.stack_pointer().is_some());
}
