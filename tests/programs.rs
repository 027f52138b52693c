//! Programas completos ejecutados sobre el emulador.

mod common;

use common::{check, compile_with, errors};
use pretty_assertions::assert_eq;
use yabal::{
    compile,
    import::MemoryReader,
    link::{LinkerError, ListingOptions},
    Options,
};

#[test]
fn compound_assignment() {
    check("var a = 2; a += 2;", |run| assert_eq!(run.global("a"), 4));
}

#[test]
fn arithmetic_operators() {
    let source = "
        var a = 2
        var big = a + 5000
        var product = a * 1000
        var quotient = 17 / a
        var remainder = 17 % 5
        var dynamic_remainder = 17 % (a + 3)
        var shifted = a << 3
        var mixed = a ^ 7
        var negative = -a
        var inverted = ~a
    ";

    check(source, |run| {
        assert_eq!(run.global("big"), 5002);
        assert_eq!(run.global("product"), 2000);
        assert_eq!(run.global("quotient"), 8);
        assert_eq!(run.global("remainder"), 2);
        assert_eq!(run.global("dynamic_remainder"), 2);
        assert_eq!(run.global("shifted"), 16);
        assert_eq!(run.global("mixed"), 5);
        assert_eq!(run.global("negative"), 0xFFFE);
        assert_eq!(run.global("inverted"), 0xFFFD);
    });
}

#[test]
fn comparisons_and_logic() {
    let source = "
        var a = 2
        var b = 7
        var less = a < b
        var greater = a > b
        var equal = a == 2
        var both = a == 2 && b != 2
        var either = a > 5 || b >= 7
        var negated = !(a <= b)
    ";

    check(source, |run| {
        assert_eq!(run.global("less"), 1);
        assert_eq!(run.global("greater"), 0);
        assert_eq!(run.global("equal"), 1);
        assert_eq!(run.global("both"), 1);
        assert_eq!(run.global("either"), 1);
        assert_eq!(run.global("negated"), 0);
    });
}

#[test]
fn loops_break_and_continue() {
    let source = "
        var sum = 0
        for (var i = 0; i < 10; i++) {
            sum += i
        }

        var n = 0
        var odd = 0
        while (true) {
            n++
            if (n > 10) break
            if (n % 2 == 0) continue
            odd += n
        }
    ";

    check(source, |run| {
        assert_eq!(run.global("sum"), 45);
        assert_eq!(run.global("odd"), 25);
        assert_eq!(run.global("n"), 11);
    });
}

#[test]
fn labels_and_goto() {
    let source = "
        var n = 0
        again:
        n++
        if (n < 5) goto again
    ";

    check(source, |run| assert_eq!(run.global("n"), 5));
}

#[test]
fn switch_and_ternary() {
    let source = "
        var a = 2
        var picked = a switch { 1 => 10, 2 => 20, _ => 30 }
        var fallback = a switch { 5 => 10, _ => 30 }
        var missing = a switch { 7 => 1 }
        var chosen = a > 1 ? 5 : 6
    ";

    check(source, |run| {
        assert_eq!(run.global("picked"), 20);
        assert_eq!(run.global("fallback"), 30);
        assert_eq!(run.global("missing"), 0);
        assert_eq!(run.global("chosen"), 5);
    });
}

#[test]
fn bit_fields_share_a_word() {
    let source = "
        struct Pair { int a: 4; int b: 4 }
        Pair pair = { a: 1, b: 1 }
    ";

    check(source, |run| assert_eq!(run.global("pair"), 0b0001_0001));
}

#[test]
fn bit_field_updates_stay_in_range() {
    let source = "
        struct Pair { int a: 4; int b: 4 }
        Pair pair = { a: 3, b: 15 }
        pair.b++
        var before = pair.a++
        var high = pair.b
    ";

    check(source, |run| {
        assert_eq!(run.global("pair"), 4);
        assert_eq!(run.global("before"), 3);
        assert_eq!(run.global("high"), 0);
    });
}

#[test]
fn storage_beyond_the_immediate_range() {
    let fields: Vec<_> = (0..100).map(|i| format!("int f{}", i)).collect();
    let mut source = format!("struct Block {{ {} }}\n", fields.join("; "));
    for i in 0..12 {
        source.push_str(&format!("Block g{}\n", i));
    }

    source.push_str(
        "
        struct Flags { int low: 4; int high: 4 }

        int sum_to(int n) {
            if (n == 0) return 0
            var here = n
            return here + sum_to(n - 1)
        }

        Flags flags = { low: 3, high: 9 }
        var p = create_pointer<int>(40, 1)

        g11.f99 = 5
        p[2] = g11.f99 + 2
        flags.high = 12

        var last = g11.f99
        var far = p[2]
        var total = sum_to(10)
        var mixed = last ^ 3
        var remainder = total % 7
        var high = flags.high
    ",
    );

    check(&source, |run| {
        assert!(run.compilation.address("g11").expect("g11") > 1023);
        assert_eq!(run.word("g11", 99), 5);
        assert_eq!(run.cpu.read(1, 42), 7);

        assert_eq!(run.global("last"), 5);
        assert_eq!(run.global("far"), 7);
        assert_eq!(run.global("total"), 55);
        assert_eq!(run.global("mixed"), 6);
        assert_eq!(run.global("remainder"), 6);
        assert_eq!(run.global("high"), 12);
        assert_eq!(run.global("flags"), 3 | (12 << 4));
    });

    let listing = compile_with(&MemoryReader::new(), &source, false)
        .image()
        .expect("image")
        .to_assembly(ListingOptions::empty());

    assert!(listing.contains("LDLGE"), "{}", listing);
    assert!(listing.contains("STLGE"), "{}", listing);
}

#[test]
fn far_variables_are_rejected_in_assembly() {
    let mut source = String::from("struct Block { int a; int b; int c; int d }\n");
    for i in 0..300 {
        source.push_str(&format!("Block g{}\n", i));
    }

    source.push_str("asm {\n    LDIA 1\n    STA @g299\n}\n");

    assert_eq!(
        errors(&source),
        vec!["Variable 'g299' is out of reach for 'STA', use LDLGE or STLGE"]
    );
}

#[test]
fn load_offset_keeps_runtime_cells_in_reach() {
    let reader = MemoryReader::new();
    let options = Options {
        offset: 1020,
        ..Options::default()
    };

    let result = compile("var a = 1", "main.yabal", &options, &reader);
    assert!(matches!(result, Err(LinkerError::RuntimeOutOfReach(1020))));

    let options = Options {
        offset: 512,
        ..Options::default()
    };

    let compilation = compile("var a = 1", "main.yabal", &options, &reader).expect("linked");
    assert_eq!(compilation.image().expect("image").offset(), 512);
}

#[test]
fn struct_fields_and_copies() {
    let source = "
        struct Point { int x; int y }
        Point first = { x: 3, y: 4 }
        Point second = first
        second.y = 9
        var sum = second.x + second.y
    ";

    check(source, |run| {
        assert_eq!(run.word("first", 1), 4);
        assert_eq!(run.word("second", 0), 3);
        assert_eq!(run.word("second", 1), 9);
        assert_eq!(run.global("sum"), 12);
    });
}

#[test]
fn semantic_errors_are_reported() {
    assert_eq!(
        errors("var a = 1\nvar a = 2"),
        vec!["Variable 'a' is already declared in this scope"]
    );

    assert_eq!(errors("var a = b"), vec!["Variable 'b' could not be found"]);
    assert_eq!(errors("break"), vec!["Break statement outside of a loop"]);
}
