//! Punteros, bancos de memoria, cadenas, `stackalloc` y ensamblador.

mod common;

use common::{check, errors};
use pretty_assertions::assert_eq;
use yabal::STACK_ALLOC_START;

#[test]
fn pointers_reach_other_banks() {
    let source = "
        var p = create_pointer<int>(100, 1)
        p[0] = 7
        p[3] = 9

        for (var i = 0; i < 3; i++) {
            p[i + 10] = i * 2
        }

        var sum = p[0] + p[3]
        var last = p[12]
    ";

    check(source, |run| {
        assert_eq!(run.cpu.read(1, 100), 7);
        assert_eq!(run.cpu.read(1, 103), 9);
        assert_eq!(run.cpu.read(1, 111), 2);

        let words = run.compilation.image().expect("image").words();
        for address in [100, 103, 111] {
            let loaded = words.get(address).copied().unwrap_or(0);
            assert_eq!(run.cpu.read(0, address as u16), loaded);
        }

        assert_eq!(run.global("sum"), 16);
        assert_eq!(run.global("last"), 4);
        assert_eq!(run.word("p", 1), 1);
    });
}

#[test]
fn pointer_elements_can_be_structs() {
    let source = "
        struct Cell { int kind: 4; int rotation: 2; bool active }
        var cells = create_pointer<Cell>(200, 2)

        cells[1].kind = 5
        cells[1].rotation = 3
        cells[1].active = true

        var kind = cells[1].kind
    ";

    check(source, |run| {
        assert_eq!(run.cpu.read(2, 202), 5 | (3 << 4));
        assert_eq!(run.cpu.read(2, 203), 1);
        assert_eq!(run.global("kind"), 5);
    });
}

#[test]
fn strings_are_terminated_character_arrays() {
    let source = "
        var text = \"hello\"
        var length = sizeof(text)
        var first = text[0]
        var last = text[4]
        var end = text[5]
    ";

    check(source, |run| {
        assert_eq!(run.global("length"), 5);
        assert_eq!(run.global("first"), u16::from(b'h'));
        assert_eq!(run.global("last"), u16::from(b'o'));
        assert_eq!(run.global("end"), 0xFFFF);
    });
}

#[test]
fn stack_allocations_are_released_on_return() {
    let source = "
        int fill() {
            var data = stackalloc int[3]
            data[0] = 4
            data[1] = 5
            data[2] = 6
            return data[0] + data[1] + data[2]
        }

        var first = fill()
        var second = fill()
    ";

    check(source, |run| {
        assert_eq!(run.global("first"), 15);
        assert_eq!(run.global("second"), 15);

        let pointer = run.compilation.stack_alloc_pointer().expect("stack alloc pointer");
        assert_eq!(run.cpu.read(0, pointer), STACK_ALLOC_START);
        assert_eq!(run.cpu.read(0, STACK_ALLOC_START + 1), 5);
    });
}

#[test]
fn inline_assembly() {
    let source = "
        var value = 0
        var counter = 0

        asm {
            LDIA 42
            STA @value
            LDIA 3
            STA @counter
        loop:
            AIN @counter
            LDIB 1
            SUB
            STA @counter
            JMPZ done
            JMP loop
        done:
        }
    ";

    check(source, |run| {
        assert_eq!(run.global("value"), 42);
        assert_eq!(run.global("counter"), 0);
    });
}

#[test]
fn references_to_other_banks_are_rejected() {
    let source = "
        void clear(ref int value) { value = 0 }
        clear(create_pointer<int>(10, 3)[0])
    ";

    assert_eq!(
        errors(source),
        vec!["References must point to bank 0, found bank 3"]
    );
}
