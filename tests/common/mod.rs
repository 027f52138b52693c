//! Emulador mínimo de la Astro-8 para pruebas de extremo a extremo.

#![allow(dead_code)]

use std::collections::HashMap;

use yabal::{
    arch::{self, Opcode},
    compile,
    error::Severity,
    import::MemoryReader,
    Compilation, Options,
};

const BANK_WORDS: usize = 0x10000;
const STEP_LIMIT: usize = 2_000_000;

/// Estado de la CPU tras ejecutar un programa.
pub struct Cpu {
    pub a: u16,
    pub b: u16,
    pub c: u16,
    pub pc: u16,
    pub bank: u16,
    zero: bool,
    carry: bool,
    banks: HashMap<u16, Vec<u16>>,
    length: usize,
}

impl Cpu {
    pub fn new(words: &[u16]) -> Self {
        let mut memory = vec![0; BANK_WORDS];
        memory[..words.len()].copy_from_slice(words);

        let mut banks = HashMap::new();
        banks.insert(0, memory);

        Cpu {
            a: 0,
            b: 0,
            c: 0,
            pc: 0,
            bank: 0,
            zero: false,
            carry: false,
            banks,
            length: words.len(),
        }
    }

    pub fn read(&self, bank: u16, address: u16) -> u16 {
        self.banks
            .get(&bank)
            .map_or(0, |memory| memory[address as usize])
    }

    pub fn write(&mut self, bank: u16, address: u16, value: u16) {
        let memory = self
            .banks
            .entry(bank)
            .or_insert_with(|| vec![0; BANK_WORDS]);

        memory[address as usize] = value;
    }

    fn flags(&mut self, value: u16) -> u16 {
        self.zero = value == 0;
        value
    }

    /// Ejecuta hasta salir de la imagen.
    pub fn run(&mut self) {
        let mut steps = 0;
        while (self.pc as usize) < self.length {
            steps += 1;
            assert!(steps < STEP_LIMIT, "program did not halt");

            self.step();
        }
    }

    fn step(&mut self) {
        let at = self.pc;
        let (opcode, data) = arch::decode(self.read(0, at));
        let opcode = opcode.unwrap_or_else(|| panic!("invalid opcode at {}", at));

        self.pc = self.pc.wrapping_add(1);
        let word = match opcode.is_long() {
            true => {
                let word = self.read(0, self.pc);
                self.pc = self.pc.wrapping_add(1);
                word
            }

            false => 0,
        };

        let bank = self.bank;
        match opcode {
            Opcode::Fetch | Opcode::Vbuf => (),
            Opcode::Ain => self.a = self.read(bank, data),
            Opcode::Bin => self.b = self.read(bank, data),
            Opcode::Cin => self.c = self.read(bank, data),
            Opcode::Ldia => self.a = data,
            Opcode::Ldib => self.b = data,
            Opcode::Sta => self.write(bank, data, self.a),

            Opcode::Add => {
                let (sum, carry) = self.a.overflowing_add(self.b);
                self.carry = carry;
                self.a = self.flags(sum);
            }

            Opcode::Sub => {
                self.carry = self.a >= self.b;
                self.a = self.flags(self.a.wrapping_sub(self.b));
            }

            Opcode::Mult => self.a = self.flags(self.a.wrapping_mul(self.b)),
            Opcode::Div => self.a = self.flags(self.a.checked_div(self.b).unwrap_or(0)),
            Opcode::And => self.a = self.flags(self.a & self.b),
            Opcode::Or => self.a = self.flags(self.a | self.b),
            Opcode::Not => self.a = self.flags(!self.a),

            Opcode::Bsl => {
                let value = self.a.checked_shl(u32::from(self.b)).unwrap_or(0);
                self.a = self.flags(value);
            }

            Opcode::Bsr => {
                let value = self.a.checked_shr(u32::from(self.b)).unwrap_or(0);
                self.a = self.flags(value);
            }

            Opcode::Jmp => self.pc = word,
            Opcode::Jmpz if self.zero => self.pc = word,
            Opcode::Jmpc if self.carry => self.pc = word,
            Opcode::Jmpz | Opcode::Jmpc => (),
            Opcode::Jreg => self.pc = self.a,
            Opcode::Pcr => self.a = at,

            Opcode::Ldain => self.a = self.read(bank, self.a),
            Opcode::Staout => self.write(bank, self.a, self.b),

            Opcode::Ldlge => {
                self.bank = data;
                self.a = self.read(data, word);
            }

            Opcode::Stlge => {
                self.bank = data;
                self.write(data, word, self.a);
            }

            Opcode::Ldw => {
                self.bank = data;
                self.a = word;
            }

            Opcode::Ldwb => {
                self.bank = data;
                self.b = word;
            }

            Opcode::Swp => {
                let a = self.a;
                self.c = a;
                self.a = self.b;
                self.b = a;
            }

            Opcode::Swpc => {
                let a = self.a;
                self.b = a;
                self.a = self.c;
                self.c = a;
            }

            Opcode::Bnk => self.bank = data,
            Opcode::Bnkc => self.bank = self.c,
        }
    }
}

/// Programa compilado y ejecutado.
pub struct Run {
    pub compilation: Compilation,
    pub cpu: Cpu,
}

impl Run {
    /// Valor de una variable global.
    pub fn global(&self, name: &str) -> u16 {
        self.word(name, 0)
    }

    /// Palabra `offset` de una variable global de varias palabras.
    pub fn word(&self, name: &str, offset: u16) -> u16 {
        let address = self
            .compilation
            .address(name)
            .unwrap_or_else(|| panic!("no global named '{}'", name));

        self.cpu.read(0, address + offset)
    }
}

pub fn compile_with(reader: &MemoryReader, source: &str, optimize: bool) -> Compilation {
    let options = Options {
        optimize,
        ..Options::default()
    };

    compile(source, "main.yabal", &options, reader).expect("internal linker error")
}

pub fn run_with(reader: &MemoryReader, source: &str, optimize: bool) -> Run {
    let compilation = compile_with(reader, source, optimize);
    if compilation.diagnostics().has_errors() {
        panic!(
            "compilation failed:\n{}",
            compilation.diagnostics().display(Severity::Error)
        );
    }

    let mut cpu = Cpu::new(compilation.image().expect("image").words());
    cpu.run();

    assert_eq!(cpu.bank, 0, "bank was not restored");
    Run { compilation, cpu }
}

/// Ejecuta un programa con y sin optimización.
pub fn check<F: Fn(&Run)>(source: &str, verify: F) {
    check_with(&MemoryReader::new(), source, verify);
}

pub fn check_with<F: Fn(&Run)>(reader: &MemoryReader, source: &str, verify: F) {
    for optimize in [false, true] {
        let run = run_with(reader, source, optimize);
        verify(&run);
    }
}

/// Mensajes de error de un programa que no debe compilar.
pub fn errors(source: &str) -> Vec<String> {
    let compilation = compile_with(&MemoryReader::new(), source, true);
    compilation
        .diagnostics()
        .messages(Severity::Error)
        .map(str::to_owned)
        .collect()
}
