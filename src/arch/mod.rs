//! Conjunto de instrucciones de la Astro-8.
//!
//! Cada palabra de instrucción se compone de un opcode de seis bits
//! en los bits 11 a 16 y de un campo inmediato de diez bits. Las
//! instrucciones que necesitan un operando de dieciséis bits lo toman
//! de la palabra siguiente ("forma larga"), lo cual obliga al contador
//! de programa a avanzar dos posiciones.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use unicase::Ascii;

/// Valor máximo del campo inmediato.
pub const MAX_DATA: u16 = 1023;

/// Forma en la que una instrucción toma su operando.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Form {
    /// No hay operando.
    Implied,

    /// El operando vive en el campo inmediato ("bus").
    Immediate,

    /// El operando es la palabra siguiente.
    Trailing,

    /// El operando es la palabra siguiente y el campo inmediato
    /// selecciona el banco de memoria.
    BankedTrailing,
}

opcodes! {
    Fetch = 0 => "FETCH", Implied;
    Ain = 1 => "AIN", Immediate;
    Bin = 2 => "BIN", Immediate;
    Cin = 3 => "CIN", Immediate;
    Ldia = 4 => "LDIA", Immediate;
    Ldib = 5 => "LDIB", Immediate;
    Sta = 6 => "STA", Immediate;
    Add = 7 => "ADD", Implied;
    Sub = 8 => "SUB", Implied;
    Mult = 9 => "MULT", Implied;
    Div = 10 => "DIV", Implied;
    Jmp = 11 => "JMP", Trailing;
    Jmpz = 12 => "JMPZ", Trailing;
    Jmpc = 13 => "JMPC", Trailing;
    Jreg = 14 => "JREG", Implied;
    Ldain = 15 => "LDAIN", Implied;
    Staout = 16 => "STAOUT", Implied;
    Ldlge = 17 => "LDLGE", BankedTrailing;
    Stlge = 18 => "STLGE", BankedTrailing;
    Ldw = 19 => "LDW", BankedTrailing;
    Swp = 20 => "SWP", Implied;
    Swpc = 21 => "SWPC", Implied;
    Pcr = 22 => "PCR", Implied;
    Bsl = 23 => "BSL", Implied;
    Bsr = 24 => "BSR", Implied;
    And = 25 => "AND", Implied;
    Or = 26 => "OR", Implied;
    Not = 27 => "NOT", Implied;
    Bnk = 28 => "BNK", Immediate;
    Vbuf = 29 => "VBUF", Implied;
    Bnkc = 30 => "BNKC", Implied;
    Ldwb = 31 => "LDWB", BankedTrailing;
}

impl Opcode {
    /// Busca un opcode por identificador numérico.
    pub fn from_id(id: u16) -> Option<Opcode> {
        Opcode::ALL.get(id as usize).copied()
    }

    /// Determina si la instrucción ocupa dos palabras.
    pub fn is_long(self) -> bool {
        matches!(self.form(), Form::Trailing | Form::BankedTrailing)
    }
}

impl Display for Opcode {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let string = Ascii::new(string);
        Opcode::ALL
            .iter()
            .copied()
            .find(|opcode| Ascii::new(opcode.mnemonic()) == string)
            .ok_or(())
    }
}

/// Codifica una palabra de instrucción.
pub fn encode(opcode: Opcode, data: u16) -> u16 {
    ((opcode.id() & 0b11_1111) << 11) | (data & MAX_DATA)
}

/// Separa una palabra en opcode y campo inmediato.
pub fn decode(word: u16) -> (Option<Opcode>, u16) {
    (Opcode::from_id(word >> 11), word & MAX_DATA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_is_ordered() {
        for (index, opcode) in Opcode::ALL.iter().enumerate() {
            assert_eq!(opcode.id() as usize, index);
        }

        assert_eq!(Opcode::ALL.len(), 32);
    }

    #[test]
    fn encoding() {
        assert_eq!(encode(Opcode::Ldia, 5), 0b00100_00000000101);
        assert_eq!(encode(Opcode::Ldwb, 0), 31 << 11);
        assert_eq!(decode(encode(Opcode::Sta, 1023)), (Some(Opcode::Sta), 1023));
    }

    #[test]
    fn mnemonics_ignore_case() {
        assert_eq!("stlge".parse(), Ok(Opcode::Stlge));
        assert_eq!("Bnkc".parse(), Ok(Opcode::Bnkc));
        assert_eq!("JL".parse::<Opcode>(), Err(()));
    }
}
