/// Define la tabla de opcodes.
///
/// Cada entrada indica mnemónico, identificador numérico y forma de
/// operando. El orden de declaración debe coincidir con el identificador.
macro_rules! opcodes {
    ($($variant:ident = $id:literal => $mnemonic:literal, $form:ident;)*) => {
        /// Un opcode de la Astro-8.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant = $id,)*
        }

        impl Opcode {
            /// Todos los opcodes, en orden de identificador.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Identificador numérico de seis bits.
            pub fn id(self) -> u16 {
                self as u16
            }

            /// Mnemónico en mayúsculas.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            /// Forma en la que la instrucción recibe su operando.
            pub fn form(self) -> Form {
                match self {
                    $(Opcode::$variant => Form::$form,)*
                }
            }
        }
    };
}

/// Emite una instrucción en el builder actual del compilador.
///
/// La segunda forma acepta un operando y la tercera además un comentario.
macro_rules! emit {
    ($cx:expr, $opcode:ident) => {
        $cx.code.emit(crate::arch::Opcode::$opcode, crate::link::Operand::None)
    };

    ($cx:expr, $opcode:ident, $operand:expr) => {
        $cx.code.emit(crate::arch::Opcode::$opcode, crate::link::Operand::from($operand))
    };

    ($cx:expr, $opcode:ident, $operand:expr, $($comment:tt)*) => {{
        $cx.code.emit(crate::arch::Opcode::$opcode, crate::link::Operand::from($operand));
        $cx.code.comment(format!($($comment)*));
    }};
}
