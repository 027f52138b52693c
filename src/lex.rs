//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone un [`InputStream`]
//! (flujo de caracteres) en unidades léxicas denominadas tokens. Los espacios
//! en blanco y los comentarios (`// …` y `/* … */`) se descartan durante esta
//! operación. Cada token emitido está asociado a una ubicación en el código
//! fuente original, lo cual permite rastrear errores en tanto los mismos como
//! constructos más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por el hecho de lo
//! que son y no incluyen lexemas. Los identificadores sí incluyen su lexema
//! original. Las constantes literales (enteros decimales, `0x` y `0b`,
//! caracteres y strings con secuencias de escape) se resuelven a sus valores.
//!
//! # Reglas importantes del lenguaje
//! - El lenguaje distingue mayúsculas de minúsculas.
//! - Los identificadores pueden incluir `'_'` y dígitos tras el primer carácter.
//! - `_` por sí solo es un identificador, usado como caso por defecto de `switch`.
//!
//! # Errores
//! El lexer es capaz de recuperarse parcialmente de condiciones de error.
//! Esto ocurre en suficiente grado como para reportar más de un error por
//! ejecución, pero no lo suficiente como para permitir el avance a las
//! demás fases de la compilación.

use crate::{
    ast::BinaryOp,
    source::{InputStream, Located, Location},
};

use std::{
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;

/// Literal entero máximo.
const INT_MAX: i32 = i32::MAX;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Bad character {0:?} in input stream")]
    BadChar(char),

    /// Se esperaba un carácter específico en esta posición.
    #[error("Expected {0:?}")]
    Expected(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [0, {INT_MAX}]")]
    IntOverflow,

    /// `0x` o `0b` sin dígitos.
    #[error("Expected digits after radix prefix")]
    MissingDigits,

    #[error("Unknown escape sequence '\\{0}'")]
    BadEscape(char),

    #[error("Empty character literal")]
    EmptyChar,

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Unterminated block comment")]
    UnterminatedComment,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Rc<str>);

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(string: &str) -> Self {
        Identifier(Rc::from(string))
    }
}

impl From<String> for Identifier {
    fn from(string: String) -> Self {
        Identifier(Rc::from(string))
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(i32),

    /// Literal de carácter.
    CharLiteral(char),

    /// Literal de string.
    StrLiteral(String),

    /// `=`
    Assign,

    /// `+=`, `<<=`, etc.
    AssignOp(BinaryOp),

    /// `=>`
    Arrow,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// `%`
    Percent,

    /// `&`
    Ampersand,

    /// `|`
    Pipe,

    /// `^`
    Caret,

    /// `~`
    Tilde,

    /// `!`
    Bang,

    /// `<<`
    ShiftLeft,

    /// `>>`
    ShiftRight,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `<`
    Less,

    /// `<=`
    LessEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterEqual,

    /// `&&`
    AndAlso,

    /// `||`
    OrElse,

    /// `++`
    Increment,

    /// `--`
    Decrement,

    /// `?`
    Question,

    /// `:`
    Colon,

    /// `,`
    Comma,

    /// `.`
    Period,

    /// `;`
    Semicolon,

    /// `@`
    At,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// `[`
    OpenSquare,

    /// `]`
    CloseSquare,
}

/// Operadores de uno o más caracteres.
const OPERATORS: &[(&str, Token)] = &[
    ("=", Token::Assign),
    ("==", Token::Equal),
    ("=>", Token::Arrow),
    ("+", Token::Plus),
    ("++", Token::Increment),
    ("+=", Token::AssignOp(BinaryOp::Add)),
    ("-", Token::Minus),
    ("--", Token::Decrement),
    ("-=", Token::AssignOp(BinaryOp::Sub)),
    ("*", Token::Times),
    ("*=", Token::AssignOp(BinaryOp::Mul)),
    ("%", Token::Percent),
    ("%=", Token::AssignOp(BinaryOp::Mod)),
    ("&", Token::Ampersand),
    ("&&", Token::AndAlso),
    ("&=", Token::AssignOp(BinaryOp::And)),
    ("|", Token::Pipe),
    ("||", Token::OrElse),
    ("|=", Token::AssignOp(BinaryOp::Or)),
    ("^", Token::Caret),
    ("^=", Token::AssignOp(BinaryOp::Xor)),
    ("!", Token::Bang),
    ("!=", Token::NotEqual),
    ("<", Token::Less),
    ("<=", Token::LessEqual),
    ("<<", Token::ShiftLeft),
    ("<<=", Token::AssignOp(BinaryOp::Shl)),
    (">", Token::Greater),
    (">=", Token::GreaterEqual),
    (">>", Token::ShiftRight),
    (">>=", Token::AssignOp(BinaryOp::Shr)),
];

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        let symbol = match self {
            Id(id) => return write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => return write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => return write!(fmt, "literal `{}`", integer),
            CharLiteral(c) => return write!(fmt, "literal {:?}", c),
            StrLiteral(string) => return write!(fmt, "literal {:?}", string),
            AssignOp(op) => return write!(fmt, "`{}=`", op),

            Tilde => "~",
            Question => "?",
            Colon => ":",
            Comma => ",",
            Period => ".",
            Semicolon => ";",
            At => "@",
            OpenParen => "(",
            CloseParen => ")",
            OpenCurly => "{",
            CloseCurly => "}",
            OpenSquare => "[",
            CloseSquare => "]",
            Slash => "/",

            operator => OPERATORS
                .iter()
                .find(|(_, token)| token == operator)
                .map(|(symbol, _)| *symbol)
                .unwrap_or("?"),
        };

        write!(fmt, "`{}`", symbol)
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Const,
    Inline,
    Int,
    Bool,
    Char,
    Void,
    True,
    False,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Return,
    Struct,
    Namespace,
    Use,
    Import,
    Operator,
    Ref,
    Goto,
    Switch,
    Asm,
    Func,
    CreatePointer,
    SizeOf,
    StackAlloc,
}

const KEYWORDS: &[(&str, Keyword)] = &[
    ("var", Keyword::Var),
    ("const", Keyword::Const),
    ("inline", Keyword::Inline),
    ("int", Keyword::Int),
    ("bool", Keyword::Bool),
    ("char", Keyword::Char),
    ("void", Keyword::Void),
    ("true", Keyword::True),
    ("false", Keyword::False),
    ("if", Keyword::If),
    ("else", Keyword::Else),
    ("while", Keyword::While),
    ("for", Keyword::For),
    ("break", Keyword::Break),
    ("continue", Keyword::Continue),
    ("return", Keyword::Return),
    ("struct", Keyword::Struct),
    ("namespace", Keyword::Namespace),
    ("use", Keyword::Use),
    ("import", Keyword::Import),
    ("operator", Keyword::Operator),
    ("ref", Keyword::Ref),
    ("goto", Keyword::Goto),
    ("switch", Keyword::Switch),
    ("asm", Keyword::Asm),
    ("func", Keyword::Func),
    ("create_pointer", Keyword::CreatePointer),
    ("sizeof", Keyword::SizeOf),
    ("stackalloc", Keyword::StackAlloc),
];

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = KEYWORDS
            .iter()
            .find(|(_, keyword)| keyword == self)
            .map(|(name, _)| *name)
            .unwrap_or("?");

        fmt.write_str(name)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en el flujo de entrada.
pub struct Lexer<S: Iterator> {
    source: std::iter::Peekable<S>,
    state: State,
    start: Option<Location>,
    last: Option<Location>,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de error.
    Error,

    /// Estado de completitud; siempre emite el token incluido,
    /// consume la entrada actual y pasa a [`State::Start`].
    Complete(Token),

    /// Se encontró `/`, que puede iniciar un comentario.
    Divide,

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`.
    LineComment,

    /// Comentario de bloque.
    BlockComment,

    /// Se encontró `*` dentro de un comentario de bloque.
    BlockStar,

    /// Se encontró `0`, que puede iniciar un prefijo de base.
    Zero,

    /// Constante entera.
    ///
    /// Este estado incluirá dígitos en el token mientras que
    /// el siguiente carácter sea un dígito en la base actual.
    Integer { value: i32, radix: u32, digits: bool },

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Operador en construcción, extendido mientras siga siendo válido.
    Operator(String),

    /// Literal de carácter, con su valor si ya se leyó.
    Char(Option<char>),

    /// Escape dentro de literal de carácter.
    CharEscape,

    /// Literal de string.
    Str(String),

    /// Escape dentro de literal de string.
    StrEscape(String),
}

impl<S: InputStream> Lexer<S> {
    /// Crea un lexer en estado inicial a partir de un flujo.
    pub fn new(source: S) -> Self {
        Lexer {
            source: source.peekable(),
            state: State::Start,
            start: None,
            last: None,
        }
    }

    /// Reduce la entrada a sea una secuencia conocida de tokens
    /// infalibles o una secuencia de errores.
    ///
    /// En caso de que ocurra al menos un error, el lexer dejará
    /// de buscar tokens exitosos y comenzará a acumular solamente
    /// errores. El propósito de esta función es permitir la
    /// recolección de múltiples errores léxicos en una misma ejecución
    /// del compilador.
    pub fn try_exhaustive(mut self) -> Result<Vec<Located<Token>>, Vec<Located<LexerError>>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.next() {
            match result {
                Ok(token) => tokens.push(token),
                Err(error) => {
                    drop(tokens);

                    let mut errors = vec![error];
                    errors.extend(self.filter_map(Result::err));

                    return Err(errors);
                }
            }
        }

        Ok(tokens)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Option<Token>, (LexerError, Option<Location>)> {
        use {State::*, Token::*};

        loop {
            let (next_char, here) = match self.source.peek() {
                None => (None, None),
                Some((c, location)) => (Some(*c), Some(location.clone())),
            };

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let (Start, Some(here)) = (&self.state, &here) {
                self.start = Some(here.clone());
            }

            let fail = |error| Err((error, here.clone()));

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                // Condiciones de error: se descarta la línea donde
                // ocurrió el error. Al llegar al final de la línea
                // el lexer se recupera y reinicia.
                (Error, None) => return Ok(None),
                (Error, Some('\n')) => self.state = Start,
                (Error, Some(_)) => (),

                // Tokens triviales
                (Start, None) => return Ok(None),
                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some('~')) => self.state = Complete(Tilde),
                (Start, Some('?')) => self.state = Complete(Question),
                (Start, Some(':')) => self.state = Complete(Colon),
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some('.')) => self.state = Complete(Period),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('@')) => self.state = Complete(At),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('[')) => self.state = Complete(OpenSquare),
                (Start, Some(']')) => self.state = Complete(CloseSquare),
                (Start, Some('/')) => self.state = Divide,
                (Start, Some('\'')) => self.state = State::Char(None),
                (Start, Some('"')) => self.state = Str(String::new()),
                (Start, Some('0')) => self.state = Zero,

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_alphabetic() || c == '_' => {
                    self.state = Word(c.to_string())
                }

                // Inicio de una constante numérica. No se consume
                // el dígito, ya que esta lógica ya está implementada
                // en el respectivo caso para un estado de constante
                // entera para el cual el siguiente carácter es un
                // dígito. Por tanto, la constante es inicialmente cero.
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer {
                        value: 0,
                        radix: 10,
                        digits: false,
                    };

                    continue;
                }

                (Start, Some(c)) if is_operator(&c.to_string()) => {
                    self.state = Operator(c.to_string())
                }

                (Start, Some(c)) => break fail(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(value), _) => break Ok(Some(std::mem::replace(value, Plus))),

                // `/` puede iniciar un comentario de la forma `//` o `/*`
                (Divide, Some('/')) => self.state = LineComment,
                (Divide, Some('*')) => self.state = BlockComment,
                (Divide, Some('=')) => self.state = Complete(AssignOp(BinaryOp::Div)),
                (Divide, _) => break Ok(Some(Slash)),

                // Los comentarios descartan la línea donde ocurren
                (LineComment, Some('\n')) | (LineComment, None) => self.state = Start,
                (LineComment, Some(_)) => (),

                (BlockComment, Some('*')) => self.state = BlockStar,
                (BlockComment, Some(_)) => (),
                (BlockStar, Some('/')) => self.state = Start,
                (BlockStar, Some('*')) => (),
                (BlockStar, Some(_)) => self.state = BlockComment,
                (BlockComment, None) | (BlockStar, None) => {
                    break fail(LexerError::UnterminatedComment)
                }

                // Prefijos de base
                (Zero, Some('x')) | (Zero, Some('X')) => {
                    self.state = Integer {
                        value: 0,
                        radix: 16,
                        digits: false,
                    }
                }

                (Zero, Some('b')) | (Zero, Some('B')) => {
                    self.state = Integer {
                        value: 0,
                        radix: 2,
                        digits: false,
                    }
                }

                (Zero, _) => {
                    self.state = Integer {
                        value: 0,
                        radix: 10,
                        digits: true,
                    };

                    continue;
                }

                // Acumulación dígito por dígito de constantes enteras
                (Integer { value, radix, digits }, Some(c)) if c.is_digit(*radix) => {
                    let digit = c.to_digit(*radix).unwrap_or(0) as i32;
                    *digits = true;

                    match value
                        .checked_mul(*radix as i32)
                        .and_then(|n| n.checked_add(digit))
                    {
                        Some(result) => *value = result,
                        None => break fail(LexerError::IntOverflow),
                    }
                }

                (Integer { digits: true, .. }, Some('_')) => (),
                (Integer { digits: false, .. }, _) => break fail(LexerError::MissingDigits),

                // Si sigue algo que no es un dígito, la constante a terminado
                (Integer { value, .. }, _) => break Ok(Some(IntLiteral(*value))),

                // Extensión de términos
                (Word(word), Some(c)) if c.is_alphanumeric() || c == '_' => word.push(c),

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => {
                    let token = match self::Keyword::from_str(word) {
                        Ok(keyword) => Keyword(keyword),
                        Err(()) => Id(Identifier::from(std::mem::take(word))),
                    };

                    break Ok(Some(token));
                }

                // Los operadores crecen mientras formen un prefijo válido
                (Operator(operator), Some(c)) if is_operator(&format!("{}{}", operator, c)) => {
                    operator.push(c)
                }

                (Operator(operator), _) => break Ok(operator_token(operator)),

                (State::Char(None), Some('\\')) => self.state = CharEscape,
                (State::Char(None), Some('\'')) => break fail(LexerError::EmptyChar),
                (State::Char(None), Some(c)) if c != '\n' => self.state = State::Char(Some(c)),
                (State::Char(Some(c)), Some('\'')) => self.state = Complete(CharLiteral(*c)),
                (CharEscape, Some(c)) => match escape(c) {
                    Some(c) => self.state = State::Char(Some(c)),
                    None => break fail(LexerError::BadEscape(c)),
                },

                (State::Char(_), _) | (CharEscape, None) => break fail(LexerError::Expected('\'')),

                (Str(string), Some('"')) => {
                    self.state = Complete(StrLiteral(std::mem::take(string)))
                }

                (Str(string), Some('\\')) => self.state = StrEscape(std::mem::take(string)),
                (Str(_), Some('\n')) | (Str(_), None) | (StrEscape(_), None) => {
                    break fail(LexerError::UnterminatedString)
                }

                (Str(string), Some(c)) => string.push(c),
                (StrEscape(string), Some(c)) => match escape(c) {
                    Some(c) => {
                        string.push(c);
                        self.state = Str(std::mem::take(string));
                    }

                    None => break fail(LexerError::BadEscape(c)),
                },
            }

            // Si no hubo `continue`, aquí se consume el carácter que
            // se observó con lookahead anteriormente
            if let Some((_, location)) = self.source.next() {
                self.last = Some(location);
            }
        }
    }
}

impl<S: InputStream> Iterator for Lexer<S> {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lex() {
            Ok(None) => None,
            Ok(Some(token)) => {
                self.state = State::Start;

                let start = self.start.clone()?;
                let location = match &self.last {
                    Some(last) => Location::span(start, last),
                    None => start,
                };

                Some(Ok(Located::at(token, location)))
            }

            Err((error, here)) => {
                self.state = State::Error;

                let location = here.or_else(|| self.last.clone())?;
                Some(Err(Located::at(error, location)))
            }
        }
    }
}

/// Determina si una secuencia es un operador o prefijo de uno.
fn is_operator(candidate: &str) -> bool {
    OPERATORS.iter().any(|(symbol, _)| *symbol == candidate)
}

fn operator_token(operator: &str) -> Option<Token> {
    OPERATORS
        .iter()
        .find(|(symbol, _)| *symbol == operator)
        .map(|(_, token)| token.clone())
}

/// Resuelve el carácter tras `\`.
fn escape(c: char) -> Option<char> {
    let escaped = match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        _ => return None,
    };

    Some(escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{consume, Source};
    use pretty_assertions::assert_eq;

    fn tokens(text: &str) -> Vec<Token> {
        let source = Source::new("test.yabal", text);
        let (_, chars) = consume(&source);

        Lexer::new(chars)
            .try_exhaustive()
            .unwrap()
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    fn errors(text: &str) -> Vec<String> {
        let source = Source::new("test.yabal", text);
        let (_, chars) = consume(&source);

        Lexer::new(chars)
            .try_exhaustive()
            .unwrap_err()
            .into_iter()
            .map(|error| error.val().to_string())
            .collect()
    }

    #[test]
    fn declarations() {
        assert_eq!(
            tokens("var a = 0x1F; // comment\nconst int b = 0b101"),
            vec![
                Token::Keyword(Keyword::Var),
                Token::Id(Identifier::from("a")),
                Token::Assign,
                Token::IntLiteral(31),
                Token::Semicolon,
                Token::Keyword(Keyword::Const),
                Token::Keyword(Keyword::Int),
                Token::Id(Identifier::from("b")),
                Token::Assign,
                Token::IntLiteral(5),
            ]
        );
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            tokens("a <<= b >> c => d != !e && f++"),
            vec![
                Token::Id(Identifier::from("a")),
                Token::AssignOp(BinaryOp::Shl),
                Token::Id(Identifier::from("b")),
                Token::ShiftRight,
                Token::Id(Identifier::from("c")),
                Token::Arrow,
                Token::Id(Identifier::from("d")),
                Token::NotEqual,
                Token::Bang,
                Token::Id(Identifier::from("e")),
                Token::AndAlso,
                Token::Id(Identifier::from("f")),
                Token::Increment,
            ]
        );
    }

    #[test]
    fn literals_and_comments() {
        assert_eq!(
            tokens("'a' '\\n' \"hi\\t\" /* block * comment */ a/b /= 2"),
            vec![
                Token::CharLiteral('a'),
                Token::CharLiteral('\n'),
                Token::StrLiteral("hi\t".into()),
                Token::Id(Identifier::from("a")),
                Token::Slash,
                Token::Id(Identifier::from("b")),
                Token::AssignOp(BinaryOp::Div),
                Token::IntLiteral(2),
            ]
        );
    }

    #[test]
    fn locations_span_tokens() {
        let source = Source::new("test.yabal", "var name");
        let (_, chars) = consume(&source);
        let tokens = Lexer::new(chars).try_exhaustive().unwrap();

        assert_eq!(tokens[1].location().offset(), 4);
        assert_eq!(tokens[1].location().len(), 4);
    }

    #[test]
    fn errors_recover_per_line() {
        assert_eq!(
            errors("var a = $\nvar b = 0x\nvar c = \"open"),
            vec![
                "Bad character '$' in input stream",
                "Expected digits after radix prefix",
                "Unterminated string literal",
            ]
        );
    }
}
