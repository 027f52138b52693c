//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de posiciones o rangos de ubicaciones en
//! el código fuente original, lo cual permite determinar un punto
//! exacto o aproximado en donde ocurre un error de abstracción
//! arbitraria. Cada posición registra línea, columna y desplazamiento
//! en bytes, de modo que un rango también conoce su longitud.

use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    ops::Range,
    rc::Rc,
};

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Un flujo de entrada, carácter por carácter.
///
/// Cada carácter se acompaña de la ubicación que ocupa.
pub trait InputStream: Iterator<Item = (char, Location)> {}

impl<I: Iterator<Item = (char, Location)>> InputStream for I {}

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T> AsMut<T> for Located<T> {
    fn as_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
///
/// El fin del rango es exclusivo. Dos ubicaciones se consideran iguales
/// si provienen del mismo origen y cubren los mismos bytes.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    position: Range<Position>,
}

impl Location {
    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            from: from.from,
            position: from.position.start..to.position.end,
        }
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.position.start
    }

    /// Obtiene la posición de fin.
    pub fn end(&self) -> Position {
        self.position.end
    }

    /// Desplazamiento en bytes del inicio del rango.
    pub fn offset(&self) -> usize {
        self.position.start.offset
    }

    /// Longitud en bytes del rango.
    pub fn len(&self) -> usize {
        self.position.end.offset - self.position.start.offset
    }

    /// Determina si el rango no cubre bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtiene el archivo de origen.
    pub fn source(&self) -> &Source {
        &self.from
    }

    /// Una ubicación vacía al final de esta.
    pub fn after(&self) -> Location {
        Location {
            from: Rc::clone(&self.from),
            position: self.position.end..self.position.end,
        }
    }

    fn key(&self) -> (&str, usize, usize) {
        (
            &self.from.name,
            self.position.start.offset,
            self.position.end.offset,
        )
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name)?;

        let Range { start, end } = self.position;
        if end.line != start.line || end.column > start.column + 1 {
            write!(formatter, "[{}-{}]", start, end.back())
        } else {
            // Solo se señala una columna en específico
            write!(formatter, "{}", start)
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
    offset: usize,
}

impl Position {
    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Obtiene el desplazamiento en bytes desde el inicio del archivo.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Avanza sobre un carácter.
    fn advance(self, c: char) -> Position {
        let offset = self.offset + c.len_utf8();
        match c {
            '\n' => Position {
                line: self.line + 1,
                column: 1,
                offset,
            },

            '\t' => Position {
                line: self.line,
                column: 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP,
                offset,
            },

            _ => Position {
                line: self.line,
                column: self.column + 1,
                offset,
            },
        }
    }

    /// Decrementa el número de columna.
    fn back(self) -> Position {
        Position {
            column: self.column.saturating_sub(1).max(1),
            ..self
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

/// Nombre de origen y contenido completo.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    /// Registra un archivo de código fuente.
    pub fn new<N: Into<String>, T: Into<String>>(name: N, text: T) -> Rc<Self> {
        Rc::new(Source {
            name: name.into(),
            text: text.into(),
        })
    }

    /// Nombre con el que se identifica el origen.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contenido completo.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Invoca a `callback` con el texto de una línea, si existe.
    pub fn with_line<F, R>(&self, line: u32, callback: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        let text = self
            .text
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .unwrap_or("");

        callback(text)
    }
}

/// Transforma un origen en un flujo que itera por carácter.
///
/// La ubicación que se encuentra en la tupla de retorno es una
/// ubicación vacía al final del archivo, útil para reportar errores
/// de fin de entrada.
pub fn consume(source: &Rc<Source>) -> (Location, impl InputStream) {
    let eof = source
        .text
        .chars()
        .fold(Position::default(), |position, c| position.advance(c));

    let end = Location {
        from: Rc::clone(source),
        position: eof..eof,
    };

    let from = Rc::clone(source);
    let text: Vec<char> = source.text.chars().collect();

    let mut here = Position::default();
    let chars = text.into_iter().map(move |c| {
        let next = here.advance(c);
        let location = Location {
            from: Rc::clone(&from),
            position: here..next,
        };

        here = next;
        (c, location)
    });

    (end, chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tracks_lines_columns_and_offsets() {
        let source = Source::new("test.yabal", "ab\n\tc");
        let (end, chars) = consume(&source);
        let chars: Vec<_> = chars.collect();

        let (c, location) = &chars[4];
        assert_eq!(*c, 'c');
        assert_eq!(location.start().line(), 2);
        assert_eq!(location.start().column(), 5);
        assert_eq!(location.offset(), 4);
        assert_eq!(location.len(), 1);
        assert_eq!(end.offset(), 5);
    }

    #[test]
    fn spans_cover_both_ends() {
        let source = Source::new("test.yabal", "var a = 1");
        let (_, chars) = consume(&source);
        let chars: Vec<_> = chars.collect();

        let span = Location::span(chars[0].1.clone(), &chars[4].1);
        assert_eq!(span.len(), 5);
        assert_eq!(span.to_string(), "test.yabal:[1:1-1:5]");
        assert_eq!(chars[2].1.to_string(), "test.yabal:1:3");
    }
}
