//! Imágenes de programa y sus formatos de salida.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    io::{self, Write},
};

use crate::link::ListingOptions;

/// Encabezado de archivos hexadecimales del emulador.
pub const HEX_HEADER: &str = "ASTRO-8 AEXE Executable file";

/// Encabezado de archivos de memoria de Logisim.
pub const LOGISIM_HEADER: &str = "v3.0 hex words addressed";

/// Palabras por línea en formato Logisim.
const LOGISIM_WIDTH: usize = 8;

/// Una línea del listado ensamblador.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub address: u16,
    pub labels: Vec<String>,
    pub text: String,
    pub comment: Option<String>,
}

/// Un programa enlazado, listo para cargarse en memoria.
#[derive(Clone, Debug)]
pub struct Image {
    offset: u16,
    words: Vec<u16>,
    lines: Vec<Line>,
    variables: HashMap<u16, Vec<String>>,
}

impl Image {
    pub(crate) fn new(
        offset: u16,
        words: Vec<u16>,
        lines: Vec<Line>,
        variables: HashMap<u16, Vec<String>>,
    ) -> Self {
        Image {
            offset,
            words,
            lines,
            variables,
        }
    }

    /// Dirección de carga.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Palabras del programa.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Líneas del listado.
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Listado en ensamblador.
    pub fn to_assembly(&self, options: ListingOptions) -> String {
        Assembly {
            image: self,
            options,
        }
        .to_string()
    }

    /// Formato hexadecimal del emulador, una palabra por línea.
    pub fn to_hex(&self) -> String {
        Hex(self).to_string()
    }

    /// Formato de memoria de Logisim.
    pub fn to_logisim(&self) -> String {
        Logisim(self).to_string()
    }

    /// Escribe las palabras en big-endian.
    pub fn write_binary<W: Write>(&self, output: &mut W) -> io::Result<()> {
        for word in &self.words {
            output.write_all(&word.to_be_bytes())?;
        }

        Ok(())
    }
}

struct Assembly<'a> {
    image: &'a Image,
    options: ListingOptions,
}

impl Display for Assembly<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.image.lines {
            for label in &line.labels {
                writeln!(fmt, "{}:", label)?;
            }

            if line.text.is_empty() {
                continue;
            }

            write!(fmt, "{:>5} | {}", line.address, line.text)?;

            if self.options.contains(ListingOptions::VARIABLES) {
                if let Some(names) = self.image.variables.get(&line.address) {
                    write!(fmt, " ; {}", names.join(", "))?;
                }
            }

            match (&line.comment, self.options.contains(ListingOptions::COMMENTS)) {
                (Some(comment), true) => writeln!(fmt, " // {}", comment)?,
                _ => writeln!(fmt)?,
            }
        }

        Ok(())
    }
}

struct Hex<'a>(&'a Image);

impl Display for Hex<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "{}", HEX_HEADER)?;
        for word in &self.0.words {
            writeln!(fmt, "{:x}", word)?;
        }

        Ok(())
    }
}

struct Logisim<'a>(&'a Image);

impl Display for Logisim<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(fmt, "{}", LOGISIM_HEADER)?;

        let Logisim(image) = self;
        for (row, chunk) in image.words.chunks(LOGISIM_WIDTH).enumerate() {
            let address = image.offset as usize + row * LOGISIM_WIDTH;
            write!(fmt, "{:04x}:", address)?;

            for word in chunk {
                write!(fmt, " {:04x}", word)?;
            }

            writeln!(fmt)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn image() -> Image {
        let lines = vec![
            Line {
                address: 0,
                labels: vec!["start".into()],
                text: "LDIA 5".into(),
                comment: Some("five".into()),
            },
            Line {
                address: 1,
                labels: vec![],
                text: "STA 3".into(),
                comment: None,
            },
        ];

        let mut variables = HashMap::new();
        variables.insert(1, vec!["a".to_owned()]);

        Image::new(0, vec![0x2005, 0x3003], lines, variables)
    }

    #[test]
    fn assembly_listing() {
        assert_eq!(
            image().to_assembly(ListingOptions::COMMENTS | ListingOptions::VARIABLES),
            "start:\n    0 | LDIA 5 // five\n    1 | STA 3 ; a\n"
        );

        assert_eq!(
            image().to_assembly(ListingOptions::empty()),
            "start:\n    0 | LDIA 5\n    1 | STA 3\n"
        );
    }

    #[test]
    fn hex_and_logisim() {
        assert_eq!(image().to_hex(), "ASTRO-8 AEXE Executable file\n2005\n3003\n");
        assert_eq!(
            image().to_logisim(),
            "v3.0 hex words addressed\n0000: 2005 3003\n"
        );
    }

    #[test]
    fn binary_is_big_endian() {
        let mut bytes = Vec::new();
        image().write_binary(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0x20, 0x05, 0x30, 0x03]);
    }
}
