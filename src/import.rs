//! Lectura de archivos importados.
//!
//! El compilador no accede directamente al sistema de archivos: toda
//! lectura pasa por un [`SourceReader`]. Cada lectura produce un nombre
//! canónico, que identifica al archivo en la caché de imports y en los
//! diagnósticos, junto con su texto.

use std::{
    collections::HashMap,
    fs,
    io::{self, ErrorKind},
    path::Path,
};

/// Origen de código fuente para `import`.
pub trait SourceReader {
    /// Lee `path` según se importa desde el archivo de nombre canónico `from`.
    fn read(&self, from: &str, path: &str) -> io::Result<(String, String)>;
}

/// Lee archivos relativos al directorio del archivo que importa.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileReader;

impl SourceReader for FileReader {
    fn read(&self, from: &str, path: &str) -> io::Result<(String, String)> {
        let base = Path::new(from).parent().unwrap_or_else(|| Path::new(""));
        let resolved = fs::canonicalize(base.join(path))?;
        let text = fs::read_to_string(&resolved)?;

        Ok((resolved.to_string_lossy().into_owned(), text))
    }
}

/// Archivos en memoria, indexados por nombre.
#[derive(Clone, Debug, Default)]
pub struct MemoryReader {
    files: HashMap<String, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        MemoryReader::default()
    }

    /// Agrega un archivo.
    pub fn with<N: Into<String>, T: Into<String>>(mut self, name: N, text: T) -> Self {
        self.files.insert(name.into(), text.into());
        self
    }
}

impl SourceReader for MemoryReader {
    fn read(&self, _from: &str, path: &str) -> io::Result<(String, String)> {
        match self.files.get(path) {
            Some(text) => Ok((path.to_owned(), text.clone())),
            None => Err(io::Error::new(ErrorKind::NotFound, "file not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn memory_reader_serves_registered_files() {
        let reader = MemoryReader::new().with("lib.yabal", "var x = 1");

        let (name, text) = reader.read("main.yabal", "lib.yabal").unwrap();
        assert_eq!(name, "lib.yabal");
        assert_eq!(text, "var x = 1");

        let missing = reader.read("main.yabal", "other.yabal").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }
}
