//! Diagnósticos de compilación.
//!
//! Los errores no se lanzan, se acumulan. Cada diagnóstico se asocia
//! a un rango de código fuente y puede haber varios por rango. Una
//! compilación se considera exitosa si ningún diagnóstico tiene
//! severidad [`Severity::Error`].

use crate::source::{Located, Location};
use std::{
    collections::BTreeMap,
    error::Error,
    fmt::{self, Display},
};

mod sealed {
    pub trait Sealed {}
}

/// Un error con ubicación de origen.
pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}

/// Severidad de un diagnóstico.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// La salida no debe utilizarse.
    Error,

    /// Posible defecto, la salida sigue siendo válida.
    Warning,

    /// Información, como funciones excluidas por no utilizarse.
    Debug,
}

impl Display for Severity {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Debug => "debug",
        })
    }
}

/// Un mensaje de diagnóstico.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Colección de diagnósticos indexada por rango de origen.
#[derive(Default)]
pub struct Diagnostics {
    entries: BTreeMap<Location, Vec<Diagnostic>>,
}

impl Diagnostics {
    /// Registra un diagnóstico.
    pub fn push<M: Display>(&mut self, location: Location, severity: Severity, message: M) {
        log::debug!("{} at {}: {}", severity, location, message);

        self.entries.entry(location).or_default().push(Diagnostic {
            severity,
            message: message.to_string(),
        });
    }

    /// Registra un error.
    pub fn error<M: Display>(&mut self, location: Location, message: M) {
        self.push(location, Severity::Error, message)
    }

    /// Registra una advertencia.
    pub fn warning<M: Display>(&mut self, location: Location, message: M) {
        self.push(location, Severity::Warning, message)
    }

    /// Registra un diagnóstico informativo.
    pub fn debug<M: Display>(&mut self, location: Location, message: M) {
        self.push(location, Severity::Debug, message)
    }

    /// Registra un error con ubicación como diagnóstico de error.
    pub fn report<E: LocatedError + ?Sized>(&mut self, error: &E) {
        self.error(error.location().clone(), error.source())
    }

    /// Registra una secuencia de errores con ubicación.
    pub fn extend<E: LocatedError, I: IntoIterator<Item = E>>(&mut self, errors: I) {
        for error in errors {
            self.report(&error);
        }
    }

    /// Determina si existe al menos un error.
    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    /// Cuenta los diagnósticos de una severidad.
    pub fn count(&self, severity: Severity) -> usize {
        self.iter()
            .filter(|(_, diagnostic)| diagnostic.severity == severity)
            .count()
    }

    /// Diagnósticos registrados para un rango exacto.
    pub fn at(&self, location: &Location) -> &[Diagnostic] {
        self.entries.get(location).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Itera en orden de ubicación.
    pub fn iter(&self) -> impl Iterator<Item = (&Location, &Diagnostic)> {
        self.entries
            .iter()
            .flat_map(|(location, list)| list.iter().map(move |diagnostic| (location, diagnostic)))
    }

    /// Itera sobre los mensajes de una severidad.
    pub fn messages(&self, severity: Severity) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(move |(_, diagnostic)| diagnostic.severity == severity)
            .map(|(_, diagnostic)| diagnostic.message.as_str())
    }

    /// Vista que omite diagnósticos menos severos que `threshold`.
    pub fn display(&self, threshold: Severity) -> Report<'_> {
        Report {
            diagnostics: self,
            threshold,
        }
    }
}

/// Presentación de diagnósticos con fragmentos de código.
pub struct Report<'a> {
    diagnostics: &'a Diagnostics,
    threshold: Severity,
}

impl Display for Report<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self
            .diagnostics
            .iter()
            .filter(|(_, diagnostic)| diagnostic.severity <= self.threshold);

        for (location, diagnostic) in shown {
            writeln!(fmt, "{}: {}", diagnostic.severity, diagnostic.message)?;
            writeln!(fmt, " --> {}", location)?;

            let digits = location.end().line().to_string().chars().count();
            writeln!(fmt, "{:digits$} |", "", digits = digits)?;

            for line_number in location.start().line()..=location.end().line() {
                location.source().with_line(line_number, |line| {
                    writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)
                })?
            }

            let from = location.start().column();
            let to = location.end().column().saturating_sub(1).max(from);
            let min = from.min(to);
            let max = from.max(to);

            let skip = (min - 1) as usize;
            let highlight = (max - min + 1) as usize;

            writeln!(
                fmt,
                "{:digits$} | {:skip$}{:^<highlight$}",
                "",
                "",
                "",
                digits = digits,
                skip = skip,
                highlight = highlight
            )?;

            writeln!(fmt)?;
        }

        let errors = self.diagnostics.count(Severity::Error);
        match errors {
            0 => Ok(()),
            1 => writeln!(fmt, "Build failed with 1 error"),
            _ => writeln!(fmt, "Build failed with {} errors", errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{consume, Source};
    use pretty_assertions::assert_eq;

    fn location(text: &str, at: usize) -> Location {
        let source = Source::new("test.yabal", text);
        let (_, chars) = consume(&source);
        chars.map(|(_, location)| location).nth(at).unwrap()
    }

    #[test]
    fn multiple_entries_per_range() {
        let mut diagnostics = Diagnostics::default();
        let here = location("var x = y", 8);

        diagnostics.error(here.clone(), "Undefined variable 'y'");
        diagnostics.warning(here.clone(), "Something else");

        assert_eq!(diagnostics.at(&here).len(), 2);
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.count(Severity::Warning), 1);
    }

    #[test]
    fn renders_snippet() {
        let mut diagnostics = Diagnostics::default();
        diagnostics.error(location("var x = y", 8), "Undefined variable 'y'");

        let rendered = diagnostics.display(Severity::Debug).to_string();
        assert_eq!(
            rendered,
            "error: Undefined variable 'y'\n --> test.yabal:1:9\n  |\n1 | var x = y\n  |         ^\n\nBuild failed with 1 error\n"
        );
    }
}
