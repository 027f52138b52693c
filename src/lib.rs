//! Compilador de Yabal para la computadora Astro-8.
//!
//! # Front end
//! Cada programa deriva de un archivo principal y de los archivos que
//! este importa. El código fuente se somete primero a análisis léxico
//! en [`lex`], de lo cual se obtiene un flujo de tokens. El flujo de
//! tokens se dispone en un AST por medio de análisis sintáctico en
//! [`parse`]. El árbol se completa por análisis semántico en dos
//! pasadas, declaración e inicialización, y opcionalmente se simplifica
//! en [`optimize`].
//!
//! # Back end
//! La generación de código emite directamente instrucciones de la
//! Astro-8, descritas en [`arch`], sobre un builder con punteros
//! simbólicos. El enlazado en [`link`] resuelve esos punteros y produce
//! una [`image::Image`] que puede escribirse como listado, hexadecimal,
//! formato de Logisim o binario.

#[macro_use]
mod macros;

pub mod arch;
pub mod ast;
pub mod error;
pub mod image;
pub mod import;
pub mod lex;
pub mod link;
pub mod parse;
pub mod scope;
pub mod source;
pub mod types;

mod codegen;
mod driver;
mod optimize;
mod semantic;

pub use codegen::CodegenError;
pub use driver::{compile, Compilation, Options, RETURN_WORDS, STACK_ALLOC_START, STACK_FRAMES};
pub use semantic::SemanticError;
