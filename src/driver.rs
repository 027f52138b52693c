//! Orquestación de una compilación.
//!
//! Un [`Compiler`] posee todas las tablas de una compilación: punteros
//! simbólicos, ámbitos, variables, funciones, structs y diagnósticos.
//! Las fases se ejecutan en orden fijo:
//!
//! 1. Análisis léxico y sintáctico del archivo principal.
//! 2. Declaración: imports, structs, funciones, etiquetas y namespaces.
//! 3. Inicialización: resolución de nombres y verificación de tipos.
//! 4. Optimización, si está habilitada.
//! 5. Generación de código y enlazado.
//!
//! Las últimas dos fases solo ocurren si no se registraron errores.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};

use crate::{
    arch::MAX_DATA,
    ast::{Block, Expr, FunctionName, Namespace, Program},
    error::Diagnostics,
    image::Image,
    import::SourceReader,
    lex::{Identifier, Lexer},
    link::{Builder, LinkerError, PointerId, PointerTable},
    parse,
    scope::{ScopeId, Scopes, Storage, VariableId, Variables},
    source::{self, Location, Source},
    types::{Structs, Type},
};

/// Palabras reservadas para valores de retorno.
pub const RETURN_WORDS: u16 = 10;

/// Palabras de las celdas del entorno, incluidos los valores de retorno.
const RUNTIME_WORDS: u16 = RETURN_WORDS + 4;

/// Salto inicial al programa principal.
const JUMP_WORDS: u16 = 2;

/// Inicio del área de `stackalloc`, que crece hacia arriba.
pub const STACK_ALLOC_START: u16 = 61294;

/// Marcos de llamada reservados bajo el área de `stackalloc`.
pub const STACK_FRAMES: u16 = 16;

/// Identificador de una función declarada.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(usize);

impl FunctionId {
    pub(crate) fn new(index: usize) -> Self {
        FunctionId(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Parámetro de una función ya resuelto.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: Identifier,
    pub location: Location,
    pub ty: Type,
    pub reference: bool,
    pub default: Option<Expr>,

    /// Variable del cuerpo, ausente en funciones `inline`.
    pub variable: Option<VariableId>,
}

impl Parameter {
    /// Tipo con que se almacena el parámetro.
    pub fn storage_type(&self) -> Type {
        match self.reference {
            true => Type::Reference(Box::new(self.ty.clone())),
            false => self.ty.clone(),
        }
    }
}

/// Una función declarada, sobrecarga de operador o función flecha.
pub struct Function {
    pub name: FunctionName,
    pub display: String,
    pub location: Location,
    pub namespace: Namespace,
    pub label: PointerId,
    pub ret: Type,
    pub parameters: Vec<Parameter>,
    pub inline: bool,

    /// Ámbito en que se declaró, desde donde se resuelven sus nombres.
    pub declaring: ScopeId,

    /// Ámbito del cuerpo, ausente en funciones `inline`.
    pub scope: Option<ScopeId>,

    /// Cuerpo inicializado, o plantilla sin inicializar si es `inline`.
    pub body: Option<Block>,

    /// Referencias desde llamadas o valores función.
    pub references: usize,

    /// Celda que preserva el puntero de `stackalloc` durante la llamada.
    pub stack_alloc: Option<PointerId>,

    /// Código emitido, una vez construido.
    pub code: Option<Builder>,
}

impl Function {
    /// Firma como tipo función.
    pub fn signature(&self) -> crate::types::Signature {
        crate::types::Signature {
            parameters: self.parameters.iter().map(Parameter::storage_type).collect(),
            ret: self.ret.clone(),
        }
    }

    /// Cantidad mínima de argumentos.
    pub fn required(&self) -> usize {
        self.parameters
            .iter()
            .take_while(|parameter| parameter.default.is_none())
            .count()
    }
}

/// Opciones de compilación.
#[derive(Clone, Debug)]
pub struct Options {
    /// Habilita el plegado de constantes y la eliminación de código muerto.
    pub optimize: bool,

    /// Dirección de carga de la imagen.
    pub offset: u16,

    /// Adjunta comentarios de generación a las instrucciones.
    pub comments: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            optimize: true,
            offset: 0,
            comments: false,
        }
    }
}

/// Punteros fijos del entorno de ejecución.
pub(crate) struct Runtime {
    pub program: PointerId,
    pub end: PointerId,
    pub call: PointerId,
    pub ret: PointerId,
    pub return_value: PointerId,
    pub stack_pointer: PointerId,
    pub stack_alloc: PointerId,
    pub cursor: PointerId,
    pub scratch: PointerId,
    pub frame_size: PointerId,
}

impl Runtime {
    /// Las celdas del entorno siguen al salto inicial y siempre se
    /// direccionan con la forma corta.
    fn new(table: &mut PointerTable) -> Self {
        Runtime {
            program: table.label("program"),
            end: table.label("end"),
            call: table.label("__call"),
            ret: table.label("__return"),
            return_value: table.storage("return_value", RETURN_WORDS, true),
            stack_pointer: table.storage("stack_pointer", 1, true),
            stack_alloc: table.storage("stack_alloc_pointer", 1, true),
            cursor: table.storage("frame_cursor", 1, true),
            scratch: table.storage("scratch", 1, true),
            frame_size: table.constant("frame_size"),
        }
    }
}

/// Estado de las importaciones de una compilación.
#[derive(Default)]
pub(crate) struct Imports {
    pub loaded: HashSet<String>,
    pub loading: Vec<String>,
}

/// Contexto de una compilación.
pub struct Compiler<'r> {
    pub(crate) options: Options,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) table: PointerTable,
    pub(crate) storage: Storage,
    pub(crate) scopes: Scopes,
    pub(crate) root: ScopeId,
    pub(crate) variables: Variables,
    pub(crate) functions: Vec<Function>,
    pub(crate) structs: Structs,
    pub(crate) runtime: Runtime,
    pub(crate) reader: &'r dyn SourceReader,
    pub(crate) imports: Imports,

    /// Builder en el que se emite actualmente.
    pub(crate) code: Builder,

    /// Estado de la pasada de inicialización.
    pub(crate) init: crate::semantic::State,

    /// Estado de la pasada de generación.
    pub(crate) build: crate::codegen::State,
}

impl<'r> Compiler<'r> {
    pub fn new(options: Options, reader: &'r dyn SourceReader) -> Self {
        let mut table = PointerTable::default();
        let runtime = Runtime::new(&mut table);
        let (scopes, root) = Scopes::new();

        let first = options.offset.wrapping_add(JUMP_WORDS + RUNTIME_WORDS);
        let storage = Storage::starting_at(first);

        Compiler {
            options,
            diagnostics: Diagnostics::default(),
            table,
            storage,
            scopes,
            root,
            variables: Variables::default(),
            functions: Vec::new(),
            structs: Structs::default(),
            runtime,
            reader,
            imports: Imports::default(),
            code: Builder::default(),
            init: Default::default(),
            build: Default::default(),
        }
    }

    /// Análisis léxico y sintáctico, con errores como diagnósticos.
    pub(crate) fn front_end(&mut self, name: &str, text: &str) -> Option<Program> {
        let source = Source::new(name, text);
        let (eof, chars) = source::consume(&source);

        let tokens = match Lexer::new(chars).try_exhaustive() {
            Ok(tokens) => tokens,
            Err(errors) => {
                self.diagnostics.extend(errors);
                return None;
            }
        };

        match parse::parse(&tokens, eof) {
            Ok(program) => Some(program),
            Err(error) => {
                self.diagnostics.report(&error);
                None
            }
        }
    }

    /// Ejecuta todas las fases sobre un programa ya analizado.
    pub(crate) fn run(&mut self, program: &mut Program) -> Result<Option<Image>, LinkerError> {
        let root = self.root;

        let runtime_end = u32::from(self.options.offset) + u32::from(JUMP_WORDS + RUNTIME_WORDS);
        if runtime_end > u32::from(MAX_DATA) + 1 {
            return Err(LinkerError::RuntimeOutOfReach(self.options.offset));
        }

        self.declare_program(root, program);
        if self.diagnostics.has_errors() {
            debug!("Declaration failed, skipping remaining passes");
            return Ok(None);
        }

        self.initialize_program(root, program);
        if self.diagnostics.has_errors() {
            debug!("Initialization failed, skipping remaining passes");
            return Ok(None);
        }

        if self.options.optimize {
            self.optimize_program(program);
        }

        let code = self.build_program(program)?;
        if self.diagnostics.has_errors() {
            return Ok(None);
        }

        let image = code.link(&mut self.table, self.options.offset)?;
        info!("Linked {} words", image.words().len());

        Ok(Some(image))
    }

    /// Nombre de una función para diagnósticos.
    pub(crate) fn function_name(&self, id: FunctionId) -> &str {
        &self.functions[id.index()].display
    }

    fn finish(self, image: Option<Image>) -> Compilation {
        let table = &self.table;
        let cell = |id: PointerId| table.address(id);

        let mut globals = BTreeMap::new();
        for (_, variable) in self.variables.iter() {
            if variable.scope == self.root && !variable.removed {
                if let Some(address) = cell(variable.cell) {
                    globals.entry(variable.name.to_string()).or_insert(address);
                }
            }
        }

        let runtime = match image {
            Some(_) => Some(RuntimeAddresses {
                return_value: cell(self.runtime.return_value),
                stack_pointer: cell(self.runtime.stack_pointer),
                stack_alloc: cell(self.runtime.stack_alloc),
            }),

            None => None,
        };

        Compilation {
            diagnostics: self.diagnostics,
            image,
            globals,
            runtime,
        }
    }
}

/// Direcciones de las celdas del entorno de ejecución.
#[derive(Copy, Clone, Debug, Default)]
pub struct RuntimeAddresses {
    pub return_value: Option<u16>,
    pub stack_pointer: Option<u16>,
    pub stack_alloc: Option<u16>,
}

/// Resultado de una compilación.
pub struct Compilation {
    diagnostics: Diagnostics,
    image: Option<Image>,
    globals: BTreeMap<String, u16>,
    runtime: Option<RuntimeAddresses>,
}

impl Compilation {
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Imagen enlazada, ausente si hubo errores.
    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Dirección de una variable del nivel superior del archivo principal.
    pub fn address(&self, variable: &str) -> Option<u16> {
        self.globals.get(variable).copied()
    }

    /// Variables del nivel superior con sus direcciones.
    pub fn globals(&self) -> impl Iterator<Item = (&str, u16)> {
        self.globals
            .iter()
            .map(|(name, address)| (name.as_str(), *address))
    }

    /// Dirección del área de valores de retorno.
    pub fn return_value(&self) -> Option<u16> {
        self.runtime.and_then(|runtime| runtime.return_value)
    }

    /// Dirección de la celda del puntero de pila.
    pub fn stack_pointer(&self) -> Option<u16> {
        self.runtime.and_then(|runtime| runtime.stack_pointer)
    }

    /// Dirección de la celda del puntero de `stackalloc`.
    pub fn stack_alloc_pointer(&self) -> Option<u16> {
        self.runtime.and_then(|runtime| runtime.stack_alloc)
    }
}

/// Compila un programa completo.
///
/// Los errores del programa de usuario se reportan como diagnósticos de
/// la [`Compilation`]. Un [`LinkerError`] indica un defecto interno.
pub fn compile(
    source: &str,
    name: &str,
    options: &Options,
    reader: &dyn SourceReader,
) -> Result<Compilation, LinkerError> {
    let mut compiler = Compiler::new(options.clone(), reader);
    compiler.imports.loading.push(name.to_owned());
    compiler.imports.loaded.insert(name.to_owned());

    let image = match compiler.front_end(name, source) {
        Some(mut program) => compiler.run(&mut program)?,
        None => None,
    };

    Ok(compiler.finish(image))
}
