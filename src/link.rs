//! Construcción y enlazado de imágenes de programa.
//!
//! El generador de código emite instrucciones en un [`Builder`], el
//! cual acumula una secuencia ordenada de marcas, instrucciones y
//! palabras crudas. Los operandos pueden referirse a punteros
//! simbólicos cuya dirección todavía se desconoce. Al finalizar, una
//! única pasada asigna direcciones a todas las marcas y una segunda
//! reescribe cada operando pendiente, produciendo una [`Image`].

use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use bitflags::bitflags;
use log::trace;
use thiserror::Error;

use crate::{
    arch::{self, Form, Opcode, MAX_DATA},
    image::{Image, Line},
};

bitflags! {
    /// Opciones de presentación de listados.
    pub struct ListingOptions: u32 {
        /// Incluir comentarios de diagnóstico junto a cada instrucción.
        const COMMENTS = 0x01;

        /// Incluir los nombres de variables respaldadas por cada celda.
        const VARIABLES = 0x02;
    }
}

/// Un error de enlazado.
///
/// Salvo un desplazamiento de carga que deja las celdas del entorno
/// fuera del campo inmediato, estos errores indican defectos del
/// generador de código, nunca errores del programa de usuario.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LinkerError {
    #[error("Pointer `{0}` is never marked or defined")]
    Unresolved(String),

    #[error("Pointer `{0}` is resolved more than once")]
    Duplicate(String),

    #[error("Operand {value} of `{opcode}` does not fit in the immediate field")]
    Overflow { opcode: Opcode, value: u16 },

    #[error("Program of {0} words does not fit in memory")]
    TooLarge(usize),

    #[error("Load offset {0} leaves the runtime cells outside the immediate range")]
    RuntimeOutOfReach(u16),
}

/// Identificador de un puntero simbólico.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerId(u32);

/// Clase de puntero simbólico.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerKind {
    /// Celda de almacenamiento de `size` palabras en la cabecera.
    Storage { size: u16 },

    /// Destino de saltos.
    Label,

    /// Valor que se conoce hasta que se construye la cabecera.
    Constant,
}

struct Entry {
    name: String,
    kind: PointerKind,
    small: bool,
    address: Option<u16>,
    variables: Vec<String>,
}

/// Tabla de punteros simbólicos de una compilación.
#[derive(Default)]
pub struct PointerTable {
    entries: Vec<Entry>,
}

impl PointerTable {
    /// Crea una celda de almacenamiento.
    ///
    /// `small` indica que la celda completa queda al alcance del campo
    /// inmediato, por lo que admite `AIN`, `BIN`, `CIN` y `STA`.
    pub fn storage<S: Into<String>>(&mut self, name: S, size: u16, small: bool) -> PointerId {
        let id = self.insert(name.into(), PointerKind::Storage { size });
        self.entry_mut(id).small = small;

        id
    }

    /// Crea una etiqueta.
    pub fn label<S: Into<String>>(&mut self, name: S) -> PointerId {
        self.insert(name.into(), PointerKind::Label)
    }

    /// Crea una constante de enlazado, a definir con [`PointerTable::define()`].
    pub fn constant<S: Into<String>>(&mut self, name: S) -> PointerId {
        self.insert(name.into(), PointerKind::Constant)
    }

    /// Fija el valor de una constante de enlazado.
    pub fn define(&mut self, id: PointerId, value: u16) -> Result<(), LinkerError> {
        self.resolve(id, value)
    }

    /// Nombre de un puntero.
    pub fn name(&self, id: PointerId) -> &str {
        &self.entry(id).name
    }

    /// Clase de un puntero.
    pub fn kind(&self, id: PointerId) -> PointerKind {
        self.entry(id).kind
    }

    /// Determina si el puntero es una celda de almacenamiento.
    pub fn is_storage(&self, id: PointerId) -> bool {
        matches!(self.kind(id), PointerKind::Storage { .. })
    }

    /// Determina si la celda se direcciona con la forma corta.
    pub fn is_small(&self, id: PointerId) -> bool {
        self.entry(id).small
    }

    /// Dirección resuelta, si ya se finalizó.
    pub fn address(&self, id: PointerId) -> Option<u16> {
        self.entry(id).address
    }

    /// Asocia el nombre de una variable a una celda, para diagnóstico.
    pub fn attach(&mut self, id: PointerId, variable: &str) {
        self.entry_mut(id).variables.push(variable.to_owned());
    }

    /// Variables respaldadas por una celda.
    pub fn variables(&self, id: PointerId) -> &[String] {
        &self.entry(id).variables
    }

    fn insert(&mut self, name: String, kind: PointerKind) -> PointerId {
        let id = PointerId(self.entries.len() as u32);
        self.entries.push(Entry {
            name,
            kind,
            small: false,
            address: None,
            variables: Vec::new(),
        });

        id
    }

    fn resolve(&mut self, id: PointerId, address: u16) -> Result<(), LinkerError> {
        let entry = self.entry_mut(id);
        match entry.address {
            Some(_) => Err(LinkerError::Duplicate(entry.name.clone())),
            None => {
                entry.address = Some(address);
                Ok(())
            }
        }
    }

    fn value(&self, id: PointerId) -> Result<u16, LinkerError> {
        let entry = self.entry(id);
        entry
            .address
            .ok_or_else(|| LinkerError::Unresolved(entry.name.clone()))
    }

    fn entry(&self, PointerId(id): PointerId) -> &Entry {
        &self.entries[id as usize]
    }

    fn entry_mut(&mut self, PointerId(id): PointerId) -> &mut Entry {
        &mut self.entries[id as usize]
    }
}

/// Un puntero a memoria conocido en tiempo de compilación.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pointer {
    /// Desplazamiento a partir de un puntero simbólico.
    Symbol { id: PointerId, offset: u16 },

    /// Dirección absoluta.
    Absolute(u16),
}

impl Pointer {
    /// Desplaza el puntero.
    pub fn add(self, words: u16) -> Pointer {
        match self {
            Pointer::Symbol { id, offset } => Pointer::Symbol {
                id,
                offset: offset.wrapping_add(words),
            },

            Pointer::Absolute(address) => Pointer::Absolute(address.wrapping_add(words)),
        }
    }
}

impl From<PointerId> for Pointer {
    fn from(id: PointerId) -> Self {
        Pointer::Symbol { id, offset: 0 }
    }
}

/// Operando de una instrucción o palabra cruda.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    Value(u16),
    Symbol { id: PointerId, offset: i32 },
}

impl Operand {
    /// Desplaza un operando simbólico o literal.
    pub fn offset(self, delta: i32) -> Operand {
        match self {
            Operand::None => Operand::None,
            Operand::Value(value) => Operand::Value((value as i32).wrapping_add(delta) as u16),
            Operand::Symbol { id, offset } => Operand::Symbol {
                id,
                offset: offset + delta,
            },
        }
    }

    fn resolve(self, table: &PointerTable) -> Result<u16, LinkerError> {
        match self {
            Operand::None => Ok(0),
            Operand::Value(value) => Ok(value),
            Operand::Symbol { id, offset } => {
                let base = table.value(id)? as i32;
                Ok(base.wrapping_add(offset) as u16)
            }
        }
    }

    fn render(self, table: &PointerTable, resolved: u16) -> String {
        match self {
            Operand::None => String::new(),
            Operand::Value(value) => value.to_string(),
            Operand::Symbol { id, offset: 0 } => format!("[{}] ({})", table.name(id), resolved),
            Operand::Symbol { id, offset } => {
                format!("[{}{:+}] ({})", table.name(id), offset, resolved)
            }
        }
    }
}

impl From<u16> for Operand {
    fn from(value: u16) -> Self {
        Operand::Value(value)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Value(value as u16)
    }
}

impl From<PointerId> for Operand {
    fn from(id: PointerId) -> Self {
        Operand::Symbol { id, offset: 0 }
    }
}

impl From<Pointer> for Operand {
    fn from(pointer: Pointer) -> Self {
        match pointer {
            Pointer::Symbol { id, offset } => Operand::Symbol {
                id,
                offset: offset as i32,
            },

            Pointer::Absolute(address) => Operand::Value(address),
        }
    }
}

/// Elemento emitido.
#[derive(Clone, Debug)]
pub enum Item {
    /// Fija la dirección de un puntero a la de la siguiente palabra.
    Mark(PointerId),

    /// Una instrucción, con palabra de operando adicional si es larga.
    Instruction {
        opcode: Opcode,
        data: Operand,
        trailing: Option<Operand>,
        comment: Option<String>,
    },

    /// Una palabra literal.
    Raw {
        operand: Operand,
        comment: Option<String>,
    },
}

impl Item {
    fn words(&self) -> usize {
        match self {
            Item::Mark(_) => 0,
            Item::Instruction { trailing, .. } => 1 + trailing.is_some() as usize,
            Item::Raw { .. } => 1,
        }
    }
}

/// Secuencia de elementos en construcción.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    items: Vec<Item>,
}

impl Builder {
    /// Marca la posición actual para un puntero.
    pub fn mark(&mut self, id: PointerId) {
        self.items.push(Item::Mark(id));
    }

    /// Emite una instrucción.
    ///
    /// Las instrucciones de forma larga reciben el operando en la
    /// palabra siguiente, con campo inmediato en cero.
    pub fn emit(&mut self, opcode: Opcode, operand: Operand) {
        let (data, trailing) = match opcode.form() {
            Form::Implied => (Operand::None, None),
            Form::Immediate => (operand, None),
            Form::Trailing | Form::BankedTrailing => (Operand::None, Some(operand)),
        };

        self.items.push(Item::Instruction {
            opcode,
            data,
            trailing,
            comment: None,
        });
    }

    /// Emite una instrucción larga con campo inmediato explícito.
    pub fn emit_long(&mut self, opcode: Opcode, data: Operand, operand: Operand) {
        self.items.push(Item::Instruction {
            opcode,
            data,
            trailing: Some(operand),
            comment: None,
        });
    }

    /// Emite una palabra cruda.
    pub fn emit_raw(&mut self, operand: Operand) {
        self.items.push(Item::Raw {
            operand,
            comment: None,
        });
    }

    /// Asocia un comentario al último elemento emitido.
    pub fn comment<S: Into<String>>(&mut self, text: S) {
        let slot = self.items.iter_mut().rev().find_map(|item| match item {
            Item::Mark(_) => None,
            Item::Instruction { comment, .. } | Item::Raw { comment, .. } => Some(comment),
        });

        if let Some(comment) = slot {
            *comment = Some(text.into());
        }
    }

    /// Concatena otro builder al final de este.
    pub fn append(&mut self, other: Builder) {
        self.items.extend(other.items);
    }

    /// Cantidad de palabras emitidas.
    pub fn len(&self) -> usize {
        self.items.iter().map(Item::words).sum()
    }

    /// Determina si no se ha emitido ninguna palabra.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elementos emitidos.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Resuelve todos los punteros y produce la imagen final.
    ///
    /// `offset` es la dirección en que se cargará la primera palabra.
    pub fn link(self, table: &mut PointerTable, offset: u16) -> Result<Image, LinkerError> {
        let total = self.len();
        if offset as usize + total > 0x10000 {
            return Err(LinkerError::TooLarge(total));
        }

        let mut address = offset;
        for item in &self.items {
            match item {
                Item::Mark(id) => {
                    trace!("{} => {}", table.name(*id), address);
                    table.resolve(*id, address)?;
                }

                _ => address = address.wrapping_add(item.words() as u16),
            }
        }

        let mut words = Vec::with_capacity(total);
        let mut lines = Vec::new();
        let mut labels = Vec::new();

        for item in self.items {
            let address = offset.wrapping_add(words.len() as u16);

            let (text, comment) = match item {
                Item::Mark(id) => {
                    labels.push(table.name(id).to_owned());
                    continue;
                }

                Item::Instruction {
                    opcode,
                    data,
                    trailing,
                    comment,
                } => {
                    let value = data.resolve(table)?;
                    if value > MAX_DATA {
                        return Err(LinkerError::Overflow { opcode, value });
                    }

                    words.push(arch::encode(opcode, value));

                    let mut text = opcode.mnemonic().to_owned();
                    if data != Operand::None {
                        text.push(' ');
                        text.push_str(&data.render(table, value));
                    }

                    if let Some(trailing) = trailing {
                        let value = trailing.resolve(table)?;
                        words.push(value);

                        text.push(' ');
                        text.push_str(&trailing.render(table, value));
                    }

                    (text, comment)
                }

                Item::Raw { operand, comment } => {
                    let value = operand.resolve(table)?;
                    words.push(value);

                    (operand.render(table, value), comment)
                }
            };

            lines.push(Line {
                address,
                labels: std::mem::take(&mut labels),
                text,
                comment,
            });
        }

        if !labels.is_empty() {
            lines.push(Line {
                address: offset.wrapping_add(words.len() as u16),
                labels,
                text: String::new(),
                comment: None,
            });
        }

        let variables = collect_variables(table);
        Ok(Image::new(offset, words, lines, variables))
    }
}

fn collect_variables(table: &PointerTable) -> HashMap<u16, Vec<String>> {
    let mut variables: HashMap<u16, Vec<String>> = HashMap::new();
    for entry in &table.entries {
        if let (Some(address), false) = (entry.address, entry.variables.is_empty()) {
            variables
                .entry(address)
                .or_default()
                .extend(entry.variables.iter().cloned());
        }
    }

    variables
}

impl Display for PointerId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn forward_references_resolve() {
        let mut table = PointerTable::default();
        let end = table.label("end");
        let cell = table.storage("cell", 1, true);

        let mut code = Builder::default();
        code.emit(Opcode::Jmp, end.into());
        code.mark(cell);
        code.emit_raw(Operand::Value(0));
        code.emit(Opcode::Ain, cell.into());
        code.mark(end);

        let image = code.link(&mut table, 0).unwrap();
        assert_eq!(
            image.words(),
            &[arch::encode(Opcode::Jmp, 0), 4, 0, arch::encode(Opcode::Ain, 2)]
        );

        assert_eq!(table.address(end), Some(4));
        assert_eq!(table.address(cell), Some(2));
    }

    #[test]
    fn child_builders_are_concatenated() {
        let mut table = PointerTable::default();
        let function = table.label("function");

        let mut body = Builder::default();
        body.mark(function);
        body.emit(Opcode::Jreg, Operand::None);

        let mut code = Builder::default();
        code.emit(Opcode::Ldw, Operand::from(function).offset(1));
        code.append(body);

        let image = code.link(&mut table, 0).unwrap();
        assert_eq!(image.words()[1], 3);
        assert_eq!(image.words().len(), 3);
    }

    #[test]
    fn unmarked_pointer_is_fatal() {
        let mut table = PointerTable::default();
        let nowhere = table.label("nowhere");

        let mut code = Builder::default();
        code.emit(Opcode::Jmp, nowhere.into());

        assert!(matches!(
            code.link(&mut table, 0),
            Err(LinkerError::Unresolved(name)) if name == "nowhere"
        ));
    }

    #[test]
    fn double_mark_is_fatal() {
        let mut table = PointerTable::default();
        let label = table.label("twice");

        let mut code = Builder::default();
        code.mark(label);
        code.emit(Opcode::Add, Operand::None);
        code.mark(label);

        assert!(matches!(
            code.link(&mut table, 0),
            Err(LinkerError::Duplicate(_))
        ));
    }

    #[test]
    fn immediate_overflow_is_fatal() {
        let mut table = PointerTable::default();
        let mut code = Builder::default();
        code.emit(Opcode::Ldia, Operand::Value(1024));

        assert!(matches!(
            code.link(&mut table, 0),
            Err(LinkerError::Overflow { value: 1024, .. })
        ));
    }

    #[test]
    fn constants_are_defined_once() {
        let mut table = PointerTable::default();
        let size = table.constant("frame_size");
        table.define(size, 7).unwrap();

        let mut code = Builder::default();
        code.emit(Opcode::Ldwb, Operand::from(size).offset(-3));

        let image = code.link(&mut table, 0).unwrap();
        assert_eq!(image.words(), &[arch::encode(Opcode::Ldwb, 0), 4]);
        assert!(table.define(size, 1).is_err());
    }
}
