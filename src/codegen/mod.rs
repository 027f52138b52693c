//! Generación de código para la Astro-8.
//!
//! La generación recorre el árbol ya inicializado y emite en el
//! [`Builder`] actual del compilador. El programa principal se emite
//! primero; las funciones se construyen después, a medida que alguna
//! llamada o valor función las solicita. Las funciones nunca
//! solicitadas se excluyen de la salida.
//!
//! La imagen final se dispone así:
//!
//! 1. Salto al programa principal.
//! 2. Celdas del entorno, seguidas de las celdas de almacenamiento.
//! 3. Trampolines de llamada y retorno, si existe alguna función.
//! 4. Funciones, en orden de declaración.
//! 5. Programa principal y cadenas literales.
//!
//! Los valores escalares se evalúan hacia el registro A. Los valores
//! de varias palabras se escriben directamente en un lugar destino.

use std::{collections::HashSet, mem};

use log::debug;
use thiserror::Error;

use crate::{
    arch::Opcode,
    ast::{Program, Statement, StatementKind},
    driver::{Compiler, FunctionId, STACK_ALLOC_START, STACK_FRAMES},
    link::{Builder, LinkerError, Operand, PointerId},
    scope::{Pool, ScopeId},
    types::Type,
};

mod call;
mod expr;
mod memory;
mod regs;

pub(crate) use memory::Place;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("References must point to bank 0, found bank {0}")]
    ReferenceBank(u16),

    #[error("Access to address {address} crosses the end of bank {bank}")]
    BankOverflow { address: u32, bank: u16 },

    #[error("Variable '{variable}' is out of reach for '{opcode}', use LDLGE or STLGE")]
    OutOfReach { variable: String, opcode: Opcode },
}

/// Destino de los `return` de una expansión en línea.
struct InlineReturn {
    end: PointerId,
    result: Option<PointerId>,
}

/// Destinos de `break` y `continue`.
struct Loop {
    exit: PointerId,
    next: PointerId,
}

/// Estado de la pasada de generación.
#[derive(Default)]
pub(crate) struct State {
    worklist: Vec<FunctionId>,
    requested: HashSet<FunctionId>,
    strings: Vec<(PointerId, String)>,
    loops: Vec<Loop>,
    returns: Vec<InlineReturn>,

    /// Temporales vivos hasta el final de la sentencia que los pidió.
    held: Vec<(ScopeId, PointerId, u16)>,

    labels: usize,
}

impl Compiler<'_> {
    /// Emite el programa completo, listo para enlazar.
    pub(crate) fn build_program(&mut self, program: &Program) -> Result<Builder, LinkerError> {
        let root = self.root;

        self.code = Builder::default();
        self.build_statements(root, &program.statements);
        let main = mem::take(&mut self.code);

        while let Some(function) = self.build.worklist.pop() {
            self.build_function(function);
        }

        for function in &self.functions {
            if !function.inline && function.code.is_none() {
                let message = format!(
                    "Function '{}' is never called and will be excluded from the output.",
                    function.display
                );

                self.diagnostics.debug(function.location.clone(), message);
            }
        }

        self.code = Builder::default();
        self.header()?;

        if !self.build.requested.is_empty() {
            self.trampolines();
        }

        for index in 0..self.functions.len() {
            if let Some(code) = self.functions[index].code.take() {
                self.code.append(code);
            }
        }

        self.code.mark(self.runtime.program);
        self.code.append(main);
        self.strings();
        self.code.mark(self.runtime.end);

        Ok(mem::take(&mut self.code))
    }

    /// Salto inicial, celdas del entorno y celdas de almacenamiento.
    ///
    /// El orden coincide con las direcciones que [`Storage`] supuso al
    /// crear cada celda.
    ///
    /// [`Storage`]: crate::scope::Storage
    fn header(&mut self) -> Result<(), LinkerError> {
        emit!(self, Jmp, self.runtime.program);

        let frame = self.storage.frame_size();
        let stack_pointer = STACK_ALLOC_START.wrapping_sub((frame + 1).wrapping_mul(STACK_FRAMES));
        debug!("Frame size is {} words", frame);

        let runtime = [
            (self.runtime.return_value, 0),
            (self.runtime.stack_pointer, stack_pointer),
            (self.runtime.stack_alloc, STACK_ALLOC_START),
            (self.runtime.cursor, 0),
            (self.runtime.scratch, 0),
        ];

        for (cell, value) in runtime {
            self.code.mark(cell);

            let size = match self.table.kind(cell) {
                crate::link::PointerKind::Storage { size } => size,
                _ => 1,
            };

            self.code.emit_raw(Operand::Value(value));
            for _ in 1..size {
                self.code.emit_raw(Operand::Value(0));
            }
        }

        let cells = self.storage.cells().to_vec();
        for cell in cells {
            self.code.mark(cell.id);
            for _ in 0..cell.size {
                self.code.emit_raw(Operand::Value(0));
            }
        }

        self.table.define(self.runtime.frame_size, frame)
    }

    /// Cadenas literales, terminadas en `0xFFFF`.
    fn strings(&mut self) {
        if self.build.strings.is_empty() {
            return;
        }

        let end = self.label("strings_end");
        emit!(self, Jmp, end);

        for (label, text) in mem::take(&mut self.build.strings) {
            self.code.mark(label);
            for c in text.chars() {
                self.code.emit_raw(Operand::Value(c as u16));
            }

            self.code.emit_raw(Operand::Value(0xFFFF));
        }

        self.code.mark(end);
    }

    /// Etiqueta nueva para saltos internos.
    pub(crate) fn label(&mut self, prefix: &str) -> PointerId {
        let index = self.build.labels;
        self.build.labels += 1;

        self.table.label(format!("{}_{}", prefix, index))
    }

    /// Etiqueta de una cadena literal, compartida entre usos iguales.
    pub(crate) fn string(&mut self, text: &str) -> PointerId {
        let existing = self.build.strings.iter().find(|(_, string)| string == text);
        if let Some((label, _)) = existing {
            return *label;
        }

        let label = self.table.label(format!("string_{}", self.build.strings.len()));
        self.build.strings.push((label, text.to_owned()));

        label
    }

    /// Solicita la construcción de una función.
    pub(crate) fn request(&mut self, function: FunctionId) {
        if self.build.requested.insert(function) {
            self.build.worklist.push(function);
        }
    }

    /// Temporal que vive hasta el final de la sentencia actual.
    pub(crate) fn hold(&mut self, scope: ScopeId, size: u16) -> PointerId {
        let id = self
            .scopes
            .temporary(scope, size, &mut self.storage, &mut self.table);

        self.build.held.push((scope, id, size));
        id
    }

    /// Comentario de listado, solo si se solicitaron.
    pub(crate) fn note<F: FnOnce() -> String>(&mut self, text: F) {
        if self.options.comments {
            self.code.comment(text());
        }
    }

    /// Valores que caben en una palabra, incluyendo referencias.
    pub(crate) fn is_word(&self, ty: &Type) -> bool {
        !matches!(ty, Type::Struct(_) | Type::Pointer(_))
    }

    pub(crate) fn build_statements(&mut self, scope: ScopeId, statements: &[Statement]) {
        for statement in statements {
            let mark = self.build.held.len();
            self.build_statement(scope, statement);

            let released: Vec<_> = self.build.held.drain(mark..).collect();
            for (scope, id, size) in released {
                self.scopes.release(scope, id, size);
            }
        }
    }

    fn build_statement(&mut self, scope: ScopeId, statement: &Statement) {
        match &statement.kind {
            StatementKind::Empty
            | StatementKind::Function(_)
            | StatementKind::Struct(_)
            | StatementKind::Use(_)
            | StatementKind::Namespace { body: None, .. }
            | StatementKind::Import { program: None, .. } => (),

            StatementKind::Expression(expr) => self.effect(scope, expr),

            StatementKind::Variable(declaration) => {
                let variable = match declaration.variable {
                    Some(variable) => variable,
                    None => return,
                };

                if self.variables[variable].removed {
                    if let Some(value) = &declaration.value {
                        self.effect(scope, value);
                    }

                    return;
                }

                let place = self.variable_place(variable);
                match &declaration.value {
                    Some(value) => self.assign_to(scope, value, &place),
                    None => {
                        let size = self.variables[variable].ty.size(&self.structs);
                        self.zero(scope, &place, size);
                    }
                }

                self.note(|| format!("var {}", declaration.name.val()));
            }

            StatementKind::Block(block) => {
                let inner = block.scope.unwrap_or(scope);
                self.build_statements(inner, &block.statements);
            }

            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                let then_label = self.label("if_then");
                let else_label = self.label("if_else");
                let end = self.label("if_end");

                self.branch(scope, condition, then_label, else_label);

                self.code.mark(then_label);
                self.build_statements(then.scope.unwrap_or(scope), &then.statements);

                match otherwise {
                    Some(otherwise) => {
                        emit!(self, Jmp, end);
                        self.code.mark(else_label);
                        self.build_statements(scope, std::slice::from_ref(otherwise.as_ref()));
                    }

                    None => self.code.mark(else_label),
                }

                self.code.mark(end);
            }

            StatementKind::While { condition, body } => {
                let start = self.label("while_start");
                let inner = self.label("while_body");
                let exit = self.label("while_end");

                self.code.mark(start);
                self.branch(scope, condition, inner, exit);
                self.code.mark(inner);

                self.build.loops.push(Loop { exit, next: start });
                self.build_statements(body.scope.unwrap_or(scope), &body.statements);
                self.build.loops.pop();

                emit!(self, Jmp, start);
                self.code.mark(exit);
            }

            StatementKind::For {
                init,
                condition,
                update,
                body,
                scope: inner,
            } => {
                let scope = inner.unwrap_or(scope);
                if let Some(init) = init {
                    self.build_statements(scope, std::slice::from_ref(init.as_ref()));
                }

                let start = self.label("for_start");
                let inside = self.label("for_body");
                let next = self.label("for_next");
                let exit = self.label("for_end");

                self.code.mark(start);
                match condition {
                    Some(condition) => self.branch(scope, condition, inside, exit),
                    None => (),
                }

                self.code.mark(inside);
                self.build.loops.push(Loop { exit, next });
                self.build_statements(body.scope.unwrap_or(scope), &body.statements);
                self.build.loops.pop();

                self.code.mark(next);
                if let Some(update) = update {
                    self.effect(scope, update);
                }

                emit!(self, Jmp, start);
                self.code.mark(exit);
            }

            StatementKind::Break => {
                if let Some(target) = self.build.loops.last().map(|target| target.exit) {
                    emit!(self, Jmp, target);
                }
            }

            StatementKind::Continue => {
                if let Some(target) = self.build.loops.last().map(|target| target.next) {
                    emit!(self, Jmp, target);
                }
            }

            StatementKind::Return(value) => self.build_return(scope, value.as_ref()),

            StatementKind::Label { pointer, .. } => {
                if let Some(pointer) = pointer {
                    self.code.mark(*pointer);
                }
            }

            StatementKind::Goto { target, .. } => {
                if let Some(target) = target {
                    emit!(self, Jmp, *target);
                }
            }

            StatementKind::Namespace {
                body: Some(body), ..
            } => self.build_statements(body.scope.unwrap_or(scope), &body.statements),

            StatementKind::Import {
                program: Some(program),
                scope: file,
                ..
            } => self.build_statements(file.unwrap_or(scope), &program.statements),
        }
    }

    /// Celdas de pila en orden de marco, palabra por palabra.
    pub(crate) fn frame_words(&self) -> Vec<crate::link::Pointer> {
        let mut cells: Vec<_> = self
            .storage
            .cells()
            .iter()
            .filter(|cell| cell.pool == Pool::Stack)
            .collect();

        cells.sort_by_key(|cell| self.storage.frame_offset(cell.id));
        cells
            .into_iter()
            .flat_map(|cell| (0..cell.size).map(move |word| crate::link::Pointer::from(cell.id).add(word)))
            .collect()
    }
}
