//! Convención de llamada.
//!
//! Todas las funciones comparten las mismas celdas de pila: la n-ésima
//! variable de tamaño `s` de cualquier función ocupa la misma celda.
//! Cada llamada guarda por lo tanto el contenido completo de esas
//! celdas en un marco de memoria y lo restaura al retornar.
//!
//! Una llamada real procede así:
//!
//! 1. Los argumentos que no son literales se evalúan en temporales.
//! 2. C recibe el bloque que fija argumentos (o la función misma) y B
//!    la dirección de retorno; luego se salta a `__call`.
//! 3. `__call` escribe la dirección de retorno y las celdas de pila en
//!    el marco apuntado por `stack_pointer`, avanza el puntero y salta
//!    al destino recibido en C.
//! 4. El bloque de argumentos copia los temporales a las celdas de
//!    parámetro y salta a la función.
//! 5. La función deja su resultado en `return_value` y salta a
//!    `__return`, que retrocede el puntero, restaura las celdas y
//!    salta a la dirección de retorno guardada.

use std::{collections::HashMap, mem};

use log::debug;

use crate::{
    ast::{Call, CallTarget, Expr, ExprKind, InlineSite},
    codegen::{InlineReturn, Place},
    driver::{Compiler, FunctionId},
    link::{Operand, PointerId},
    scope::ScopeId,
    types::Type,
};

/// Destino del resultado de una llamada.
#[derive(Copy, Clone)]
pub(crate) enum Outcome {
    Discard,

    /// Resultado de una palabra en A.
    Word,

    Into(Place),
}

/// Argumento preparado antes de saltar a `__call`.
enum Staged {
    Literal(u16),
    Temporary(PointerId, u16),
}

impl Compiler<'_> {
    pub(crate) fn call(&mut self, scope: ScopeId, call: &Call, outcome: Outcome) {
        let (parameters, ret, function) = match &call.target {
            CallTarget::Unresolved => return,
            CallTarget::Inline(site) => return self.inline_call(scope, call, site, outcome),

            CallTarget::Function(function) => {
                let signature = self.functions[function.index()].signature();
                (signature.parameters, signature.ret, Some(*function))
            }

            CallTarget::Value => match call.callee.ty.signature() {
                Some(signature) => (signature.parameters.clone(), signature.ret.clone(), None),
                None => return,
            },
        };

        let mut staged = Vec::with_capacity(call.arguments.len());
        for (argument, ty) in call.arguments.iter().zip(&parameters) {
            let argument = self.stage(scope, argument, ty, true);
            staged.push(argument);
        }

        let callee = match function {
            Some(_) => None,
            None => {
                self.expr(scope, &call.callee);
                let callee = self.hold(scope, 1);
                self.write_a(callee);

                Some(callee)
            }
        };

        let (entry, name) = match function {
            Some(function) => {
                self.request(function);
                let function = &self.functions[function.index()];
                (Operand::from(function.label), function.display.clone())
            }

            None => (Operand::None, String::from("function value")),
        };

        let ret_label = self.label("ret");
        let setargs = (!staged.is_empty()).then(|| self.label("setargs"));

        match (setargs, callee) {
            (Some(setargs), _) => emit!(self, Ldw, setargs),
            (None, Some(callee)) => self.read_a(callee),
            (None, None) => emit!(self, Ldw, entry),
        }

        emit!(self, Swpc);
        emit!(self, Ldwb, ret_label);
        emit!(self, Jmp, self.runtime.call);
        self.note(|| format!("call {}", name));

        if let Some(setargs) = setargs {
            self.code.mark(setargs);

            let mut counters: HashMap<u16, usize> = HashMap::new();
            for (argument, ty) in staged.into_iter().zip(&parameters) {
                let size = ty.size(&self.structs);
                let counter = counters.entry(size).or_insert(0);
                let slot = self.storage.parameter(&mut self.table, size, *counter);
                *counter += 1;

                self.unstage(scope, argument, slot);
            }

            match callee {
                Some(callee) => {
                    self.read_a(callee);
                    emit!(self, Jreg);
                }

                None => emit!(self, Jmp, entry),
            }
        }

        self.code.mark(ret_label);

        let result = self.runtime.return_value;
        match outcome {
            Outcome::Discard => (),
            Outcome::Word => self.read_a(result),
            Outcome::Into(dest) => {
                let size = ret.size(&self.structs);
                self.copy(scope, &Place::fixed(result), &dest, size);
            }
        }
    }

    /// Evalúa un argumento antes de la llamada.
    ///
    /// Las literales de una palabra se fijan directamente al copiar los
    /// argumentos, sin ocupar un temporal.
    fn stage(&mut self, scope: ScopeId, argument: &Expr, ty: &Type, frame: bool) -> Staged {
        let size = ty.size(&self.structs);

        if let (Some(value), true) = (argument.constant(), self.is_word(ty)) {
            return Staged::Literal(value as u16);
        }

        let temp = self.hold(scope, size);
        match &argument.kind {
            ExprKind::Reference(target) => {
                self.reference(scope, target, frame);
                self.write_a(temp);
            }

            _ if self.is_word(ty) => {
                self.expr(scope, argument);
                self.write_a(temp);
            }

            _ => self.assign_to(scope, argument, &Place::fixed(temp)),
        }

        Staged::Temporary(temp, size)
    }

    fn unstage(&mut self, scope: ScopeId, argument: Staged, cell: PointerId) {
        let cell = Place::fixed(cell);

        match argument {
            Staged::Literal(value) => {
                self.set_a(value);
                self.store(scope, &cell, 0);
            }

            Staged::Temporary(temp, size) => self.copy(scope, &Place::fixed(temp), &cell, size),
        }
    }

    /// Expansión en línea de una llamada.
    ///
    /// Los argumentos se evalúan antes de escribir cualquier parámetro,
    /// ya que sitios hermanos comparten celdas de parámetro.
    fn inline_call(&mut self, scope: ScopeId, call: &Call, site: &InlineSite, outcome: Outcome) {
        let mut staged = Vec::with_capacity(site.parameters.len());
        for (&variable, argument) in site.parameters.iter().zip(&call.arguments) {
            if self.variables[variable].removed {
                self.effect(scope, argument);
                continue;
            }

            let ty = self.variables[variable].ty.clone();
            let argument = self.stage(scope, argument, &ty, false);
            staged.push((variable, argument));
        }

        for (variable, argument) in staged {
            let cell = self.variables[variable].cell;
            self.unstage(scope, argument, cell);
        }

        let ret = self.functions[site.function.index()].ret.clone();
        let word = self.is_word(&ret);

        if let (Some(value), true, Outcome::Word | Outcome::Discard) =
            (site.single_return(), word, outcome)
        {
            self.expr(site.scope, value);
            return;
        }

        let end = self.label("inline_end");
        let size = ret.size(&self.structs);
        let result = (!ret.is_void()).then(|| self.hold(scope, size));

        self.build.returns.push(InlineReturn { end, result });
        self.build_statements(site.scope, &site.body.statements);
        self.build.returns.pop();

        self.code.mark(end);

        match (outcome, result) {
            (Outcome::Word, Some(result)) => self.read_a(result),
            (Outcome::Into(dest), Some(result)) => {
                self.copy(scope, &Place::fixed(result), &dest, size)
            }

            _ => (),
        }
    }

    /// Sentencia `return` según el contexto en que aparece.
    pub(crate) fn build_return(&mut self, scope: ScopeId, value: Option<&Expr>) {
        let function = match self.scopes.function_of(scope) {
            Some(function) => function,
            None => {
                if let Some(value) = value {
                    self.effect(scope, value);
                }

                emit!(self, Jmp, self.runtime.end);
                return;
            }
        };

        if self.functions[function.index()].inline {
            let (end, result) = match self.build.returns.last() {
                Some(target) => (target.end, target.result),
                None => return,
            };

            match (value, result) {
                (Some(value), Some(result)) => self.assign_to(scope, value, &Place::fixed(result)),
                (Some(value), None) => self.effect(scope, value),
                (None, _) => (),
            }

            emit!(self, Jmp, end);
            return;
        }

        if let Some(value) = value {
            let result = Place::fixed(self.runtime.return_value);
            self.assign_to(scope, value, &result);
        }

        self.epilogue(function);
    }

    fn epilogue(&mut self, function: FunctionId) {
        if let Some(saved) = self.functions[function.index()].stack_alloc {
            self.read_a(saved);
            self.write_a(self.runtime.stack_alloc);
        }

        emit!(self, Jmp, self.runtime.ret);
    }

    pub(crate) fn build_function(&mut self, function: FunctionId) {
        let index = function.index();
        let (scope, body) = match (self.functions[index].scope, self.functions[index].body.take()) {
            (Some(scope), Some(body)) => (scope, body),
            (_, body) => {
                self.functions[index].body = body;
                return;
            }
        };

        debug!(
            "Building function '{}' with {} references",
            self.functions[index].display, self.functions[index].references
        );

        let outer = mem::take(&mut self.code);
        self.code.mark(self.functions[index].label);

        if let Some(saved) = self.functions[index].stack_alloc {
            self.read_a(self.runtime.stack_alloc);
            self.write_a(saved);
        }

        self.build_statements(scope, &body.statements);
        self.epilogue(function);

        let display = self.functions[index].display.clone();
        self.note(|| format!("end of {}", display));

        self.functions[index].body = Some(body);
        self.functions[index].code = Some(mem::replace(&mut self.code, outer));
    }

    /// Trampolines `__call` y `__return`.
    ///
    /// Al entrar a `__call`, B contiene la dirección de retorno y C el
    /// destino. El destino se guarda en `frame_cursor` antes de copiar
    /// el marco, pues las celdas lejanas se leen pasando por C. El marco
    /// mide `frame_size + 1` palabras.
    pub(crate) fn trampolines(&mut self) {
        let words = self.frame_words();
        let (sp, cursor) = (self.runtime.stack_pointer, self.runtime.cursor);
        let frame = Operand::from(self.runtime.frame_size).offset(1);

        self.code.mark(self.runtime.call);
        emit!(self, Ain, sp);
        emit!(self, Staout);
        emit!(self, Swpc);
        emit!(self, Sta, cursor);
        emit!(self, Ain, sp);

        for &word in &words {
            emit!(self, Ldib, 1);
            emit!(self, Add);
            self.read_b(word);
            emit!(self, Staout);
        }

        emit!(self, Ain, sp);
        emit!(self, Ldwb, frame);
        emit!(self, Add);
        emit!(self, Sta, sp);
        emit!(self, Ain, cursor);
        emit!(self, Jreg);

        self.code.mark(self.runtime.ret);
        emit!(self, Ain, sp);
        emit!(self, Ldwb, frame);
        emit!(self, Sub);
        emit!(self, Sta, sp);
        emit!(self, Sta, cursor);

        for &word in &words {
            emit!(self, Ain, cursor);
            emit!(self, Ldib, 1);
            emit!(self, Add);
            emit!(self, Sta, cursor);
            emit!(self, Ldain);
            self.write_a(word);
        }

        emit!(self, Ain, sp);
        emit!(self, Ldain);
        emit!(self, Jreg);
    }
}
