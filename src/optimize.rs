//! Plegado de constantes y eliminación de variables sin uso.
//!
//! La aritmética se pliega con la misma semántica de dieciséis bits sin
//! signo que implementa la CPU: suma, resta y multiplicación modulares,
//! división entre cero igual a cero y comparaciones sin signo. Esto
//! garantiza que un programa produce los mismos resultados con y sin
//! optimización.
//!
//! La propagación reemplaza lecturas de variables constantes o nunca
//! modificadas por su valor inicial literal. Tras plegar, las variables
//! sin lecturas ni referencias se marcan como eliminadas y la
//! generación de código omite sus escrituras.

use std::mem;

use log::{debug, trace};

use crate::{
    ast::{
        BinaryOp, Binding, CallTarget, Expr, ExprKind, Program, Statement, StatementKind,
        UnaryOp,
    },
    driver::Compiler,
    scope::{VariableId, Variables},
    types::Type,
};

/// Evalúa un operador binario sobre palabras de la CPU.
pub fn fold_binary(op: BinaryOp, left: u16, right: u16) -> u16 {
    use BinaryOp::*;

    match op {
        Add => left.wrapping_add(right),
        Sub => left.wrapping_sub(right),
        Mul => left.wrapping_mul(right),
        Div => left.checked_div(right).unwrap_or(0),

        // a - (a / b) * b, como en la secuencia emitida
        Mod => left.checked_rem(right).unwrap_or(left),

        And => left & right,
        Or => left | right,
        Xor => left ^ right,
        Shl => left.checked_shl(right.into()).unwrap_or(0),
        Shr => left.checked_shr(right.into()).unwrap_or(0),
        Equal => (left == right) as u16,
        NotEqual => (left != right) as u16,
        Less => (left < right) as u16,
        LessEqual => (left <= right) as u16,
        Greater => (left > right) as u16,
        GreaterEqual => (left >= right) as u16,
        AndAlso => (left != 0 && right != 0) as u16,
        OrElse => (left != 0 || right != 0) as u16,
    }
}

/// Evalúa un operador unario sobre una palabra de la CPU.
pub fn fold_unary(op: UnaryOp, operand: u16) -> u16 {
    match op {
        UnaryOp::Minus => 0u16.wrapping_sub(operand),
        UnaryOp::Not => !operand,
        UnaryOp::Negate => (operand == 0) as u16,
    }
}

/// Literal que reemplaza a una expresión plegada.
fn literal(value: u16, ty: &Type) -> ExprKind {
    match ty {
        Type::Boolean if value <= 1 => ExprKind::Boolean(value == 1),
        _ => ExprKind::Integer(i32::from(value)),
    }
}

/// Expresiones cuya evaluación no tiene efectos secundarios.
pub(crate) fn is_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Integer(_)
        | ExprKind::Boolean(_)
        | ExprKind::Char(_)
        | ExprKind::String(_)
        | ExprKind::Identifier { .. }
        | ExprKind::SizeOf(_) => true,

        ExprKind::Binary { left, right, .. } => is_pure(left) && is_pure(right),
        ExprKind::Unary { operand, .. } => is_pure(operand),
        ExprKind::Member { object, .. } => is_pure(object),
        ExprKind::Index { array, index } => is_pure(array) && is_pure(index),
        ExprKind::Cast { value, .. } => is_pure(value),
        ExprKind::CreatePointer { address, .. } => is_pure(address),

        ExprKind::Ternary {
            condition,
            then,
            otherwise,
        } => is_pure(condition) && is_pure(then) && is_pure(otherwise),

        _ => false,
    }
}

/// Determina si un bloque declara etiquetas de `goto`.
fn has_labels(statements: &[Statement]) -> bool {
    statements.iter().any(|statement| match &statement.kind {
        StatementKind::Label { .. } => true,
        StatementKind::Block(block)
        | StatementKind::While { body: block, .. }
        | StatementKind::For { body: block, .. } => has_labels(&block.statements),

        StatementKind::If {
            then, otherwise, ..
        } => {
            has_labels(&then.statements)
                || otherwise
                    .as_ref()
                    .map_or(false, |otherwise| has_labels(std::slice::from_ref(otherwise.as_ref())))
        }

        _ => false,
    })
}

impl Compiler<'_> {
    /// Valor constante de una literal o de una variable `const`.
    ///
    /// A diferencia del plegado, no depende de las banderas de uso de
    /// las variables, por lo que el resultado es estable entre pasadas.
    pub(crate) fn evaluate(&self, expr: &Expr) -> Option<u16> {
        match &expr.kind {
            ExprKind::Integer(_) | ExprKind::Boolean(_) | ExprKind::Char(_) => {
                expr.constant().map(|value| value as u16)
            }

            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => {
                let variable = &self.variables[*variable];
                match variable.constant {
                    true => variable.initializer.as_ref()?.constant().map(|value| value as u16),
                    false => None,
                }
            }

            ExprKind::Unary { op, operand } => Some(fold_unary(*op, self.evaluate(operand)?)),
            ExprKind::Binary { op, left, right } => {
                Some(fold_binary(*op, self.evaluate(left)?, self.evaluate(right)?))
            }

            ExprKind::Cast { value, .. } => self.evaluate(value),
            _ => None,
        }
    }

    pub(crate) fn optimize_program(&mut self, program: &mut Program) {
        self.fold_statements(&mut program.statements);

        for index in 0..self.functions.len() {
            if self.functions[index].inline {
                continue;
            }

            if let Some(mut body) = self.functions[index].body.take() {
                self.fold_statements(&mut body.statements);
                self.functions[index].body = Some(body);
            }
        }

        count_statements(&mut self.variables, &program.statements);
        for function in self.functions.iter().filter(|function| !function.inline) {
            if let Some(body) = &function.body {
                count_statements(&mut self.variables, &body.statements);
            }
        }

        let root = self.root;
        let removable: Vec<VariableId> = self
            .variables
            .iter()
            .filter(|(_, variable)| {
                variable.reads == 0 && !variable.referenced && variable.scope != root
            })
            .map(|(id, _)| id)
            .collect();

        for id in removable {
            trace!("Removing unused variable '{}'", self.variables[id].name);
            self.variables[id].removed = true;
        }
    }

    fn fold_statements(&mut self, statements: &mut [Statement]) {
        for statement in statements {
            self.fold_statement(statement);
        }
    }

    fn fold_statement(&mut self, statement: &mut Statement) {
        let replacement = match &mut statement.kind {
            StatementKind::Expression(expr) => {
                self.fold(expr);
                None
            }

            StatementKind::Variable(declaration) => {
                if let Some(value) = &mut declaration.value {
                    self.fold(value);

                    if let (Some(id), true) = (declaration.variable, value.is_constant()) {
                        let variable = &mut self.variables[id];
                        if variable.constant || variable.unmodified {
                            variable.initializer = Some(value.clone());
                        }
                    }
                }

                None
            }

            StatementKind::Block(block) => {
                self.fold_statements(&mut block.statements);
                None
            }

            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                self.fold(condition);
                self.fold_statements(&mut then.statements);
                if let Some(otherwise) = otherwise {
                    self.fold_statement(otherwise);
                }

                match condition.constant() {
                    Some(value) if value as u16 != 0 => {
                        let dead = otherwise.as_ref().map_or(false, |otherwise| {
                            has_labels(std::slice::from_ref(otherwise.as_ref()))
                        });

                        match dead {
                            true => None,
                            false => Some(StatementKind::Block(mem::replace(
                                then,
                                crate::ast::Block {
                                    location: statement.location.clone(),
                                    statements: Vec::new(),
                                    scope: None,
                                },
                            ))),
                        }
                    }

                    Some(_) if !has_labels(&then.statements) => Some(match otherwise.take() {
                        Some(otherwise) => otherwise.kind,
                        None => StatementKind::Empty,
                    }),

                    _ => None,
                }
            }

            StatementKind::While { condition, body } => {
                self.fold(condition);
                self.fold_statements(&mut body.statements);

                match condition.constant() {
                    Some(0) if !has_labels(&body.statements) => Some(StatementKind::Empty),
                    _ => None,
                }
            }

            StatementKind::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.fold_statement(init);
                }

                if let Some(condition) = condition {
                    self.fold(condition);
                }

                if let Some(update) = update {
                    self.fold(update);
                }

                self.fold_statements(&mut body.statements);
                None
            }

            StatementKind::Return(Some(value)) => {
                self.fold(value);
                None
            }

            StatementKind::Namespace {
                body: Some(body), ..
            } => {
                self.fold_statements(&mut body.statements);
                None
            }

            StatementKind::Import {
                program: Some(program),
                ..
            } => {
                self.fold_statements(&mut program.statements);
                None
            }

            _ => None,
        };

        if let Some(kind) = replacement {
            trace!("Folded statement at {}", statement.location);
            statement.kind = kind;
        }
    }

    /// Literal con que se propaga una variable, si es segura.
    fn propagated(&self, variable: VariableId) -> Option<u16> {
        let variable = &self.variables[variable];
        if variable.constant || (variable.unmodified && !variable.referenced) {
            variable
                .initializer
                .as_ref()
                .and_then(Expr::constant)
                .map(|value| value as u16)
        } else {
            None
        }
    }

    /// Pliega los hijos de un destino de escritura sin reemplazarlo.
    fn fold_place(&mut self, place: &mut Expr) {
        match &mut place.kind {
            ExprKind::Identifier { .. } => (),
            ExprKind::Member { object, .. } => self.fold_place(object),
            ExprKind::Index { array, index } => {
                self.fold_place(array);
                self.fold(index);
            }

            _ => self.fold(place),
        }
    }

    pub(crate) fn fold(&mut self, expr: &mut Expr) {
        let value = match &mut expr.kind {
            ExprKind::Integer(_)
            | ExprKind::Boolean(_)
            | ExprKind::Char(_)
            | ExprKind::String(_)
            | ExprKind::SizeOf(_)
            | ExprKind::Arrow(_)
            | ExprKind::Asm(_) => None,

            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => self.propagated(*variable),

            ExprKind::Identifier { .. } => None,

            ExprKind::Binary { op, left, right } => {
                self.fold(left);
                self.fold(right);

                match (*op, left.constant(), right.constant()) {
                    (op, Some(left), Some(right)) => Some(fold_binary(op, left as u16, right as u16)),

                    // Cortocircuito con operando izquierdo constante
                    (BinaryOp::AndAlso, Some(0), _) => Some(0),
                    (BinaryOp::OrElse, Some(left), _) if left as u16 != 0 => Some(1),
                    _ => None,
                }
            }

            ExprKind::Unary { op, operand } => {
                self.fold(operand);
                operand
                    .constant()
                    .map(|value| fold_unary(*op, value as u16))
            }

            ExprKind::Cast { value, .. } => {
                self.fold(value);
                value.constant().map(|value| value as u16)
            }

            ExprKind::Assign { target, value } => {
                self.fold_place(target);
                self.fold(value);
                None
            }

            ExprKind::Update { target, .. } => {
                self.fold_place(target);
                None
            }

            ExprKind::Reference(target) => {
                self.fold_place(target);
                None
            }

            ExprKind::Member { object, .. } => {
                self.fold_place(object);
                None
            }

            ExprKind::Index { array, index } => {
                self.fold(array);
                self.fold(index);
                None
            }

            ExprKind::CreatePointer { address, .. } => {
                self.fold(address);
                None
            }

            ExprKind::StackAlloc { length, .. } => {
                self.fold(length);
                None
            }

            ExprKind::InitStruct(items) => {
                for item in items {
                    self.fold(&mut item.value);
                }

                None
            }

            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.fold(condition);
                self.fold(then);
                self.fold(otherwise);

                if let Some(value) = condition.constant() {
                    let chosen = match value as u16 != 0 {
                        true => then,
                        false => otherwise,
                    };

                    let location = chosen.location.clone();
                    *expr = mem::replace(chosen.as_mut(), Expr::new(location, ExprKind::Integer(0)));
                    return;
                }

                None
            }

            ExprKind::Switch {
                value,
                arms,
                default,
            } => {
                self.fold(value);
                for arm in arms.iter_mut() {
                    self.fold(&mut arm.value);
                }

                if let Some(default) = default {
                    self.fold(default);
                }

                let scrutinee = match value.constant() {
                    Some(scrutinee) => scrutinee as u16,
                    None => return,
                };

                let chosen = arms
                    .iter()
                    .position(|arm| self.evaluate(&arm.pattern) == Some(scrutinee));

                let location = expr.location.clone();
                let replacement = match (chosen, default) {
                    (Some(index), _) => arms.swap_remove(index).value,
                    (None, Some(default)) => mem::replace(
                        default.as_mut(),
                        Expr::new(location.clone(), ExprKind::Integer(0)),
                    ),

                    (None, None) => Expr {
                        location,
                        kind: ExprKind::Integer(0),
                        ty: expr.ty.clone(),
                    },
                };

                *expr = replacement;
                return;
            }

            ExprKind::Call(call) => {
                self.fold(&mut call.callee);
                for argument in call.arguments.iter_mut() {
                    self.fold(argument);
                }

                match &mut call.target {
                    CallTarget::Inline(site) => {
                        for (&parameter, argument) in site.parameters.iter().zip(&call.arguments) {
                            let variable = &mut self.variables[parameter];
                            if argument.is_constant() && variable.unmodified && !variable.referenced {
                                variable.initializer = Some(argument.clone());
                            }
                        }

                        self.fold_statements(&mut site.body.statements);

                        let pure = call.arguments.iter().all(is_pure);
                        match site.single_return().and_then(Expr::constant) {
                            Some(value) if pure => {
                                debug!(
                                    "Inline call to '{}' folded to {}",
                                    self.function_name(site.function),
                                    value
                                );

                                Some(value as u16)
                            }

                            _ => None,
                        }
                    }

                    _ => None,
                }
            }
        };

        if let Some(value) = value {
            expr.kind = literal(value, &expr.ty);
        }
    }
}

/// Cuenta lecturas de variables en sentencias ya plegadas.
fn count_statements(variables: &mut Variables, statements: &[Statement]) {
    for statement in statements {
        match &statement.kind {
            StatementKind::Expression(expr) | StatementKind::Return(Some(expr)) => {
                count(variables, expr)
            }

            StatementKind::Variable(declaration) => {
                if let Some(value) = &declaration.value {
                    count(variables, value);
                }
            }

            StatementKind::Block(block)
            | StatementKind::Namespace {
                body: Some(block), ..
            } => count_statements(variables, &block.statements),

            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                count(variables, condition);
                count_statements(variables, &then.statements);
                if let Some(otherwise) = otherwise {
                    count_statements(variables, std::slice::from_ref(otherwise.as_ref()));
                }
            }

            StatementKind::While { condition, body } => {
                count(variables, condition);
                count_statements(variables, &body.statements);
            }

            StatementKind::For {
                init,
                condition,
                update,
                body,
                ..
            } => {
                if let Some(init) = init {
                    count_statements(variables, std::slice::from_ref(init.as_ref()));
                }

                for expr in condition.iter().chain(update.iter()) {
                    count(variables, expr);
                }

                count_statements(variables, &body.statements);
            }

            StatementKind::Import {
                program: Some(program),
                ..
            } => count_statements(variables, &program.statements),

            _ => (),
        }
    }
}

fn count(variables: &mut Variables, expr: &Expr) {
    match &expr.kind {
        ExprKind::Identifier {
            binding: Binding::Variable(variable),
            ..
        } => variables[*variable].reads += 1,

        ExprKind::Assign { target, value } => {
            // Escribir una variable completa no la lee
            if !matches!(target.kind, ExprKind::Identifier { .. }) {
                count(variables, target);
            }

            count(variables, value);
        }

        ExprKind::Binary { left, right, .. } => {
            count(variables, left);
            count(variables, right);
        }

        ExprKind::Unary { operand: inner, .. }
        | ExprKind::Update { target: inner, .. }
        | ExprKind::Reference(inner)
        | ExprKind::Member { object: inner, .. }
        | ExprKind::Cast { value: inner, .. }
        | ExprKind::SizeOf(inner)
        | ExprKind::CreatePointer { address: inner, .. }
        | ExprKind::StackAlloc { length: inner, .. } => count(variables, inner),

        ExprKind::Index { array, index } => {
            count(variables, array);
            count(variables, index);
        }

        ExprKind::Ternary {
            condition,
            then,
            otherwise,
        } => {
            count(variables, condition);
            count(variables, then);
            count(variables, otherwise);
        }

        ExprKind::Switch {
            value,
            arms,
            default,
        } => {
            count(variables, value);
            for arm in arms {
                count(variables, &arm.value);
            }

            if let Some(default) = default {
                count(variables, default);
            }
        }

        ExprKind::InitStruct(items) => {
            for item in items {
                count(variables, &item.value);
            }
        }

        ExprKind::Call(call) => {
            count(variables, &call.callee);
            for argument in &call.arguments {
                count(variables, argument);
            }

            if let CallTarget::Inline(site) = &call.target {
                count_statements(variables, &site.body.statements);
            }
        }

        _ => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{driver::Options, import::MemoryReader, scope::ScopeId};
    use pretty_assertions::assert_eq;

    #[test]
    fn arithmetic_wraps_like_the_cpu() {
        assert_eq!(fold_binary(BinaryOp::Add, 0xFFFF, 2), 1);
        assert_eq!(fold_binary(BinaryOp::Sub, 1, 2), 0xFFFF);
        assert_eq!(fold_binary(BinaryOp::Mul, 300, 300), (90000u32 % 65536) as u16);
        assert_eq!(fold_binary(BinaryOp::Div, 7, 0), 0);
        assert_eq!(fold_binary(BinaryOp::Mod, 7, 0), 7);
        assert_eq!(fold_binary(BinaryOp::Mod, 17, 5), 2);
        assert_eq!(fold_binary(BinaryOp::Shl, 1, 16), 0);
        assert_eq!(fold_binary(BinaryOp::Shr, 0x8000, 15), 1);
    }

    #[test]
    fn comparisons_are_unsigned() {
        assert_eq!(fold_binary(BinaryOp::Less, 0xFFFF, 0), 0);
        assert_eq!(fold_binary(BinaryOp::GreaterEqual, 3, 3), 1);
        assert_eq!(fold_binary(BinaryOp::AndAlso, 2, 5), 1);
        assert_eq!(fold_binary(BinaryOp::OrElse, 0, 0), 0);
        assert_eq!(fold_unary(UnaryOp::Minus, 1), 0xFFFF);
        assert_eq!(fold_unary(UnaryOp::Negate, 9), 0);
    }

    fn optimized(text: &str) -> Program {
        let reader = MemoryReader::default();
        let mut compiler = Compiler::new(Options::default(), &reader);
        let mut program = compiler.front_end("main.yabal", text).unwrap();

        let root: ScopeId = compiler.root;
        compiler.declare_program(root, &mut program);
        compiler.initialize_program(root, &mut program);
        assert!(!compiler.diagnostics.has_errors());

        compiler.optimize_program(&mut program);
        program
    }

    fn initializer(program: &Program, index: usize) -> Option<i32> {
        match &program.statements[index].kind {
            StatementKind::Variable(declaration) => declaration.value.as_ref()?.constant(),
            _ => None,
        }
    }

    #[test]
    fn inline_calls_fold_to_literals() {
        let program = optimized(
            "inline int get_offset(int x, int y) { return x * 64 + y }
             var offset = get_offset(3, 5)",
        );

        assert_eq!(initializer(&program, 1), Some(197));
    }

    #[test]
    fn constants_propagate() {
        let program = optimized(
            "const var width = 8
             var area = width * 2 + (width > 4 ? 1 : 0)
             var modified = 1
             modified = 2
             var copy = modified",
        );

        assert_eq!(initializer(&program, 1), Some(17));
        assert_eq!(initializer(&program, 4), None);
    }

    #[test]
    fn constant_switch_picks_its_arm() {
        let program = optimized("var x = 2 switch { 1 => 10, 2 => 20, _ => 30 }");
        assert_eq!(initializer(&program, 0), Some(20));
    }
}
