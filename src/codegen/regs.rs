use crate::{
    arch::MAX_DATA,
    ast::{Binding, Expr, ExprKind},
    driver::Compiler,
    link::Pointer,
    scope::ScopeId,
    types::Type,
};

/// Origen de un operando que se carga directamente en B.
#[derive(Copy, Clone)]
pub(super) enum Source {
    Value(u16),
    Cell(Pointer),
}

impl Compiler<'_> {
    /// Determina si la dirección cabe en el campo inmediato.
    pub(super) fn is_small(&self, pointer: Pointer) -> bool {
        match pointer {
            Pointer::Symbol { id, .. } => self.table.is_small(id),
            Pointer::Absolute(address) => address <= MAX_DATA,
        }
    }

    /// Carga en A una palabra del banco 0.
    pub(super) fn read_a<P: Into<Pointer>>(&mut self, cell: P) {
        let cell = cell.into();
        if self.is_small(cell) {
            emit!(self, Ain, cell);
        } else {
            emit!(self, Ldlge, cell);
        }
    }

    /// Escribe A en una palabra del banco 0.
    pub(super) fn write_a<P: Into<Pointer>>(&mut self, cell: P) {
        let cell = cell.into();
        if self.is_small(cell) {
            emit!(self, Sta, cell);
        } else {
            emit!(self, Stlge, cell);
        }
    }

    /// Carga en B una palabra del banco 0 sin alterar A.
    ///
    /// La forma larga pasa por A y deja C alterado.
    pub(super) fn read_b<P: Into<Pointer>>(&mut self, cell: P) {
        let cell = cell.into();
        if self.is_small(cell) {
            emit!(self, Bin, cell);
        } else {
            emit!(self, Swp);
            emit!(self, Ldlge, cell);
            emit!(self, Swp);
        }
    }

    /// Carga en C una palabra del banco 0 sin alterar A.
    ///
    /// La forma larga deja B alterado.
    pub(super) fn read_c<P: Into<Pointer>>(&mut self, cell: P) {
        let cell = cell.into();
        if self.is_small(cell) {
            emit!(self, Cin, cell);
        } else {
            emit!(self, Swp);
            emit!(self, Ldlge, cell);
            emit!(self, Swpc);
        }
    }

    pub(super) fn set_a(&mut self, value: u16) {
        if value <= MAX_DATA {
            emit!(self, Ldia, value);
        } else {
            emit!(self, Ldw, value);
        }
    }

    pub(super) fn set_b(&mut self, value: u16) {
        if value <= MAX_DATA {
            emit!(self, Ldib, value);
        } else {
            emit!(self, Ldwb, value);
        }
    }

    pub(super) fn load_b(&mut self, source: Source) {
        match source {
            Source::Value(value) => self.set_b(value),
            Source::Cell(cell) => self.read_b(cell),
        }
    }

    /// Deja `left` en A y `right` en B.
    pub(super) fn operands(&mut self, scope: ScopeId, left: &Expr, right: &Expr) {
        if let Some(source) = self.b_source(right) {
            self.expr(scope, left);
            self.load_b(source);
        } else if self.preserves_b(right) {
            self.expr(scope, left);
            emit!(self, Swp);
            self.expr(scope, right);
            emit!(self, Swp);
        } else {
            self.expr(scope, left);
            let spill = self.hold(scope, 1);
            self.write_a(spill);

            self.expr(scope, right);
            emit!(self, Swp);
            self.read_a(spill);
        }
    }

    pub(super) fn b_source(&self, expr: &Expr) -> Option<Source> {
        if let Some(value) = expr.constant() {
            return Some(Source::Value(value as u16));
        }

        self.direct_cell(expr).map(Source::Cell)
    }

    /// Celda de una variable escalar que se lee sin calcular direcciones.
    ///
    /// Cubre identificadores y campos sin bits de structs que no se
    /// acceden por referencia.
    pub(super) fn direct_cell(&self, expr: &Expr) -> Option<Pointer> {
        if !self.is_word(&expr.ty) {
            return None;
        }

        match &expr.kind {
            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => {
                let variable = &self.variables[*variable];
                match variable.ty {
                    Type::Reference(_) => None,
                    _ => Some(Pointer::from(variable.cell)),
                }
            }

            ExprKind::Member {
                object,
                resolved: Some(field),
                ..
            } if field.bits.is_none() => {
                let base = self.struct_cell(object)?;
                Some(base.add(field.offset))
            }

            _ => None,
        }
    }

    fn struct_cell(&self, expr: &Expr) -> Option<Pointer> {
        match &expr.kind {
            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => {
                let variable = &self.variables[*variable];
                match variable.ty {
                    Type::Struct(_) => Some(Pointer::from(variable.cell)),
                    _ => None,
                }
            }

            ExprKind::Member {
                object,
                resolved: Some(field),
                ..
            } => Some(self.struct_cell(object)?.add(field.offset)),

            _ => None,
        }
    }

    /// Expresiones cuya evaluación no toca B.
    fn preserves_b(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Identifier {
                binding: Binding::Function(_),
                ..
            } => true,

            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => matches!(self.variables[*variable].ty, Type::Reference(_)) && self.is_word(&expr.ty),

            _ => false,
        }
    }
}
