//! Lugares de memoria: celdas, elementos de arreglo y campos empacados.
//!
//! Un [`Place`] describe dónde vive un valor sin cargarlo todavía. Las
//! direcciones fijas del banco 0 se acceden con `AIN`/`STA` o, fuera del
//! campo inmediato, con `LDLGE`/`STLGE`. Cualquier otra dirección pasa
//! por `LDAIN`/`STAOUT` rodeados del cambio de banco correspondiente.
//! El banco siempre vuelve a 0 después del acceso.

use crate::{
    ast::{Binding, Expr, ExprKind},
    codegen::CodegenError,
    driver::Compiler,
    link::{Pointer, PointerId},
    scope::{Pool, ScopeId, VariableId},
    types::{BitRange, Field, Type},
};

/// Origen de la dirección de un lugar.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Address {
    /// Dirección conocida al enlazar.
    Fixed(Pointer),

    /// Dirección guardada en una celda.
    Held(Pointer),
}

/// Banco de memoria de un lugar.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Bank {
    Static(u16),

    /// El banco se lee de una celda al acceder.
    Cell(Pointer),
}

/// Un lugar de memoria direccionable.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Place {
    address: Address,
    offset: u16,
    bank: Bank,
    bits: Option<BitRange>,
}

impl Place {
    pub(crate) fn fixed<P: Into<Pointer>>(pointer: P) -> Self {
        Place {
            address: Address::Fixed(pointer.into()),
            offset: 0,
            bank: Bank::Static(0),
            bits: None,
        }
    }

    fn held<P: Into<Pointer>>(cell: P, bank: Bank) -> Self {
        Place {
            address: Address::Held(cell.into()),
            offset: 0,
            bank,
            bits: None,
        }
    }

    /// Lugar de un campo dentro de este.
    pub(crate) fn field(self, field: &Field) -> Self {
        Place {
            offset: self.offset.wrapping_add(field.offset),
            bits: field.bits,
            ..self
        }
    }

    pub(crate) fn bits(&self) -> Option<BitRange> {
        self.bits
    }

    fn whole(self) -> Self {
        Place { bits: None, ..self }
    }
}

/// Base de un puntero a arreglo.
enum Base {
    Constant(u16),
    Label(PointerId),

    /// Celda que contiene la dirección.
    Cell(Pointer),
}

impl Compiler<'_> {
    pub(crate) fn variable_place(&self, variable: VariableId) -> Place {
        let variable = &self.variables[variable];
        match variable.ty {
            Type::Reference(_) => Place::held(variable.cell, Bank::Static(0)),
            _ => Place::fixed(variable.cell),
        }
    }

    /// Ubica un lugar escribible o, en su defecto, el valor en un temporal.
    pub(super) fn locate(&mut self, scope: ScopeId, expr: &Expr) -> Place {
        match &expr.kind {
            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => self.variable_place(*variable),

            ExprKind::Member {
                object,
                resolved: Some(field),
                ..
            } => self.locate(scope, object).field(field),

            ExprKind::Index { array, index } => self.element(scope, expr, array, index),

            _ => {
                let size = expr.ty.size(&self.structs);
                let temp = self.hold(scope, size);

                let place = Place::fixed(temp);
                self.assign_to(scope, expr, &place);

                place
            }
        }
    }

    fn element(&mut self, scope: ScopeId, expr: &Expr, array: &Expr, index: &Expr) -> Place {
        let size = expr.ty.size(&self.structs);
        let (base, bank) = self.pointer(scope, array);

        if let Some(index) = self.evaluate(index) {
            let offset = index.wrapping_mul(size);
            match base {
                Base::Constant(address) => {
                    let end = u32::from(address) + u32::from(offset) + u32::from(size);
                    if end > 0x10000 {
                        if let Bank::Static(bank) = bank {
                            let error = CodegenError::BankOverflow {
                                address: end - 1,
                                bank,
                            };

                            self.diagnostics.error(expr.location.clone(), error);
                        }
                    }

                    return Place {
                        address: Address::Fixed(Pointer::Absolute(address.wrapping_add(offset))),
                        offset: 0,
                        bank,
                        bits: None,
                    };
                }

                Base::Label(label) => {
                    return Place {
                        address: Address::Fixed(Pointer::from(label).add(offset)),
                        offset: 0,
                        bank,
                        bits: None,
                    }
                }

                Base::Cell(cell) => {
                    return Place {
                        offset,
                        ..Place::held(cell, bank)
                    }
                }
            }
        }

        self.expr(scope, index);
        if size != 1 {
            self.set_b(size);
            emit!(self, Mult);
        }

        match base {
            Base::Constant(address) => self.set_b(address),
            Base::Label(label) => emit!(self, Ldwb, label),
            Base::Cell(cell) => self.read_b(cell),
        }

        emit!(self, Add);

        let held = self.hold(scope, 1);
        self.write_a(held);

        Place::held(held, bank)
    }

    /// Dirección y banco de un valor puntero.
    fn pointer(&mut self, scope: ScopeId, expr: &Expr) -> (Base, Bank) {
        match &expr.kind {
            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } if !matches!(self.variables[*variable].ty, Type::Reference(_)) => {
                let cell = Pointer::from(self.variables[*variable].cell);
                (Base::Cell(cell), Bank::Cell(cell.add(1)))
            }

            ExprKind::String(text) => (Base::Label(self.string(text)), Bank::Static(0)),

            ExprKind::CreatePointer { address, bank, .. } => {
                let bank = Bank::Static(*bank.val() as u16);
                match self.evaluate(address) {
                    Some(address) => (Base::Constant(address), bank),
                    None => {
                        self.expr(scope, address);
                        let held = self.hold(scope, 1);
                        self.write_a(held);

                        (Base::Cell(held.into()), bank)
                    }
                }
            }

            ExprKind::Cast { value, .. } => self.pointer(scope, value),

            _ => {
                let temp = Pointer::from(self.hold(scope, 2));
                self.assign_to(scope, expr, &Place::fixed(temp));

                (Base::Cell(temp), Bank::Cell(temp.add(1)))
            }
        }
    }

    /// Dirección fija en el banco 0 de una palabra del lugar.
    fn direct(&self, place: &Place, word: u16) -> Option<Pointer> {
        match (place.address, place.bank) {
            (Address::Fixed(pointer), Bank::Static(0)) => {
                Some(pointer.add(place.offset.wrapping_add(word)))
            }

            _ => None,
        }
    }

    /// Calcula la dirección de una palabra del lugar en A.
    pub(super) fn address_into_a(&mut self, place: &Place, word: u16) {
        let offset = place.offset.wrapping_add(word);
        match place.address {
            Address::Fixed(pointer) => emit!(self, Ldw, pointer.add(offset)),
            Address::Held(cell) => {
                self.read_a(cell);
                if offset != 0 {
                    self.set_b(offset);
                    emit!(self, Add);
                }
            }
        }
    }

    /// Deja en C el banco del lugar si este se lee de una celda.
    ///
    /// Debe ocurrir después de calcular la dirección, ya que `LDW` y
    /// `LDLGE` reinician el banco.
    fn prepare_bank(&mut self, bank: Bank) {
        if let Bank::Cell(cell) = bank {
            self.read_c(cell);
        }
    }

    /// Selecciona el banco del lugar, indicando si debe restaurarse.
    fn switch_bank(&mut self, bank: Bank) -> bool {
        match bank {
            Bank::Static(0) => false,
            Bank::Static(bank) => {
                emit!(self, Bnk, bank);
                true
            }

            Bank::Cell(_) => {
                emit!(self, Bnkc);
                true
            }
        }
    }

    /// Carga en A una palabra del lugar.
    pub(super) fn load(&mut self, place: &Place, word: u16) {
        match self.direct(place, word) {
            Some(pointer) => self.read_a(pointer),
            None => {
                self.address_into_a(place, word);
                self.prepare_bank(place.bank);

                let restore = self.switch_bank(place.bank);
                emit!(self, Ldain);

                if restore {
                    emit!(self, Bnk, 0);
                }
            }
        }

        if let Some(bits) = place.bits {
            if bits.offset > 0 {
                self.set_b(u16::from(bits.offset));
                emit!(self, Bsr);
            }

            self.set_b(bits.mask());
            emit!(self, And);
        }
    }

    /// Escribe A en una palabra del lugar.
    ///
    /// Devuelve `true` si A todavía contiene el valor escrito.
    pub(super) fn store(&mut self, scope: ScopeId, place: &Place, word: u16) -> bool {
        if let Some(bits) = place.bits {
            self.store_bits(scope, place, word, bits);
            return false;
        }

        if let Some(pointer) = self.direct(place, word) {
            self.write_a(pointer);
            return true;
        }

        let scratch = self.runtime.scratch;
        emit!(self, Sta, scratch);
        self.address_into_a(place, word);
        self.prepare_bank(place.bank);

        // `scratch` vive junto al entorno; BIN conserva C.
        emit!(self, Bin, scratch);

        let restore = self.switch_bank(place.bank);
        emit!(self, Staout);

        if restore {
            emit!(self, Bnk, 0);
        }

        false
    }

    fn store_bits(&mut self, scope: ScopeId, place: &Place, word: u16, bits: BitRange) {
        self.set_b(bits.mask());
        emit!(self, And);

        if bits.offset > 0 {
            self.set_b(u16::from(bits.offset));
            emit!(self, Bsl);
        }

        let field = self.hold(scope, 1);
        self.write_a(field);

        let whole = place.whole();
        self.load(&whole, word);
        self.set_b(!bits.shifted_mask());
        emit!(self, And);
        self.read_b(field);
        emit!(self, Or);

        self.store(scope, &whole, word);
    }

    pub(super) fn copy(&mut self, scope: ScopeId, from: &Place, to: &Place, size: u16) {
        for word in 0..size {
            self.load(from, word);
            self.store(scope, to, word);
        }
    }

    pub(super) fn zero(&mut self, scope: ScopeId, place: &Place, size: u16) {
        let mut loaded = false;
        for word in 0..size {
            if !loaded {
                emit!(self, Ldia, 0);
            }

            loaded = self.store(scope, place, word);
        }
    }

    /// Carga en A la dirección de una variable, campo o elemento.
    ///
    /// Con `frame`, las celdas de pila se direccionan dentro del marco
    /// que la siguiente llamada guardará, de manera que el llamado
    /// escribe sobre el valor que se restaura al retornar.
    pub(super) fn address_of(&mut self, scope: ScopeId, target: &Expr, frame: bool) -> Bank {
        match &target.kind {
            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => {
                let variable = &self.variables[*variable];
                let (cell, pool) = (variable.cell, variable.pool);

                match (&variable.ty, pool) {
                    (Type::Reference(_), _) => self.read_a(cell),
                    (_, Pool::Stack) if frame => {
                        let offset = self.storage.frame_offset(cell).unwrap_or(0);
                        self.read_a(self.runtime.stack_pointer);
                        self.set_b(offset + 1);
                        emit!(self, Add);
                    }

                    _ => emit!(self, Ldw, cell),
                }

                Bank::Static(0)
            }

            ExprKind::Member {
                object,
                resolved: Some(field),
                ..
            } => {
                let bank = self.address_of(scope, object, frame);
                if field.offset != 0 {
                    self.set_b(field.offset);
                    emit!(self, Add);
                }

                bank
            }

            _ => {
                let place = self.locate(scope, target);
                self.address_into_a(&place, 0);
                place.bank
            }
        }
    }

    /// Dirección de un argumento por referencia, que debe vivir en el banco 0.
    pub(super) fn reference(&mut self, scope: ScopeId, target: &Expr, frame: bool) {
        match self.address_of(scope, target, frame) {
            Bank::Static(0) => (),
            Bank::Static(bank) => {
                let error = CodegenError::ReferenceBank(bank);
                self.diagnostics.error(target.location.clone(), error);
            }

            Bank::Cell(_) => {
                let message = "Reference to a pointer element assumes the pointer targets bank 0";
                self.diagnostics.warning(target.location.clone(), message);
            }
        }
    }
}
