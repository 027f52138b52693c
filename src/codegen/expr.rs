use std::collections::HashMap;

use crate::{
    arch::{Form, Opcode},
    ast::{AsmArgument, AsmItem, BinaryOp, Binding, Expr, ExprKind, SwitchArm, UnaryOp},
    codegen::{call::Outcome, CodegenError, Place},
    driver::Compiler,
    lex::Identifier,
    link::{Operand, PointerId},
    scope::ScopeId,
    source::Located,
};

impl Compiler<'_> {
    /// Evalúa un valor de una palabra hacia A.
    pub(crate) fn expr(&mut self, scope: ScopeId, expr: &Expr) {
        if let Some(value) = expr.constant() {
            self.set_a(value as u16);
            return;
        }

        match &expr.kind {
            ExprKind::Integer(_) | ExprKind::Boolean(_) | ExprKind::Char(_) => (),

            ExprKind::String(text) => {
                let label = self.string(text);
                emit!(self, Ldw, label);
            }

            ExprKind::Identifier {
                binding: Binding::Function(function),
                ..
            } => self.function_value(*function),

            ExprKind::Identifier {
                binding: Binding::Unresolved,
                ..
            } => emit!(self, Ldia, 0),

            ExprKind::Identifier { .. }
            | ExprKind::Member { .. }
            | ExprKind::Index { .. }
            | ExprKind::CreatePointer { .. }
            | ExprKind::StackAlloc { .. }
            | ExprKind::InitStruct(_) => {
                let place = self.locate(scope, expr);
                self.load(&place, 0);
            }

            ExprKind::Binary { op, .. } if op.is_comparison() || op.is_logical() => {
                self.condition(scope, expr)
            }

            ExprKind::Binary { op, left, right } => self.arithmetic(scope, *op, left, right),

            ExprKind::Unary {
                op: UnaryOp::Negate,
                ..
            } => self.condition(scope, expr),

            ExprKind::Unary {
                op: UnaryOp::Minus,
                operand,
            } => {
                self.expr(scope, operand);
                emit!(self, Swp);
                emit!(self, Ldia, 0);
                emit!(self, Sub);
            }

            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                self.expr(scope, operand);
                emit!(self, Not);
            }

            ExprKind::Assign { target, value } => {
                self.assign(scope, target, value, true);
            }

            ExprKind::Update {
                target,
                increment,
                prefix,
            } => self.update(scope, target, *increment, *prefix, true),

            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => self.ternary(scope, condition, then, otherwise, None),

            ExprKind::Switch {
                value,
                arms,
                default,
            } => self.switch(scope, value, arms, default.as_deref(), None),

            ExprKind::Call(call) => self.call(scope, call, Outcome::Word),

            ExprKind::Reference(target) => self.reference(scope, target, false),

            ExprKind::SizeOf(operand) => {
                let size = self.size_of(operand);
                self.set_a(size);
            }

            ExprKind::Cast { value, .. } => self.expr(scope, value),

            ExprKind::Arrow(arrow) => {
                if let Some(function) = arrow.function {
                    self.function_value(function);
                }
            }

            ExprKind::Asm(items) => self.asm(items),
        }
    }

    /// Evalúa una expresión solo por sus efectos.
    pub(crate) fn effect(&mut self, scope: ScopeId, expr: &Expr) {
        match &expr.kind {
            _ if expr.is_constant() => (),

            ExprKind::Assign { target, value } => {
                self.assign(scope, target, value, false);
            }

            ExprKind::Update {
                target,
                increment,
                prefix,
            } => self.update(scope, target, *increment, *prefix, false),

            ExprKind::Call(call) => self.call(scope, call, Outcome::Discard),

            _ if self.is_word(&expr.ty) => self.expr(scope, expr),

            _ => {
                self.locate(scope, expr);
            }
        }
    }

    /// Escribe un valor de cualquier tamaño en `dest`.
    pub(crate) fn assign_to(&mut self, scope: ScopeId, expr: &Expr, dest: &Place) {
        let size = expr.ty.size(&self.structs);

        match &expr.kind {
            ExprKind::InitStruct(items) => {
                self.zero(scope, dest, size);
                for item in items {
                    if let Some(field) = &item.field {
                        self.assign_to(scope, &item.value, &dest.field(field));
                    }
                }
            }

            _ if self.is_word(&expr.ty) => {
                self.expr(scope, expr);
                self.store(scope, dest, 0);
            }

            ExprKind::String(text) => {
                let label = self.string(text);
                emit!(self, Ldw, label);
                self.store(scope, dest, 0);
                emit!(self, Ldia, 0);
                self.store(scope, dest, 1);
            }

            ExprKind::CreatePointer { address, bank, .. } => {
                self.expr(scope, address);
                self.store(scope, dest, 0);
                self.set_a(*bank.val() as u16);
                self.store(scope, dest, 1);
            }

            ExprKind::StackAlloc { length, .. } => {
                let element = expr
                    .ty
                    .element()
                    .map_or(1, |element| element.size(&self.structs));

                self.expr(scope, length);
                if element != 1 {
                    self.set_b(element);
                    emit!(self, Mult);
                }

                let words = self.hold(scope, 1);
                self.write_a(words);

                let pointer = self.runtime.stack_alloc;
                emit!(self, Ain, pointer);
                self.store(scope, dest, 0);
                emit!(self, Ldia, 0);
                self.store(scope, dest, 1);

                emit!(self, Ain, pointer);
                self.read_b(words);
                emit!(self, Add);
                emit!(self, Sta, pointer);
            }

            ExprKind::Cast { value, .. } => self.assign_to(scope, value, dest),

            ExprKind::Call(call) => self.call(scope, call, Outcome::Into(*dest)),

            ExprKind::Assign { target, value } => {
                if let Some(place) = self.assign(scope, target, value, false) {
                    self.copy(scope, &place, dest, size);
                }
            }

            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => self.ternary(scope, condition, then, otherwise, Some(dest)),

            ExprKind::Switch {
                value,
                arms,
                default,
            } => self.switch(scope, value, arms, default.as_deref(), Some(dest)),

            _ => {
                let from = self.locate(scope, expr);
                self.copy(scope, &from, dest, size);
            }
        }
    }

    /// Valor de una palabra hacia A, o de cualquier tamaño hacia `dest`.
    fn produce(&mut self, scope: ScopeId, expr: &Expr, dest: Option<&Place>) {
        match dest {
            Some(dest) => self.assign_to(scope, expr, dest),
            None => self.expr(scope, expr),
        }
    }

    /// Asignación, devolviendo el lugar escrito.
    ///
    /// Con `needed`, una asignación de una palabra deja el valor en A.
    fn assign(&mut self, scope: ScopeId, target: &Expr, value: &Expr, needed: bool) -> Option<Place> {
        if let ExprKind::Identifier {
            binding: Binding::Variable(variable),
            ..
        } = &target.kind
        {
            if self.variables[*variable].removed {
                match needed {
                    true => self.expr(scope, value),
                    false => self.effect(scope, value),
                }

                return None;
            }
        }

        let place = self.locate(scope, target);
        if self.is_word(&target.ty) {
            self.expr(scope, value);

            let kept = self.store(scope, &place, 0);
            if needed && !kept {
                self.load(&place, 0);
            }
        } else {
            self.assign_to(scope, value, &place);
        }

        Some(place)
    }

    fn update(&mut self, scope: ScopeId, target: &Expr, increment: bool, prefix: bool, needed: bool) {
        let place = self.locate(scope, target);

        self.load(&place, 0);
        self.set_b(1);
        self.step(increment);

        let kept = self.store(scope, &place, 0);
        if !needed {
            return;
        }

        if !kept {
            self.load(&place, 0);
        }

        if !prefix {
            self.set_b(1);
            self.step(!increment);

            if let Some(bits) = place.bits() {
                self.set_b(bits.mask());
                emit!(self, And);
            }
        }
    }

    fn step(&mut self, increment: bool) {
        match increment {
            true => emit!(self, Add),
            false => emit!(self, Sub),
        }
    }

    fn arithmetic(&mut self, scope: ScopeId, op: BinaryOp, left: &Expr, right: &Expr) {
        self.operands(scope, left, right);

        match op {
            BinaryOp::Add => emit!(self, Add),
            BinaryOp::Sub => emit!(self, Sub),
            BinaryOp::Mul => emit!(self, Mult),
            BinaryOp::Div => emit!(self, Div),
            BinaryOp::And => emit!(self, And),
            BinaryOp::Or => emit!(self, Or),
            BinaryOp::Shl => emit!(self, Bsl),
            BinaryOp::Shr => emit!(self, Bsr),

            // a - (a / b) * b
            BinaryOp::Mod => {
                let dividend = self.hold(scope, 1);
                self.write_a(dividend);
                emit!(self, Div);
                emit!(self, Mult);
                emit!(self, Swp);
                self.read_a(dividend);
                emit!(self, Sub);
            }

            // (a | b) & ~(a & b)
            BinaryOp::Xor => {
                let left = self.hold(scope, 1);
                let nand = self.hold(scope, 1);

                self.write_a(left);
                emit!(self, And);
                emit!(self, Not);
                self.write_a(nand);
                self.read_a(left);
                emit!(self, Or);
                self.read_b(nand);
                emit!(self, And);
            }

            _ => (),
        }
    }

    /// Valor booleano de una condición.
    fn condition(&mut self, scope: ScopeId, expr: &Expr) {
        let yes = self.label("true");
        let no = self.label("false");
        let end = self.label("bool_end");

        self.branch(scope, expr, yes, no);

        self.code.mark(yes);
        emit!(self, Ldia, 1);
        emit!(self, Jmp, end);

        self.code.mark(no);
        emit!(self, Ldia, 0);
        self.code.mark(end);
    }

    /// Salta a `yes` o `no` según una condición.
    pub(crate) fn branch(&mut self, scope: ScopeId, expr: &Expr, yes: PointerId, no: PointerId) {
        if let Some(value) = self.evaluate(expr) {
            let target = if value != 0 { yes } else { no };
            emit!(self, Jmp, target);
            return;
        }

        match &expr.kind {
            ExprKind::Binary { op, left, right } if op.is_comparison() => {
                self.operands(scope, left, right);
                emit!(self, Sub);
                self.compare(*op, yes.into(), no.into());
            }

            ExprKind::Binary {
                op: BinaryOp::AndAlso,
                left,
                right,
            } => {
                let next = self.label("and");
                self.branch(scope, left, next, no);
                self.code.mark(next);
                self.branch(scope, right, yes, no);
            }

            ExprKind::Binary {
                op: BinaryOp::OrElse,
                left,
                right,
            } => {
                let next = self.label("or");
                self.branch(scope, left, yes, next);
                self.code.mark(next);
                self.branch(scope, right, yes, no);
            }

            ExprKind::Unary {
                op: UnaryOp::Negate,
                operand,
            } => self.branch(scope, operand, no, yes),

            _ => {
                self.expr(scope, expr);
                emit!(self, Ldib, 0);
                emit!(self, Sub);
                emit!(self, Jmpz, no);
                emit!(self, Jmp, yes);
            }
        }
    }

    /// Saltos tras `SUB` según una comparación sin signo.
    fn compare(&mut self, op: BinaryOp, yes: Operand, no: Operand) {
        match op {
            BinaryOp::Greater => {
                emit!(self, Jmpz, no);
                emit!(self, Jmpc, yes);
                emit!(self, Jmp, no);
            }

            BinaryOp::GreaterEqual => {
                emit!(self, Jmpz, yes);
                emit!(self, Jmpc, yes);
                emit!(self, Jmp, no);
            }

            BinaryOp::Less => {
                emit!(self, Jmpz, no);
                emit!(self, Jmpc, no);
                emit!(self, Jmp, yes);
            }

            BinaryOp::LessEqual => {
                emit!(self, Jmpz, yes);
                emit!(self, Jmpc, no);
                emit!(self, Jmp, yes);
            }

            BinaryOp::Equal => {
                emit!(self, Jmpz, yes);
                emit!(self, Jmp, no);
            }

            _ => {
                emit!(self, Jmpz, no);
                emit!(self, Jmp, yes);
            }
        }
    }

    fn ternary(
        &mut self,
        scope: ScopeId,
        condition: &Expr,
        then: &Expr,
        otherwise: &Expr,
        dest: Option<&Place>,
    ) {
        let yes = self.label("then");
        let no = self.label("else");
        let end = self.label("ternary_end");

        self.branch(scope, condition, yes, no);

        self.code.mark(yes);
        self.produce(scope, then, dest);
        emit!(self, Jmp, end);

        self.code.mark(no);
        self.produce(scope, otherwise, dest);
        self.code.mark(end);
    }

    fn switch(
        &mut self,
        scope: ScopeId,
        value: &Expr,
        arms: &[SwitchArm],
        default: Option<&Expr>,
        dest: Option<&Place>,
    ) {
        self.expr(scope, value);
        let scrutinee = self.hold(scope, 1);
        self.write_a(scrutinee);

        let end = self.label("switch_end");
        let cases: Vec<_> = arms.iter().map(|_| self.label("case")).collect();

        for (arm, case) in arms.iter().zip(&cases) {
            let pattern = self.evaluate(&arm.pattern).unwrap_or(0);

            self.read_a(scrutinee);
            self.set_b(pattern);
            emit!(self, Sub);
            emit!(self, Jmpz, *case);
        }

        match (default, dest) {
            (Some(default), _) => self.produce(scope, default, dest),
            (None, Some(dest)) => {
                let size = arms
                    .first()
                    .map_or(1, |arm| arm.value.ty.size(&self.structs));

                self.zero(scope, dest, size);
            }

            (None, None) => emit!(self, Ldia, 0),
        }

        emit!(self, Jmp, end);

        for (index, (arm, case)) in arms.iter().zip(&cases).enumerate() {
            self.code.mark(*case);
            self.produce(scope, &arm.value, dest);

            if index + 1 < arms.len() {
                emit!(self, Jmp, end);
            }
        }

        self.code.mark(end);
    }

    fn size_of(&self, operand: &Expr) -> u16 {
        let length = |text: &str| text.chars().count() as u16;

        match &operand.kind {
            ExprKind::String(text) => length(text),

            ExprKind::Identifier {
                name,
                binding: Binding::Unresolved,
            } => match self.structs.lookup(name) {
                Some(id) => self.structs.size(id),
                None => 1,
            },

            ExprKind::Identifier {
                binding: Binding::Variable(variable),
                ..
            } => {
                let variable = &self.variables[*variable];
                match &variable.initializer {
                    Some(Expr {
                        kind: ExprKind::String(text),
                        ..
                    }) if variable.unmodified => length(text),

                    _ => operand.ty.size(&self.structs),
                }
            }

            _ => operand.ty.size(&self.structs),
        }
    }

    fn function_value(&mut self, function: crate::driver::FunctionId) {
        self.request(function);

        let label = self.functions[function.index()].label;
        emit!(self, Ldw, label);
    }

    fn asm(&mut self, items: &[AsmItem]) {
        let mut labels = HashMap::new();
        for item in items {
            if let AsmItem::Label(name) = item {
                let label = self.label("asm");
                labels.insert(name.val().clone(), label);
            }
        }

        for item in items {
            match item {
                AsmItem::Label(name) => {
                    if let Some(label) = labels.get(name.val()) {
                        self.code.mark(*label);
                    }
                }

                AsmItem::Raw(argument) => {
                    let operand = self.asm_operand(&labels, argument.val());
                    self.code.emit_raw(operand);
                }

                AsmItem::Instruction {
                    mnemonic,
                    arguments,
                } => {
                    let operands: Vec<_> = arguments
                        .iter()
                        .map(|argument| self.asm_operand(&labels, argument.val()))
                        .collect();

                    let mnemonic: &str = mnemonic.val().as_ref();
                    if let Some(op) = BinaryOp::from_jump(mnemonic) {
                        let next = self.label("asm_next");
                        let target = operands.first().copied().unwrap_or(Operand::from(next));

                        emit!(self, Sub);
                        self.compare(op, target, next.into());
                        self.code.mark(next);
                        continue;
                    }

                    let opcode = match mnemonic.parse::<Opcode>() {
                        Ok(opcode) => opcode,
                        Err(()) => continue,
                    };

                    if opcode.form() == Form::Immediate {
                        self.check_reach(opcode, arguments);
                    }

                    match (opcode.form(), operands.as_slice()) {
                        (Form::BankedTrailing, [bank, word, ..]) => {
                            self.code.emit_long(opcode, *bank, *word)
                        }

                        (_, [operand, ..]) => self.code.emit(opcode, *operand),
                        (_, []) => self.code.emit(opcode, Operand::None),
                    }
                }
            }
        }
    }

    /// Rechaza variables que el campo inmediato no alcanza.
    fn check_reach(&mut self, opcode: Opcode, arguments: &[Located<AsmArgument>]) {
        for argument in arguments {
            if let AsmArgument::Variable(name, Some(variable)) = argument.val() {
                if !self.table.is_small(self.variables[*variable].cell) {
                    let error = CodegenError::OutOfReach {
                        variable: name.to_string(),
                        opcode,
                    };

                    self.diagnostics.error(argument.location().clone(), error);
                }
            }
        }
    }

    fn asm_operand(&self, labels: &HashMap<Identifier, PointerId>, argument: &AsmArgument) -> Operand {
        match argument {
            AsmArgument::Integer(value) => Operand::from(*value),
            AsmArgument::Variable(_, Some(variable)) => Operand::from(self.variables[*variable].cell),
            AsmArgument::Variable(_, None) => Operand::None,
            AsmArgument::Label(name) => labels.get(name).copied().map_or(Operand::None, Operand::from),
        }
    }
}
