//! Inicialización de expresiones.
//!
//! Cada expresión recibe su tipo y, si corresponde, su resolución:
//! variable o función de un identificador, campo de un acceso a
//! miembro, destino de una llamada. Los operadores y conversiones
//! sobrecargados se reescriben como llamadas, y las llamadas a
//! funciones `inline` se expanden aquí mismo.

use std::{collections::HashSet, mem, rc::Rc};

use crate::{
    arch::{Form, Opcode, MAX_DATA},
    ast::{
        AsmArgument, AsmItem, BinaryOp, Binding, Block, Call, CallTarget, Expr, ExprKind,
        FunctionName, Id, InlineSite, Namespace, StatementKind, UnaryOp,
    },
    driver::{Compiler, Function, FunctionId, Parameter},
    lex::Identifier,
    scope::{Pool, ScopeId, VariableId},
    source::{Located, Location},
    types::{Signature, Type},
};

use super::{located, Semantic, SemanticError};

/// Tipos que se comportan como una palabra entera.
pub(crate) fn is_scalar(ty: &Type) -> bool {
    ty.deref().is_integral() || matches!(ty.deref(), Type::Assembly)
}

/// Expresiones con dirección propia, aptas para `ref`.
fn is_place(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Identifier {
            binding: Binding::Variable(_),
            ..
        } => true,

        ExprKind::Member {
            object,
            resolved: Some(field),
            ..
        } => field.bits.is_none() && is_place(object),

        ExprKind::Index { .. } => true,
        _ => false,
    }
}

fn builtin_binary(op: BinaryOp, left: &Type, right: &Type) -> Option<Type> {
    if !is_scalar(left) || !is_scalar(right) {
        return None;
    }

    match op.is_comparison() || op.is_logical() {
        true => Some(Type::Boolean),
        false => Some(Type::Integer),
    }
}

fn take(expr: &mut Expr) -> Expr {
    let location = expr.location.clone();
    mem::replace(expr, Expr::new(location, ExprKind::Integer(0)))
}

impl Compiler<'_> {
    pub(crate) fn initialize_expr(
        &mut self,
        scope: ScopeId,
        expr: &mut Expr,
        expected: Option<&Type>,
    ) -> Semantic<()> {
        let location = expr.location.clone();
        expr.ty = self.initialize_kind(scope, &location, &mut expr.kind, expected)?;

        Ok(())
    }

    /// Inicializa una condición de `if`, `while`, `for` o ternario.
    pub(crate) fn initialize_condition(&mut self, scope: ScopeId, condition: &mut Expr) -> Semantic<()> {
        self.initialize_expr(scope, condition, Some(&Type::Boolean))?;
        if !is_scalar(&condition.ty) {
            let error = SemanticError::TypeMismatch {
                expected: String::from("bool"),
                found: self.type_name(&condition.ty),
            };

            return located(&condition.location, error);
        }

        Ok(())
    }

    fn initialize_kind(
        &mut self,
        scope: ScopeId,
        location: &Location,
        kind: &mut ExprKind,
        expected: Option<&Type>,
    ) -> Semantic<Type> {
        let ty = match kind {
            ExprKind::Integer(_) => Type::Integer,
            ExprKind::Boolean(_) => Type::Boolean,

            ExprKind::Char(c) if !c.is_ascii() => {
                return located(location, SemanticError::NonAsciiChar(*c))
            }

            ExprKind::Char(_) => Type::Char,

            ExprKind::String(text) => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return located(location, SemanticError::NonAsciiChar(c));
                }

                Type::Pointer(Box::new(Type::Char))
            }

            ExprKind::Identifier { name, binding } => {
                if let Some(variable) = self.scopes.lookup_variable(scope, name) {
                    self.check_capture(scope, variable, location)?;
                    *binding = Binding::Variable(variable);

                    return Ok(self.variables[variable].ty.deref().clone());
                }

                let name = name.clone();
                let function = self.resolve_function_value(scope, location, None, &name, expected)?;
                *binding = Binding::Function(function);

                Type::Function(Rc::new(self.functions[function.index()].signature()))
            }

            ExprKind::Binary { .. } => return self.initialize_binary(scope, location, kind),
            ExprKind::Cast { .. } => return self.initialize_cast(scope, location, kind),
            ExprKind::Member { .. } => return self.initialize_member(scope, location, kind, expected),
            ExprKind::Call(call) => return self.initialize_call(scope, location, call),

            ExprKind::Unary { op, operand } => {
                self.initialize_expr(scope, operand, None)?;
                if !is_scalar(&operand.ty) {
                    let symbol = match op {
                        UnaryOp::Minus => "-",
                        UnaryOp::Not => "~",
                        UnaryOp::Negate => "!",
                    };

                    let error = SemanticError::InvalidUnary {
                        op: symbol,
                        operand: self.type_name(&operand.ty),
                    };

                    return located(location, error);
                }

                match op {
                    UnaryOp::Negate => Type::Boolean,
                    _ => Type::Integer,
                }
            }

            ExprKind::Assign { target, value } => {
                self.initialize_expr(scope, target, None)?;
                self.assignable(target)?;

                let ty = target.ty.clone();
                self.initialize_expr(scope, value, Some(&ty))?;
                self.expect_type(&ty, value);

                ty
            }

            ExprKind::Update { target, .. } => {
                self.initialize_expr(scope, target, None)?;
                self.assignable(target)?;
                self.expect_type(&Type::Integer, target);

                target.ty.clone()
            }

            ExprKind::Ternary {
                condition,
                then,
                otherwise,
            } => {
                self.initialize_condition(scope, condition)?;
                self.initialize_expr(scope, then, expected)?;

                let ty = match (&then.ty, expected) {
                    (Type::Unknown, Some(expected)) => expected.clone(),
                    (ty, _) => ty.clone(),
                };

                self.initialize_expr(scope, otherwise, Some(&ty))?;
                self.expect_type(&ty, otherwise);

                ty
            }

            ExprKind::Switch {
                value,
                arms,
                default,
            } => {
                self.initialize_expr(scope, value, None)?;
                self.expect_type(&Type::Integer, value);

                let mut result: Option<Type> = None;
                for arm in arms.iter_mut() {
                    self.initialize_expr(scope, &mut arm.pattern, Some(&Type::Integer))?;
                    if self.evaluate(&arm.pattern).is_none() {
                        return located(&arm.pattern.location, SemanticError::NonConstantPattern);
                    }

                    let expected = result.as_ref().or(expected).cloned();
                    self.initialize_expr(scope, &mut arm.value, expected.as_ref())?;
                    match &result {
                        Some(ty) => self.expect_type(ty, &arm.value),
                        None => result = Some(arm.value.ty.clone()),
                    }
                }

                if let Some(default) = default {
                    let expected = result.as_ref().or(expected).cloned();
                    self.initialize_expr(scope, default, expected.as_ref())?;
                    match &result {
                        Some(ty) => self.expect_type(ty, default),
                        None => result = Some(default.ty.clone()),
                    }
                }

                result.unwrap_or(Type::Integer)
            }

            ExprKind::Index { array, index } => {
                self.initialize_expr(scope, array, None)?;
                self.initialize_expr(scope, index, Some(&Type::Integer))?;
                self.expect_type(&Type::Integer, index);

                match array.ty.deref() {
                    Type::Unknown => Type::Unknown,
                    Type::Pointer(element) => (**element).clone(),
                    other => {
                        let error = SemanticError::NotIndexable(self.type_name(other));
                        return located(location, error);
                    }
                }
            }

            // Las referencias válidas se inicializan como argumentos
            ExprKind::Reference(_) => return located(location, SemanticError::MisplacedReference),

            ExprKind::CreatePointer {
                address,
                bank,
                element,
            } => {
                if *bank.val() > u32::from(MAX_DATA) {
                    let error = SemanticError::InvalidBank(*bank.val());
                    return located(bank.location(), error);
                }

                self.initialize_expr(scope, address, Some(&Type::Integer))?;
                self.expect_type(&Type::Integer, address);

                let element = match element {
                    Some(name) => self.resolve_type(name),
                    None => expected
                        .and_then(Type::element)
                        .cloned()
                        .unwrap_or(Type::Integer),
                };

                Type::Pointer(Box::new(element))
            }

            ExprKind::SizeOf(operand) => {
                let names_struct = match &operand.kind {
                    ExprKind::Identifier { name, .. } => {
                        self.scopes.lookup_variable(scope, name).is_none()
                            && self.structs.lookup(name).is_some()
                    }

                    _ => false,
                };

                if !names_struct {
                    self.initialize_expr(scope, operand, None)?;
                }

                Type::Integer
            }

            ExprKind::StackAlloc { element, length } => {
                let element = self.resolve_type(element);
                self.initialize_expr(scope, length, Some(&Type::Integer))?;
                self.expect_type(&Type::Integer, length);

                if let Some(owner) = self.scopes.frame_owner(scope) {
                    if self.functions[owner.index()].stack_alloc.is_none() {
                        let cell = self
                            .scopes
                            .temporary(scope, 1, &mut self.storage, &mut self.table);

                        self.functions[owner.index()].stack_alloc = Some(cell);
                    }
                }

                Type::Pointer(Box::new(element))
            }

            ExprKind::InitStruct(items) => {
                let id = match expected.map(Type::deref) {
                    Some(Type::Struct(id)) => *id,
                    Some(Type::Unknown) => {
                        for item in items.iter_mut() {
                            self.initialize_expr(scope, &mut item.value, None)?;
                        }

                        return Ok(Type::Unknown);
                    }

                    _ => {
                        let error = SemanticError::CannotInfer(String::from("struct initializer"));
                        return located(location, error);
                    }
                };

                let fields = self.structs.fields(id).to_vec();
                for (position, item) in items.iter_mut().enumerate() {
                    let field = match &item.name {
                        Some(name) => fields.iter().find(|field| &field.name == name.val()),
                        None => fields.get(position),
                    };

                    let field = match field {
                        Some(field) => field.clone(),
                        None => {
                            let name = match &item.name {
                                Some(name) => name.val().to_string(),
                                None => format!("#{}", position),
                            };

                            let error = SemanticError::UnknownField(
                                self.structs.name(id).to_string(),
                                name,
                            );

                            return located(&item.value.location, error);
                        }
                    };

                    self.initialize_expr(scope, &mut item.value, Some(&field.ty))?;
                    self.expect_type(&field.ty, &item.value);
                    item.field = Some(field);
                }

                Type::Struct(id)
            }

            ExprKind::Arrow(arrow) => {
                let signature = match expected.map(Type::deref) {
                    Some(Type::Function(signature)) => Rc::clone(signature),
                    _ => {
                        let error = SemanticError::CannotInfer(String::from("arrow function"));
                        return located(location, error);
                    }
                };

                if arrow.parameters.len() != signature.parameters.len() {
                    let error = SemanticError::ArrowParameters {
                        expected: signature.parameters.len(),
                        found: arrow.parameters.len(),
                    };

                    return located(location, error);
                }

                let empty = Block {
                    location: location.clone(),
                    statements: Vec::new(),
                    scope: None,
                };

                let mut body = mem::replace(&mut arrow.body, empty);
                if arrow.expression_body && signature.ret.is_void() {
                    for statement in &mut body.statements {
                        if let StatementKind::Return(value) = &mut statement.kind {
                            if let Some(value) = value.take() {
                                statement.kind = StatementKind::Expression(value);
                            }
                        }
                    }
                }

                let function = self.lambda(scope, location, &arrow.parameters, &signature);
                arrow.function = Some(function);
                self.initialize_body(function, body);

                Type::Function(signature)
            }

            ExprKind::Asm(items) => {
                self.initialize_asm(scope, items)?;
                Type::Assembly
            }
        };

        Ok(ty)
    }

    fn initialize_binary(
        &mut self,
        scope: ScopeId,
        location: &Location,
        kind: &mut ExprKind,
    ) -> Semantic<Type> {
        let (op, left, right) = match kind {
            ExprKind::Binary { op, left, right } => (*op, left, right),
            _ => return Ok(Type::Unknown),
        };

        self.initialize_expr(scope, left, None)?;
        self.initialize_expr(scope, right, None)?;

        if let Some(ty) = builtin_binary(op, &left.ty, &right.ty) {
            return Ok(ty);
        }

        match self.find_operator(scope, op, &left.ty, &right.ty) {
            Some(function) => {
                let arguments = vec![take(left), take(right)];
                let (call, ty) = self.overload_call(scope, function, arguments, location)?;
                *kind = call;

                Ok(ty)
            }

            None => {
                let error = SemanticError::InvalidOperator {
                    op,
                    left: self.type_name(&left.ty),
                    right: self.type_name(&right.ty),
                };

                located(location, error)
            }
        }
    }

    fn initialize_cast(
        &mut self,
        scope: ScopeId,
        location: &Location,
        kind: &mut ExprKind,
    ) -> Semantic<Type> {
        let (target, value) = match kind {
            ExprKind::Cast { target, value } => (target, value),
            _ => return Ok(Type::Unknown),
        };

        let to = self.resolve_type(target);
        self.initialize_expr(scope, value, None)?;

        let from = value.ty.deref().clone();
        let builtin = match (&from, &to) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Pointer(_), Type::Pointer(_)) => true,
            (from, to) if is_scalar(from) && to.is_integral() => true,
            (from, to) => from == to,
        };

        if builtin {
            return Ok(to);
        }

        match self.find_cast(scope, &from, &to) {
            Some(function) => {
                let arguments = vec![take(value)];
                let (call, ty) = self.overload_call(scope, function, arguments, location)?;
                *kind = call;

                Ok(ty)
            }

            None => {
                let error = SemanticError::InvalidCast {
                    from: self.type_name(&from),
                    to: self.type_name(&to),
                };

                located(location, error)
            }
        }
    }

    fn initialize_member(
        &mut self,
        scope: ScopeId,
        location: &Location,
        kind: &mut ExprKind,
        expected: Option<&Type>,
    ) -> Semantic<Type> {
        let (object, field, resolved) = match kind {
            ExprKind::Member {
                object,
                field,
                resolved,
            } => (object, field, resolved),

            _ => return Ok(Type::Unknown),
        };

        // `a.b.f` como valor función
        if let Some(path) = self.namespace_path(scope, object) {
            let qualifier = Namespace(path);
            let name = field.val().clone();

            let candidates =
                self.lookup_functions(scope, Some(&qualifier), &FunctionName::Identifier(name.clone()));

            if candidates.is_empty() {
                let root = qualifier.0[0].clone();
                return located(&object.location, SemanticError::UndefinedVariable(root));
            }

            let function = self.resolve_function_value(scope, location, Some(&qualifier), &name, expected)?;
            let ty = Type::Function(Rc::new(self.functions[function.index()].signature()));

            *kind = ExprKind::Identifier {
                name,
                binding: Binding::Function(function),
            };

            return Ok(ty);
        }

        self.initialize_expr(scope, object, None)?;
        match object.ty.deref() {
            Type::Unknown => Ok(Type::Unknown),
            Type::Struct(id) => match self.structs.field(*id, field.val().as_ref()) {
                Some(found) => {
                    let ty = found.ty.clone();
                    *resolved = Some(found.clone());
                    Ok(ty)
                }

                None => {
                    let error = SemanticError::UnknownField(
                        self.structs.name(*id).to_string(),
                        field.val().to_string(),
                    );

                    located(field.location(), error)
                }
            },

            other => {
                let error = SemanticError::UnknownField(self.type_name(other), field.val().to_string());
                located(field.location(), error)
            }
        }
    }

    fn initialize_call(&mut self, scope: ScopeId, location: &Location, call: &mut Call) -> Semantic<Type> {
        let (qualifier, name) = match self.callee_path(scope, &call.callee) {
            Some(path) => path,
            None => return self.initialize_value_call(scope, location, call),
        };

        let name = FunctionName::Identifier(name);
        let named = self.lookup_functions(scope, qualifier.as_ref(), &name);

        if named.is_empty() {
            let display = match (&qualifier, &name) {
                (Some(qualifier), FunctionName::Identifier(name)) => format!("{}.{}", qualifier, name),
                (None, FunctionName::Identifier(name)) => name.to_string(),
                _ => String::new(),
            };

            return located(location, SemanticError::UndefinedFunction(display));
        }

        let count = call.arguments.len();
        let fitting: Vec<FunctionId> = named
            .iter()
            .copied()
            .filter(|function| {
                let function = &self.functions[function.index()];
                function.required() <= count && count <= function.parameters.len()
            })
            .collect();

        let function = match fitting.as_slice() {
            [function] => {
                let parameters = self.functions[function.index()].parameters.clone();
                for (argument, parameter) in call.arguments.iter_mut().zip(&parameters) {
                    self.initialize_argument(scope, argument, Some(&parameter.ty))?;
                }

                *function
            }

            _ => {
                for argument in call.arguments.iter_mut() {
                    self.initialize_argument(scope, argument, None)?;
                }

                let arguments = &call.arguments;
                let accepted = fitting.iter().copied().find(|function| {
                    self.functions[function.index()]
                        .parameters
                        .iter()
                        .zip(arguments)
                        .all(|(parameter, argument)| parameter.storage_type().accepts(&argument.ty))
                });

                match (accepted, named.as_slice()) {
                    (Some(function), _) => function,

                    // La única candidata reporta la cantidad de argumentos
                    (None, [function]) => *function,

                    (None, _) => {
                        let display = self.function_name(named[0]).to_owned();
                        return located(location, SemanticError::NoOverload(display));
                    }
                }
            }
        };

        let signature = self.functions[function.index()].signature();
        call.callee.ty = Type::Function(Rc::new(signature));
        if let ExprKind::Identifier { binding, .. } = &mut call.callee.kind {
            *binding = Binding::Function(function);
        }

        call.target = self.bind_call(scope, function, &mut call.arguments, location)?;
        Ok(self.functions[function.index()].ret.clone())
    }

    /// Llamada a través de un valor de tipo función.
    fn initialize_value_call(
        &mut self,
        scope: ScopeId,
        location: &Location,
        call: &mut Call,
    ) -> Semantic<Type> {
        self.initialize_expr(scope, &mut call.callee, None)?;

        let signature = match &call.callee.ty {
            Type::Unknown => {
                for argument in call.arguments.iter_mut() {
                    self.initialize_argument(scope, argument, None)?;
                }

                return Ok(Type::Unknown);
            }

            ty => match ty.signature() {
                Some(signature) => signature.clone(),
                None => {
                    let error = SemanticError::NotCallable(self.type_name(ty));
                    return located(location, error);
                }
            },
        };

        if call.arguments.len() != signature.parameters.len() {
            let error = SemanticError::ArgumentCount {
                name: self.type_name(&call.callee.ty),
                expected: signature.parameters.len(),
                found: call.arguments.len(),
            };

            return located(location, error);
        }

        for (argument, parameter) in call.arguments.iter_mut().zip(&signature.parameters) {
            self.initialize_argument(scope, argument, Some(parameter.deref()))?;
            self.check_argument(parameter, argument)?;
        }

        call.target = CallTarget::Value;
        Ok(signature.ret.clone())
    }

    fn initialize_argument(
        &mut self,
        scope: ScopeId,
        argument: &mut Expr,
        expected: Option<&Type>,
    ) -> Semantic<()> {
        if !matches!(argument.kind, ExprKind::Reference(_)) {
            return self.initialize_expr(scope, argument, expected);
        }

        let target = match &mut argument.kind {
            ExprKind::Reference(target) => target,
            _ => return Ok(()),
        };

        self.initialize_expr(scope, target, expected)?;
        if !is_place(target) {
            return located(&target.location, SemanticError::ReferenceTarget);
        }

        if let ExprKind::Identifier {
            name,
            binding: Binding::Variable(variable),
        } = &target.kind
        {
            if let Type::Reference(_) = self.variables[*variable].ty {
                let message = format!("Variable '{}' is already a reference", name);
                self.diagnostics.warning(target.location.clone(), message);
            }
        }

        self.mark_referenced(target)?;
        argument.ty = Type::Reference(Box::new(target.ty.clone()));

        Ok(())
    }

    /// Ajusta un argumento ya inicializado al tipo de su parámetro.
    ///
    /// Los lugares pasados a parámetros `ref` se envuelven en una
    /// referencia implícita.
    fn check_argument(&mut self, parameter: &Type, argument: &mut Expr) -> Semantic<()> {
        let explicit = matches!(argument.kind, ExprKind::Reference(_));

        match parameter {
            Type::Reference(_) if !explicit => {
                if !is_place(argument) {
                    return located(&argument.location, SemanticError::ReferenceTarget);
                }

                self.mark_referenced(argument)?;

                let target = take(argument);
                argument.ty = Type::Reference(Box::new(target.ty.clone()));
                argument.kind = ExprKind::Reference(Box::new(target));
            }

            Type::Reference(_) => (),
            _ if explicit => return located(&argument.location, SemanticError::MisplacedReference),
            _ => (),
        }

        self.expect_type(parameter, argument);
        Ok(())
    }

    fn mark_referenced(&mut self, target: &Expr) -> Semantic<()> {
        match &target.kind {
            ExprKind::Identifier {
                name,
                binding: Binding::Variable(variable),
            } => {
                let variable = &mut self.variables[*variable];
                if variable.constant {
                    let error = SemanticError::ConstantAssignment(name.clone());
                    return located(&target.location, error);
                }

                variable.referenced = true;
                variable.unmodified = false;
                Ok(())
            }

            ExprKind::Member { object, .. } => self.mark_referenced(object),
            _ => Ok(()),
        }
    }

    /// Completa argumentos por defecto, verifica tipos y resuelve el destino.
    fn bind_call(
        &mut self,
        scope: ScopeId,
        function: FunctionId,
        arguments: &mut Vec<Expr>,
        location: &Location,
    ) -> Semantic<CallTarget> {
        let parameters = self.functions[function.index()].parameters.clone();
        let declaring = self.functions[function.index()].declaring;

        let found = arguments.len();
        let count_error = |compiler: &Self, expected: usize| {
            let error = SemanticError::ArgumentCount {
                name: compiler.function_name(function).to_owned(),
                expected,
                found,
            };

            located(location, error)
        };

        if arguments.len() > parameters.len() {
            return count_error(self, parameters.len());
        }

        for parameter in &parameters[arguments.len()..] {
            let mut default = match &parameter.default {
                Some(default) => default.clone(),
                None => return count_error(self, self.functions[function.index()].required()),
            };

            self.initialize_expr(declaring, &mut default, Some(&parameter.ty))?;
            arguments.push(default);
        }

        for (parameter, argument) in parameters.iter().zip(arguments.iter_mut()) {
            self.check_argument(&parameter.storage_type(), argument)?;
        }

        self.functions[function.index()].references += 1;
        match self.functions[function.index()].inline {
            true => self.expand_inline(scope, function, location),
            false => Ok(CallTarget::Function(function)),
        }
    }

    /// Copia e inicializa el cuerpo de una función `inline` en el sitio.
    fn expand_inline(
        &mut self,
        scope: ScopeId,
        function: FunctionId,
        location: &Location,
    ) -> Semantic<CallTarget> {
        if self.init.inlining.contains(&function) {
            let error = SemanticError::RecursiveInline(self.function_name(function).to_owned());
            return located(location, error);
        }

        let declaring = self.functions[function.index()].declaring;
        let site = self.scopes.inline(declaring, scope, function);

        let mut body = match &self.functions[function.index()].body {
            Some(body) => body.clone(),
            None => Block {
                location: location.clone(),
                statements: Vec::new(),
                scope: None,
            },
        };

        body.scope = Some(site);
        let parameters = self.define_parameters(site, function);

        self.init.inlining.push(function);
        self.declare_items(site, &mut body.statements);
        self.initialize_statements(site, &mut body.statements);
        self.init.inlining.pop();

        Ok(CallTarget::Inline(Box::new(InlineSite {
            function,
            scope: site,
            parameters,
            body,
        })))
    }

    /// Llamada implícita a un operador o conversión sobrecargados.
    fn overload_call(
        &mut self,
        scope: ScopeId,
        function: FunctionId,
        mut arguments: Vec<Expr>,
        location: &Location,
    ) -> Semantic<(ExprKind, Type)> {
        let target = self.bind_call(scope, function, &mut arguments, location)?;

        let declared = &self.functions[function.index()];
        let callee = Expr {
            location: location.clone(),
            kind: ExprKind::Identifier {
                name: Identifier::from(declared.display.as_str()),
                binding: Binding::Function(function),
            },
            ty: Type::Function(Rc::new(declared.signature())),
        };

        let call = Call {
            callee,
            arguments,
            target,
        };

        Ok((ExprKind::Call(Box::new(call)), declared.ret.clone()))
    }

    /// Crea la función de una expresión flecha.
    fn lambda(
        &mut self,
        scope: ScopeId,
        location: &Location,
        names: &[Id],
        signature: &Signature,
    ) -> FunctionId {
        let id = FunctionId::new(self.functions.len());
        let display = format!("lambda_{}", id.index());

        let parameters = names
            .iter()
            .zip(&signature.parameters)
            .map(|(name, ty)| Parameter {
                name: name.val().clone(),
                location: name.location().clone(),
                ty: ty.deref().clone(),
                reference: matches!(ty, Type::Reference(_)),
                default: None,
                variable: None,
            })
            .collect();

        let label = self.table.label(display.clone());
        self.functions.push(Function {
            name: FunctionName::Identifier(Identifier::from(display.as_str())),
            display,
            location: location.clone(),
            namespace: self.scopes[scope].namespace().clone(),
            label,
            ret: signature.ret.clone(),
            parameters,
            inline: false,
            declaring: scope,
            scope: None,
            body: None,
            references: 1,
            stack_alloc: None,
            code: None,
        });

        id
    }

    /// Nombre de función de un callee: identificador o ruta calificada.
    fn callee_path(&self, scope: ScopeId, callee: &Expr) -> Option<(Option<Namespace>, Identifier)> {
        match &callee.kind {
            ExprKind::Identifier { name, .. } if self.scopes.lookup_variable(scope, name).is_none() => {
                Some((None, name.clone()))
            }

            ExprKind::Member { object, field, .. } => {
                let path = self.namespace_path(scope, object)?;
                Some((Some(Namespace(path)), field.val().clone()))
            }

            _ => None,
        }
    }

    /// Ruta `a.b.c` cuya raíz no es una variable.
    fn namespace_path(&self, scope: ScopeId, expr: &Expr) -> Option<Vec<Identifier>> {
        match &expr.kind {
            ExprKind::Identifier { name, .. } if self.scopes.lookup_variable(scope, name).is_none() => {
                Some(vec![name.clone()])
            }

            ExprKind::Member { object, field, .. } => {
                let mut path = self.namespace_path(scope, object)?;
                path.push(field.val().clone());
                Some(path)
            }

            _ => None,
        }
    }

    /// Funciones visibles desde `scope` con el nombre dado.
    fn lookup_functions(
        &self,
        scope: ScopeId,
        qualifier: Option<&Namespace>,
        name: &FunctionName,
    ) -> Vec<FunctionId> {
        let current = self.scopes[scope].namespace();
        let uses = self.scopes[scope].uses();

        self.functions
            .iter()
            .enumerate()
            .filter(|(_, function)| &function.name == name)
            .filter(|(_, function)| {
                let declaring = function.declaring;
                self.scopes.function_of(declaring).is_none()
                    || self.scopes.encloses(declaring, scope)
            })
            .filter(|(_, function)| {
                let namespace = &function.namespace;
                match qualifier {
                    None => namespace.is_prefix_of(current) || uses.contains(namespace),
                    Some(qualifier) => {
                        *namespace == *qualifier
                            || *namespace == current.join(qualifier)
                            || uses.iter().any(|used| *namespace == used.join(qualifier))
                    }
                }
            })
            .map(|(index, _)| FunctionId::new(index))
            .collect()
    }

    /// Resuelve una función usada como valor.
    fn resolve_function_value(
        &mut self,
        scope: ScopeId,
        location: &Location,
        qualifier: Option<&Namespace>,
        name: &Identifier,
        expected: Option<&Type>,
    ) -> Semantic<FunctionId> {
        let candidates = self.lookup_functions(scope, qualifier, &FunctionName::Identifier(name.clone()));

        let function = match candidates.as_slice() {
            [] => return located(location, SemanticError::UndefinedVariable(name.clone())),
            [function] => *function,
            many => {
                let wanted = expected.and_then(Type::signature);
                let found = many
                    .iter()
                    .copied()
                    .find(|function| Some(&self.functions[function.index()].signature()) == wanted);

                match found {
                    Some(function) => function,
                    None => return located(location, SemanticError::NoOverload(name.to_string())),
                }
            }
        };

        if self.functions[function.index()].inline {
            let error = SemanticError::InlineValue(self.function_name(function).to_owned());
            return located(location, error);
        }

        self.functions[function.index()].references += 1;
        Ok(function)
    }

    fn find_operator(&self, scope: ScopeId, op: BinaryOp, left: &Type, right: &Type) -> Option<FunctionId> {
        self.lookup_functions(scope, None, &FunctionName::Operator(op))
            .into_iter()
            .find(|function| match self.functions[function.index()].parameters.as_slice() {
                [a, b] => a.storage_type().accepts(left) && b.storage_type().accepts(right),
                _ => false,
            })
    }

    fn find_cast(&self, scope: ScopeId, from: &Type, to: &Type) -> Option<FunctionId> {
        self.lookup_functions(scope, None, &FunctionName::Cast)
            .into_iter()
            .find(|function| {
                let function = &self.functions[function.index()];
                match function.parameters.as_slice() {
                    [parameter] => function.ret == *to && parameter.storage_type().accepts(from),
                    _ => false,
                }
            })
    }

    fn check_capture(&self, scope: ScopeId, variable: VariableId, location: &Location) -> Semantic<()> {
        let variable = &self.variables[variable];
        if variable.pool == Pool::Stack && variable.root != self.scopes.root(scope) {
            return located(location, SemanticError::Capture(variable.name.clone()));
        }

        Ok(())
    }

    /// Marca una escritura, rechazando constantes y expresiones sin dirección.
    fn assignable(&mut self, target: &Expr) -> Semantic<()> {
        match &target.kind {
            ExprKind::Identifier {
                name,
                binding: Binding::Variable(variable),
            } => {
                let variable = &mut self.variables[*variable];
                if variable.constant {
                    let error = SemanticError::ConstantAssignment(name.clone());
                    return located(&target.location, error);
                }

                variable.unmodified = false;
                Ok(())
            }

            ExprKind::Member { object, .. } => match object.kind {
                ExprKind::Index { .. } => Ok(()),
                _ => self.assignable(object),
            },

            ExprKind::Index { .. } => Ok(()),
            _ if target.ty == Type::Unknown => Ok(()),
            _ => located(&target.location, SemanticError::NotAssignable),
        }
    }

    fn initialize_asm(&mut self, scope: ScopeId, items: &mut [AsmItem]) -> Semantic<()> {
        let labels: HashSet<Identifier> = items
            .iter()
            .filter_map(|item| match item {
                AsmItem::Label(name) => Some(name.val().clone()),
                _ => None,
            })
            .collect();

        for item in items.iter_mut() {
            match item {
                AsmItem::Label(_) => (),
                AsmItem::Raw(argument) => {
                    self.initialize_asm_argument(scope, argument, &labels)?;
                    check_word(argument)?;
                }

                AsmItem::Instruction {
                    mnemonic,
                    arguments,
                } => {
                    let count = arguments.len();
                    let form = match BinaryOp::from_jump(mnemonic.val().as_ref()) {
                        Some(_) => Form::Trailing,
                        None => match mnemonic.val().as_ref().parse::<Opcode>() {
                            Ok(opcode) => opcode.form(),
                            Err(()) => {
                                let error = SemanticError::UnknownInstruction(mnemonic.val().clone());
                                return located(mnemonic.location(), error);
                            }
                        },
                    };

                    let (fits, expected) = match form {
                        Form::Implied => (count == 0, "no operands"),
                        Form::Immediate | Form::Trailing => (count == 1, "1 operand"),
                        Form::BankedTrailing => ((1..=2).contains(&count), "1 or 2 operands"),
                    };

                    if !fits {
                        let error = SemanticError::AsmOperands {
                            mnemonic: mnemonic.val().clone(),
                            expected,
                        };

                        return located(mnemonic.location(), error);
                    }

                    for argument in arguments.iter_mut() {
                        self.initialize_asm_argument(scope, argument, &labels)?;
                    }

                    match (form, arguments.as_slice()) {
                        (Form::Immediate, [argument]) | (Form::BankedTrailing, [argument, _]) => {
                            check_immediate(mnemonic, argument)?
                        }

                        (_, [.., word]) => check_word(word)?,
                        _ => (),
                    }
                }
            }
        }

        Ok(())
    }

    fn initialize_asm_argument(
        &mut self,
        scope: ScopeId,
        argument: &mut Located<AsmArgument>,
        labels: &HashSet<Identifier>,
    ) -> Semantic<()> {
        let location = argument.location().clone();

        match argument.as_mut() {
            AsmArgument::Integer(_) => Ok(()),
            AsmArgument::Label(name) if labels.contains(&*name) => Ok(()),
            AsmArgument::Label(name) => {
                located(&location, SemanticError::UndefinedLabel(name.clone()))
            }

            AsmArgument::Variable(name, resolved) => {
                let variable = match self.scopes.lookup_variable(scope, name) {
                    Some(variable) => variable,
                    None => return located(&location, SemanticError::UndefinedVariable(name.clone())),
                };

                self.check_capture(scope, variable, &location)?;

                // El bloque puede leer y escribir la celda libremente
                let cell = &mut self.variables[variable];
                cell.referenced = true;
                cell.unmodified = false;

                *resolved = Some(variable);
                Ok(())
            }
        }
    }
}

fn check_immediate(mnemonic: &Id, argument: &Located<AsmArgument>) -> Semantic<()> {
    match argument.val() {
        AsmArgument::Integer(value) if !(0..=i32::from(MAX_DATA)).contains(value) => {
            located(argument.location(), SemanticError::AsmRange(*value))
        }

        AsmArgument::Label(_) => {
            let error = SemanticError::AsmOperands {
                mnemonic: mnemonic.val().clone(),
                expected: "an immediate operand",
            };

            located(argument.location(), error)
        }

        _ => Ok(()),
    }
}

fn check_word(argument: &Located<AsmArgument>) -> Semantic<()> {
    match argument.val() {
        AsmArgument::Integer(value) if !(-0x8000..=0xFFFF).contains(value) => {
            located(argument.location(), SemanticError::AsmRange(*value))
        }

        _ => Ok(()),
    }
}
