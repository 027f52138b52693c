//! Declaración e inicialización.
//!
//! La declaración recorre el programa en tres etapas: primero carga
//! los imports y registra structs, luego dispone los structs y por
//! último registra funciones, etiquetas y namespaces. Cada bloque
//! anidado repite la última etapa al inicializarse, de manera que las
//! funciones y etiquetas de un bloque son visibles desde cualquier
//! punto del mismo.
//!
//! La inicialización resuelve identificadores, asigna celdas a las
//! variables, verifica tipos y expande las llamadas `inline`. Los
//! errores se registran como diagnósticos y la pasada continúa con la
//! siguiente sentencia.

use std::mem;

use log::debug;
use thiserror::Error;

use crate::{
    ast::{
        BinaryOp, Block, Expr, ExprKind, FunctionDeclaration, FunctionName, Id, Program,
        Statement, StatementKind, TypeName,
    },
    driver::{Compiler, Function, FunctionId, Parameter, RETURN_WORDS},
    lex::Identifier,
    scope::{ScopeId, ScopeKind, Variable, VariableId},
    source::{Located, Location},
    types::Type,
};

mod expr;

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Variable '{0}' could not be found")]
    UndefinedVariable(Identifier),

    #[error("Function '{0}' could not be found")]
    UndefinedFunction(String),

    #[error("Label '{0}' could not be found")]
    UndefinedLabel(Identifier),

    #[error("Variable '{0}' is already declared in this scope")]
    DuplicateVariable(Identifier),

    #[error("Label '{0}' is already declared")]
    DuplicateLabel(Identifier),

    #[error("Function '{0}' is already declared with the same parameters")]
    DuplicateFunction(String),

    #[error("Cannot convert type '{found}' to '{expected}'")]
    TypeMismatch { expected: String, found: String },

    #[error("Function '{name}' expects {expected} arguments, found {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("No overload of '{0}' accepts the given arguments")]
    NoOverload(String),

    #[error("Expression of type '{0}' cannot be called")]
    NotCallable(String),

    #[error("Expression cannot be assigned to")]
    NotAssignable,

    #[error("Cannot assign to constant '{0}'")]
    ConstantAssignment(Identifier),

    #[error("Type '{0}' has no field '{1}'")]
    UnknownField(String, String),

    #[error("Type '{0}' cannot be indexed")]
    NotIndexable(String),

    #[error("Operator '{op}' is not defined for '{left}' and '{right}'")]
    InvalidOperator {
        op: BinaryOp,
        left: String,
        right: String,
    },

    #[error("Operator '{op}' is not defined for '{operand}'")]
    InvalidUnary { op: &'static str, operand: String },

    #[error("Cannot cast '{from}' to '{to}'")]
    InvalidCast { from: String, to: String },

    #[error("Break statement outside of a loop")]
    BreakOutsideLoop,

    #[error("Continue statement outside of a loop")]
    ContinueOutsideLoop,

    #[error("Function '{0}' must return a value")]
    MissingReturnValue(String),

    #[error("Function '{0}' does not return a value")]
    UnexpectedReturnValue(String),

    #[error("Type '{0}' does not fit in the return area")]
    ReturnTooLarge(String),

    #[error("Variable '{0}' belongs to another function and cannot be captured")]
    Capture(Identifier),

    #[error("Inline function '{0}' cannot call itself")]
    RecursiveInline(String),

    #[error("Circular import of '{0}'")]
    CircularImport(String),

    #[error("Could not import '{path}': {message}")]
    Import { path: String, message: String },

    #[error("Switch patterns must be constant")]
    NonConstantPattern,

    #[error("Bank {0} is out of range, the maximum is 1023")]
    InvalidBank(u32),

    #[error("Unknown instruction '{0}'")]
    UnknownInstruction(Identifier),

    #[error("Instruction '{mnemonic}' expects {expected}")]
    AsmOperands {
        mnemonic: Identifier,
        expected: &'static str,
    },

    #[error("Operand {0} does not fit in the instruction")]
    AsmRange(i32),

    #[error("Characters must be ASCII, found '{0}'")]
    NonAsciiChar(char),

    #[error("Cannot infer the type of {0}")]
    CannotInfer(String),

    #[error("Expression does not produce a value")]
    VoidValue,

    #[error("Arrow function expects {expected} parameters, found {found}")]
    ArrowParameters { expected: usize, found: usize },

    #[error("References can only be passed as arguments to 'ref' parameters")]
    MisplacedReference,

    #[error("Only variables, fields and elements can be passed by reference")]
    ReferenceTarget,

    #[error("Inline function '{0}' cannot be used as a value")]
    InlineValue(String),
}

/// Estado de la pasada de inicialización.
#[derive(Default)]
pub(crate) struct State {
    /// Funciones `inline` en expansión, para detectar recursión.
    inlining: Vec<FunctionId>,
}

fn located<T>(location: &Location, error: SemanticError) -> Semantic<T> {
    Err(Located::at(error, location.clone()))
}

impl Compiler<'_> {
    /// Registra los símbolos globales de un programa y sus imports.
    pub(crate) fn declare_program(&mut self, scope: ScopeId, program: &mut Program) {
        self.load_imports(&mut program.statements);
        for error in self.structs.layout_all() {
            self.diagnostics.report(&error);
        }

        self.declare_items(scope, &mut program.statements);
    }

    /// Inicializa el programa principal.
    pub(crate) fn initialize_program(&mut self, scope: ScopeId, program: &mut Program) {
        self.initialize_statements(scope, &mut program.statements);
    }

    pub(crate) fn report<T>(&mut self, result: Semantic<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.diagnostics.report(&error);
                None
            }
        }
    }

    /// Traduce un nombre de tipo, reportando tipos desconocidos.
    pub(crate) fn resolve_type(&mut self, name: &TypeName) -> Type {
        match self.structs.resolve(name) {
            Ok(ty) => ty,
            Err(error) => {
                self.diagnostics.report(&error);
                Type::Unknown
            }
        }
    }

    pub(crate) fn type_name(&self, ty: &Type) -> String {
        ty.display(&self.structs).to_string()
    }

    /// Carga imports y registra structs en todo bloque de sentencias.
    fn load_imports(&mut self, statements: &mut [Statement]) {
        for statement in statements {
            match &mut statement.kind {
                StatementKind::Struct(declaration) => match self.structs.declare(declaration) {
                    Ok(id) => declaration.id = Some(id),
                    Err(error) => self.diagnostics.report(&error),
                },

                StatementKind::Import {
                    path,
                    program,
                    scope,
                } => {
                    if let Some((imported, file)) = self.import(path) {
                        *program = Some(Box::new(imported));
                        *scope = Some(file);
                    }
                }

                StatementKind::Function(declaration) => {
                    self.load_imports(&mut declaration.body.statements)
                }

                StatementKind::Block(block)
                | StatementKind::While { body: block, .. }
                | StatementKind::For { body: block, .. }
                | StatementKind::Namespace {
                    body: Some(block), ..
                } => self.load_imports(&mut block.statements),

                StatementKind::If {
                    then, otherwise, ..
                } => {
                    self.load_imports(&mut then.statements);
                    if let Some(otherwise) = otherwise {
                        self.load_imports(std::slice::from_mut(otherwise.as_mut()));
                    }
                }

                _ => (),
            }
        }
    }

    fn import(&mut self, path: &Located<String>) -> Option<(Program, ScopeId)> {
        let from = self.imports.loading.last().cloned().unwrap_or_default();
        let (name, text) = match self.reader.read(&from, path.val()) {
            Ok(loaded) => loaded,
            Err(error) => {
                let error = SemanticError::Import {
                    path: path.val().clone(),
                    message: error.to_string(),
                };

                self.diagnostics.error(path.location().clone(), error);
                return None;
            }
        };

        if self.imports.loading.contains(&name) {
            let error = SemanticError::CircularImport(name);
            self.diagnostics.error(path.location().clone(), error);
            return None;
        }

        if !self.imports.loaded.insert(name.clone()) {
            debug!("Skipping '{}', already imported", name);
            return None;
        }

        debug!("Importing '{}' from '{}'", name, from);
        let mut program = self.front_end(&name, &text)?;
        let file = self.scopes.file(self.root);

        self.imports.loading.push(name);
        self.load_imports(&mut program.statements);
        self.imports.loading.pop();

        Some((program, file))
    }

    /// Registra funciones, etiquetas y namespaces de un bloque.
    pub(crate) fn declare_items(&mut self, scope: ScopeId, statements: &mut [Statement]) {
        for statement in statements {
            match &mut statement.kind {
                StatementKind::Function(declaration) => self.declare_function(scope, declaration),

                StatementKind::Label { name, pointer } => {
                    let label = self.table.label(format!("label_{}", name.val()));
                    match self.scopes.declare_label(scope, name.val().clone(), label) {
                        Ok(()) => *pointer = Some(label),
                        Err(_) => {
                            let error = SemanticError::DuplicateLabel(name.val().clone());
                            self.diagnostics.error(name.location().clone(), error);
                        }
                    }
                }

                StatementKind::Namespace { path, body: None } => {
                    let namespace = self.scopes[scope].namespace().join(path);
                    self.scopes.set_namespace(scope, namespace);
                }

                StatementKind::Namespace {
                    path,
                    body: Some(body),
                } => {
                    let inner = self.scopes.block(scope, ScopeKind::Block);
                    let namespace = self.scopes[scope].namespace().join(path);

                    self.scopes.set_namespace(inner, namespace);
                    body.scope = Some(inner);
                    self.declare_items(inner, &mut body.statements);
                }

                StatementKind::Use(path) => self.scopes.add_use(scope, path.clone()),

                StatementKind::Import {
                    program: Some(program),
                    scope: Some(file),
                    ..
                } => {
                    let file = *file;
                    self.declare_items(file, &mut program.statements);
                }

                _ => (),
            }
        }
    }

    fn declare_function(&mut self, scope: ScopeId, declaration: &mut FunctionDeclaration) {
        let location = declaration.name.location().clone();
        let ret = self.resolve_type(&declaration.ret);

        let mut parameters = Vec::with_capacity(declaration.parameters.len());
        for parameter in &declaration.parameters {
            parameters.push(Parameter {
                name: parameter.name.val().clone(),
                location: parameter.name.location().clone(),
                ty: self.resolve_type(&parameter.ty),
                reference: parameter.reference,
                default: parameter.default.clone(),
                variable: None,
            });
        }

        let name = declaration.name.val().clone();
        let display = match &name {
            FunctionName::Identifier(name) => name.to_string(),
            FunctionName::Operator(op) => format!("operator {}", op),
            FunctionName::Cast => format!("operator {}", self.type_name(&ret)),
        };

        if ret.size(&self.structs) > RETURN_WORDS {
            let error = SemanticError::ReturnTooLarge(self.type_name(&ret));
            self.diagnostics.error(declaration.ret.location.clone(), error);
        }

        let namespace = self.scopes[scope].namespace().clone();
        let duplicate = self.functions.iter().any(|function| {
            function.name == name
                && function.declaring == scope
                && function.namespace == namespace
                && function.parameters.len() == parameters.len()
                && function
                    .parameters
                    .iter()
                    .zip(&parameters)
                    .all(|(a, b)| a.storage_type() == b.storage_type())
        });

        if duplicate {
            let error = SemanticError::DuplicateFunction(display.clone());
            self.diagnostics.error(location.clone(), error);
        }

        let label = match namespace.is_global() {
            true => self.table.label(display.clone()),
            false => self.table.label(format!("{}.{}", namespace, display)),
        };

        let body = mem::replace(
            &mut declaration.body,
            Block {
                location: location.clone(),
                statements: Vec::new(),
                scope: None,
            },
        );

        let id = FunctionId::new(self.functions.len());
        self.functions.push(Function {
            name,
            display,
            location,
            namespace,
            label,
            ret,
            parameters,
            inline: declaration.inline,
            declaring: scope,
            scope: None,
            body: Some(body),
            references: 0,
            stack_alloc: None,
            code: None,
        });

        declaration.function = Some(id);
    }

    pub(crate) fn initialize_statements(&mut self, scope: ScopeId, statements: &mut [Statement]) {
        for statement in statements {
            self.initialize_statement(scope, statement);
        }
    }

    /// Inicializa un bloque anidado, creando su ámbito si aún no existe.
    fn initialize_block(&mut self, parent: ScopeId, block: &mut Block, kind: ScopeKind) {
        let scope = match block.scope {
            Some(scope) => scope,
            None => {
                let scope = self.scopes.block(parent, kind);
                block.scope = Some(scope);
                self.declare_items(scope, &mut block.statements);

                scope
            }
        };

        self.initialize_statements(scope, &mut block.statements);
    }

    fn initialize_statement(&mut self, scope: ScopeId, statement: &mut Statement) {
        let location = statement.location.clone();

        match &mut statement.kind {
            StatementKind::Empty
            | StatementKind::Struct(_)
            | StatementKind::Label { .. }
            | StatementKind::Use(_)
            | StatementKind::Namespace { body: None, .. } => (),

            StatementKind::Expression(expr) => {
                let result = self.initialize_expr(scope, expr, None);
                self.report(result);
            }

            StatementKind::Variable(declaration) => self.declare_variable(scope, declaration),

            StatementKind::Function(declaration) => {
                if let Some(function) = declaration.function {
                    if !self.functions[function.index()].inline {
                        if let Some(body) = self.functions[function.index()].body.take() {
                            self.initialize_body(function, body);
                        }
                    }
                }
            }

            StatementKind::Block(block) => self.initialize_block(scope, block, ScopeKind::Block),

            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                let result = self.initialize_condition(scope, condition);
                self.report(result);

                self.initialize_block(scope, then, ScopeKind::Block);
                if let Some(otherwise) = otherwise {
                    self.initialize_statement(scope, otherwise);
                }
            }

            StatementKind::While { condition, body } => {
                let result = self.initialize_condition(scope, condition);
                self.report(result);

                self.initialize_block(scope, body, ScopeKind::Loop);
            }

            StatementKind::For {
                init,
                condition,
                update,
                body,
                scope: inner,
            } => {
                let for_scope = self.scopes.block(scope, ScopeKind::Loop);
                *inner = Some(for_scope);

                if let Some(init) = init {
                    self.initialize_statement(for_scope, init);
                }

                if let Some(condition) = condition {
                    let result = self.initialize_condition(for_scope, condition);
                    self.report(result);
                }

                if let Some(update) = update {
                    let result = self.initialize_expr(for_scope, update, None);
                    self.report(result);
                }

                self.initialize_block(for_scope, body, ScopeKind::Block);
            }

            StatementKind::Break if !self.scopes.in_loop(scope) => {
                self.diagnostics.error(location, SemanticError::BreakOutsideLoop)
            }

            StatementKind::Continue if !self.scopes.in_loop(scope) => {
                self.diagnostics.error(location, SemanticError::ContinueOutsideLoop)
            }

            StatementKind::Break | StatementKind::Continue => (),

            StatementKind::Return(value) => {
                let result = self.initialize_return(scope, value.as_mut(), &location);
                self.report(result);
            }

            StatementKind::Goto { name, target } => {
                match self.scopes.lookup_label(scope, name.val()) {
                    Some(label) => *target = Some(label),
                    None => {
                        let error = SemanticError::UndefinedLabel(name.val().clone());
                        self.diagnostics.error(name.location().clone(), error);
                    }
                }
            }

            StatementKind::Namespace {
                body: Some(body), ..
            } => {
                if let Some(inner) = body.scope {
                    self.initialize_statements(inner, &mut body.statements);
                }
            }

            StatementKind::Import {
                program: Some(program),
                scope: Some(file),
                ..
            } => {
                let file = *file;
                self.initialize_statements(file, &mut program.statements);
            }

            StatementKind::Import { .. } => (),
        }
    }

    fn initialize_return(
        &mut self,
        scope: ScopeId,
        value: Option<&mut Expr>,
        location: &Location,
    ) -> Semantic<()> {
        let function = match self.scopes.function_of(scope) {
            Some(function) => function,
            None => {
                // `return` en el nivel superior termina el programa
                if let Some(value) = value {
                    self.initialize_expr(scope, value, None)?;
                }

                return Ok(());
            }
        };

        let ret = self.functions[function.index()].ret.clone();
        let name = self.function_name(function).to_owned();

        match (value, ret.is_void()) {
            (None, true) => Ok(()),
            (None, false) => located(location, SemanticError::MissingReturnValue(name)),
            (Some(_), true) => located(location, SemanticError::UnexpectedReturnValue(name)),
            (Some(value), false) => {
                self.initialize_expr(scope, value, Some(&ret))?;
                self.expect_type(&ret, value);
                Ok(())
            }
        }
    }

    fn declare_variable(
        &mut self,
        scope: ScopeId,
        declaration: &mut crate::ast::VariableDeclaration,
    ) {
        let declared = declaration.ty.as_ref().map(|ty| self.resolve_type(ty));

        let mut valid = true;
        if let Some(value) = &mut declaration.value {
            let result = self.initialize_expr(scope, value, declared.as_ref());
            valid = self.report(result).is_some();
        }

        let ty = match (declared, &declaration.value) {
            (Some(ty), Some(value)) => {
                if valid {
                    self.expect_type(&ty, value);
                }

                ty
            }

            (Some(ty), None) => ty,
            (None, Some(value)) => match &value.ty {
                Type::Void => {
                    self.diagnostics
                        .error(value.location.clone(), SemanticError::VoidValue);
                    Type::Unknown
                }

                Type::Assembly => Type::Integer,
                ty => ty.clone(),
            },

            (None, None) => {
                let error = SemanticError::CannotInfer(format!("'{}'", declaration.name.val()));
                self.diagnostics
                    .error(declaration.name.location().clone(), error);

                Type::Unknown
            }
        };

        // Las constantes guardan su valor ya evaluado
        let initializer = match &declaration.value {
            Some(value) if value.is_constant() => Some(value.clone()),
            Some(value @ Expr {
                kind: ExprKind::String(_),
                ..
            }) => Some(value.clone()),
            Some(value) if declaration.constant => self.evaluate(value).map(|constant| Expr {
                location: value.location.clone(),
                kind: ExprKind::Integer(i32::from(constant)),
                ty: value.ty.clone(),
            }),

            _ => None,
        };

        let id = self.define_variable(
            scope,
            &declaration.name,
            ty,
            declaration.constant,
            initializer,
        );

        declaration.variable = Some(id);
    }

    /// Crea una variable y su celda en `scope`.
    ///
    /// Un nombre repetido en el mismo ámbito se reporta, pero la variable
    /// igualmente se crea para no provocar errores en cascada.
    pub(crate) fn define_variable(
        &mut self,
        scope: ScopeId,
        name: &Id,
        ty: Type,
        constant: bool,
        initializer: Option<Expr>,
    ) -> VariableId {
        let size = ty.size(&self.structs);
        let cell = self
            .scopes
            .allocate(scope, size, &mut self.storage, &mut self.table);

        self.table.attach(cell, name.val().as_ref());

        let id = self.variables.push(Variable {
            name: name.val().clone(),
            location: name.location().clone(),
            ty,
            cell,
            pool: self.scopes.pool(scope),
            scope,
            root: self.scopes.root(scope),
            constant,
            unmodified: true,
            initializer,
            reads: 0,
            referenced: false,
            removed: false,
        });

        if self
            .scopes
            .declare_variable(scope, name.val().clone(), id)
            .is_err()
        {
            let error = SemanticError::DuplicateVariable(name.val().clone());
            self.diagnostics.error(name.location().clone(), error);
        }

        id
    }

    /// Declara los parámetros de una función en el ámbito de su cuerpo.
    pub(crate) fn define_parameters(&mut self, scope: ScopeId, function: FunctionId) -> Vec<VariableId> {
        let parameters = self.functions[function.index()].parameters.clone();

        parameters
            .iter()
            .map(|parameter| {
                let name = Located::at(parameter.name.clone(), parameter.location.clone());
                self.define_variable(scope, &name, parameter.storage_type(), false, None)
            })
            .collect()
    }

    /// Inicializa el cuerpo de una función no `inline`.
    pub(crate) fn initialize_body(&mut self, function: FunctionId, mut body: Block) {
        let declaring = self.functions[function.index()].declaring;
        let scope = self.scopes.function(declaring, function);
        self.functions[function.index()].scope = Some(scope);

        let variables = self.define_parameters(scope, function);
        for (parameter, variable) in self.functions[function.index()]
            .parameters
            .iter_mut()
            .zip(variables)
        {
            parameter.variable = Some(variable);
        }

        body.scope = Some(scope);
        self.declare_items(scope, &mut body.statements);
        self.initialize_statements(scope, &mut body.statements);

        self.functions[function.index()].body = Some(body);
    }

    /// Reporta un error si `value` no puede asignarse a `expected`.
    pub(crate) fn expect_type(&mut self, expected: &Type, value: &Expr) {
        let scalar = matches!(value.ty, Type::Assembly) && expected.is_integral();
        if !scalar && !expected.accepts(&value.ty) {
            let error = SemanticError::TypeMismatch {
                expected: self.type_name(expected),
                found: self.type_name(&value.ty),
            };

            self.diagnostics.error(value.location.clone(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        driver::{compile, Options},
        error::Severity,
        import::MemoryReader,
    };
    use pretty_assertions::assert_eq;

    fn errors_with(reader: &MemoryReader, text: &str) -> Vec<String> {
        let compilation = compile(text, "main.yabal", &Options::default(), reader).unwrap();
        assert!(compilation.image().is_none());

        compilation
            .diagnostics()
            .messages(Severity::Error)
            .map(str::to_owned)
            .collect()
    }

    fn errors(text: &str) -> Vec<String> {
        errors_with(&MemoryReader::new(), text)
    }

    #[test]
    fn constants_cannot_be_assigned() {
        assert_eq!(
            errors("const var a = 1\na = 2"),
            vec!["Cannot assign to constant 'a'"]
        );
    }

    #[test]
    fn loop_statements_need_a_loop() {
        assert_eq!(
            errors("if (true) { continue }"),
            vec!["Continue statement outside of a loop"]
        );
    }

    #[test]
    fn locals_of_other_functions_are_not_captured() {
        let found = errors(
            "int outer() {
                 var x = 1
                 int inner() => x
                 return inner()
             }

             var r = outer()",
        );

        assert!(found
            .iter()
            .any(|error| error == "Variable 'x' belongs to another function and cannot be captured"));
    }

    #[test]
    fn imports_are_checked() {
        let reader = MemoryReader::new()
            .with("main.yabal", "import \"a.yabal\"")
            .with("a.yabal", "import \"main.yabal\"");

        assert_eq!(
            errors_with(&reader, "import \"a.yabal\""),
            vec!["Circular import of 'main.yabal'"]
        );

        assert_eq!(
            errors("import \"missing.yabal\""),
            vec!["Could not import 'missing.yabal': file not found"]
        );
    }
}
