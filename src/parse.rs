//! Análisis sintáctico.
//!
//! Parser de descenso recursivo sobre la secuencia de tokens. Cada regla
//! puede fallar de forma débil, lo cual permite a quien la invoca
//! intentar una alternativa sin consumir tokens, o de forma estricta,
//! lo cual aborta el análisis. Una regla se vuelve estricta una vez que
//! ha consumido suficiente entrada como para comprometerse.
//!
//! El punto y coma al final de una sentencia es opcional. Por esta
//! razón, algunas construcciones que de otra forma serían ambiguas
//! (`return` seguido de expresión, llamadas, `++` posfijo y argumentos
//! de `asm`) solo continúan en la misma línea.

use thiserror::Error;

use crate::{
    ast::*,
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected {0}, none was found instead")]
    MissingToken(Token),

    #[error("Expected identifier")]
    ExpectedId,

    #[error("Expected a statement")]
    ExpectedStatement,

    #[error("Expected a type")]
    ExpectedType,

    #[error("Expected an expression")]
    ExpectedExpr,

    #[error("Expected an overloadable binary operator")]
    ExpectedOperator,

    #[error("Expected a string literal")]
    ExpectedString,

    #[error("Pointer bank must be a non-negative integer literal")]
    ExpectedBank,

    #[error("Bit size must be an integer literal")]
    ExpectedBits,

    #[error("Constant '{0}' must be initialized")]
    MissingInitializer(Identifier),

    #[error("Expected an instruction, label or literal")]
    ExpectedAsm,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

/// Construye el árbol sintáctico de un archivo.
pub fn parse(tokens: &[Located<Token>], eof: Location) -> Result<Program, Located<ParserError>> {
    let last_known = tokens
        .first()
        .map(|token| token.location().clone())
        .unwrap_or_else(|| eof.clone());

    let mut parser = Parser {
        tokens,
        cursor: 0,
        last_known,
        eof,
    };

    parser.program().map_err(Failure::coerce)
}

#[derive(Clone)]
struct Parser<'a> {
    tokens: &'a [Located<Token>],
    cursor: usize,
    last_known: Location,
    eof: Location,
}

enum Failure {
    Weak(Located<ParserError>),
    Strict(Located<ParserError>),
}

impl Failure {
    fn weak(self) -> Self {
        Failure::Weak(self.coerce())
    }

    fn strict(self) -> Self {
        Failure::Strict(self.coerce())
    }

    fn coerce(self) -> Located<ParserError> {
        match self {
            Failure::Weak(error) => error,
            Failure::Strict(error) => error,
        }
    }
}

type Parse<T> = Result<T, Failure>;

/// Niveles de precedencia de operadores binarios, de menor a mayor.
const LEVELS: &[&[(Token, BinaryOp)]] = &[
    &[(Token::OrElse, BinaryOp::OrElse)],
    &[(Token::AndAlso, BinaryOp::AndAlso)],
    &[(Token::Pipe, BinaryOp::Or)],
    &[(Token::Caret, BinaryOp::Xor)],
    &[(Token::Ampersand, BinaryOp::And)],
    &[
        (Token::Equal, BinaryOp::Equal),
        (Token::NotEqual, BinaryOp::NotEqual),
    ],
    &[
        (Token::Less, BinaryOp::Less),
        (Token::LessEqual, BinaryOp::LessEqual),
        (Token::Greater, BinaryOp::Greater),
        (Token::GreaterEqual, BinaryOp::GreaterEqual),
    ],
    &[
        (Token::ShiftLeft, BinaryOp::Shl),
        (Token::ShiftRight, BinaryOp::Shr),
    ],
    &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
    &[
        (Token::Times, BinaryOp::Mul),
        (Token::Slash, BinaryOp::Div),
        (Token::Percent, BinaryOp::Mod),
    ],
];

impl<'a> Parser<'a> {
    fn program(&mut self) -> Parse<Program> {
        let start = self.here();

        let mut statements = Vec::new();
        while self.peek().is_some() {
            statements.push(self.statement()?);
        }

        let location = match statements.last() {
            Some(_) => self.span(start),
            None => self.eof.clone(),
        };

        Ok(Program {
            location,
            statements,
        })
    }

    fn block(&mut self) -> Parse<Block> {
        let start = self.here();
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::CloseCurly) => {
                    self.next()?;
                    break;
                }

                Some(_) => statements.push(self.statement().map_err(Failure::strict)?),
                None => return self.fail(ParserError::MissingToken(Token::CloseCurly)),
            }
        }

        Ok(Block {
            location: self.span(start),
            statements,
            scope: None,
        })
    }

    /// Bloque o sentencia única, como cuerpo de `if`, `while` y `for`.
    fn body(&mut self) -> Parse<Block> {
        if let Some(Token::OpenCurly) = self.peek() {
            return self.block();
        }

        let statement = self.statement().map_err(Failure::strict)?;
        Ok(Block {
            location: statement.location.clone(),
            statements: vec![statement],
            scope: None,
        })
    }

    fn statement(&mut self) -> Parse<Statement> {
        let start = self.here();

        let kind = match self.peek() {
            None => return self.fail(ParserError::UnexpectedEof),

            Some(Token::Semicolon) => {
                self.next()?;
                StatementKind::Empty
            }

            Some(Token::OpenCurly) => StatementKind::Block(self.block()?),

            Some(Token::Id(_)) if self.peek_at(1) == Some(&Token::Colon) => {
                let name = self.id()?;
                self.expect(Token::Colon)?;

                StatementKind::Label {
                    name,
                    pointer: None,
                }
            }

            Some(Token::Keyword(keyword)) => match keyword {
                Keyword::If => self.if_statement()?,
                Keyword::While => self.while_statement()?,
                Keyword::For => self.for_statement()?,
                Keyword::Return => self.return_statement()?,
                Keyword::Struct => StatementKind::Struct(self.struct_declaration()?),
                Keyword::Namespace => self.namespace_statement()?,
                Keyword::Var | Keyword::Const => StatementKind::Variable(self.variable()?),
                Keyword::Inline | Keyword::Operator => self.function()?,

                Keyword::Break => {
                    self.next()?;
                    StatementKind::Break
                }

                Keyword::Continue => {
                    self.next()?;
                    StatementKind::Continue
                }

                Keyword::Goto => {
                    self.next()?;
                    StatementKind::Goto {
                        name: self.id().map_err(Failure::strict)?,
                        target: None,
                    }
                }

                Keyword::Use => {
                    self.next()?;
                    StatementKind::Use(self.namespace_path()?)
                }

                Keyword::Import => {
                    self.next()?;

                    let (location, token) = self.next()?.split();
                    let path = match token {
                        Token::StrLiteral(path) => Located::at(path, location),
                        _ => return self.fail(ParserError::ExpectedString),
                    };

                    StatementKind::Import {
                        path,
                        program: None,
                        scope: None,
                    }
                }

                _ => self.declaration_or_expression()?,
            },

            Some(_) => self.declaration_or_expression()?,
        };

        self.eat(&Token::Semicolon);

        Ok(Statement {
            location: self.span(start),
            kind,
        })
    }

    fn declaration_or_expression(&mut self) -> Parse<StatementKind> {
        match self.attempt(Parser::declaration) {
            Err(Failure::Weak(_)) => {
                let expr = self.expr()?;
                Ok(StatementKind::Expression(expr))
            }

            result => result,
        }
    }

    /// `T x [= e]`, `T f(...)` o `T operator op(...)`.
    ///
    /// Falla débilmente hasta encontrar un tipo seguido del nombre en la
    /// misma línea, de modo que las sentencias de expresión se intenten
    /// en su lugar.
    fn declaration(&mut self) -> Parse<StatementKind> {
        let ty = self.type_name().map_err(Failure::weak)?;
        if !self.same_line() {
            return self.fail(ParserError::ExpectedId).map_err(Failure::weak);
        }

        match self.peek() {
            Some(Token::Keyword(Keyword::Operator)) => {
                let start = self.here();
                self.next()?;

                let (location, token) = self.next()?.split();
                let op = match binary_operator(&token) {
                    Some(op) => op,
                    None => return self.fail(ParserError::ExpectedOperator),
                };

                let name = Located::at(FunctionName::Operator(op), Location::span(start, &location));
                self.function_rest(name, ty, false)
            }

            Some(Token::Id(_)) => {
                let name = self.id()?;

                match self.peek() {
                    Some(Token::OpenParen) => {
                        let name = name.map(FunctionName::Identifier);
                        self.function_rest(name, ty, false)
                    }

                    _ => {
                        let value = self.initializer()?;
                        Ok(StatementKind::Variable(VariableDeclaration {
                            name,
                            constant: false,
                            ty: Some(ty),
                            value,
                            variable: None,
                        }))
                    }
                }
            }

            _ => self.fail(ParserError::ExpectedId).map_err(Failure::weak),
        }
    }

    /// `inline T f(...)`, `operator T(...)` y combinaciones.
    fn function(&mut self) -> Parse<StatementKind> {
        let inline = self.eat(&Token::Keyword(Keyword::Inline));

        if let Some(Token::Keyword(Keyword::Operator)) = self.peek() {
            let start = self.here();
            self.next()?;

            let ret = self.type_name().map_err(Failure::strict)?;
            let name = Located::at(FunctionName::Cast, self.span(start));

            return self.function_rest(name, ret, inline);
        }

        let ret = self.type_name().map_err(Failure::strict)?;
        let name = match self.peek() {
            Some(Token::Keyword(Keyword::Operator)) => {
                let start = self.here();
                self.next()?;

                let token = self.next()?.into_inner();
                match binary_operator(&token) {
                    Some(op) => Located::at(FunctionName::Operator(op), self.span(start)),
                    None => return self.fail(ParserError::ExpectedOperator),
                }
            }

            _ => self.id()?.map(FunctionName::Identifier),
        };

        self.function_rest(name, ret, inline)
    }

    fn function_rest(
        &mut self,
        name: Located<FunctionName>,
        ret: TypeName,
        inline: bool,
    ) -> Parse<StatementKind> {
        self.expect(Token::OpenParen).map_err(Failure::strict)?;
        let parameters = self.comma_separated(Parser::parameter, true)?;
        self.expect(Token::CloseParen).map_err(Failure::strict)?;

        let returns = !matches!(ret.kind, TypeNameKind::Void);
        let body = self.function_body(returns)?;

        Ok(StatementKind::Function(Box::new(FunctionDeclaration {
            name,
            ret,
            parameters,
            body,
            inline,
            function: None,
        })))
    }

    /// Bloque o `=> e`. En el segundo caso, `e` se retorna si `returns`.
    fn function_body(&mut self, returns: bool) -> Parse<Block> {
        if !self.eat(&Token::Arrow) {
            return self.block().map_err(Failure::strict);
        }

        let expr = self.expr().map_err(Failure::strict)?;
        let location = expr.location.clone();

        let kind = match returns {
            true => StatementKind::Return(Some(expr)),
            false => StatementKind::Expression(expr),
        };

        let statement = Statement {
            location: location.clone(),
            kind,
        };

        Ok(Block {
            location,
            statements: vec![statement],
            scope: None,
        })
    }

    fn parameter(&mut self) -> Parse<Parameter> {
        let reference = self.eat(&Token::Keyword(Keyword::Ref));

        let ty = self.type_name().map_err(|error| match reference {
            true => error.strict(),
            false => error.weak(),
        })?;

        let name = self.id().map_err(Failure::strict)?;
        let default = self.initializer()?;

        Ok(Parameter {
            name,
            ty,
            reference,
            default,
        })
    }

    fn initializer(&mut self) -> Parse<Option<Expr>> {
        match self.eat(&Token::Assign) {
            true => Ok(Some(self.expr().map_err(Failure::strict)?)),
            false => Ok(None),
        }
    }

    /// `var x [= e]`, `const var x = e` o `const T x = e`.
    fn variable(&mut self) -> Parse<VariableDeclaration> {
        let constant = self.eat(&Token::Keyword(Keyword::Const));

        let untyped = self.eat(&Token::Keyword(Keyword::Var))
            || (constant && self.peek_at(1) == Some(&Token::Assign));

        let ty = match untyped {
            true => None,
            false => Some(self.type_name().map_err(Failure::strict)?),
        };

        let name = self.id().map_err(Failure::strict)?;
        let value = self.initializer()?;

        if constant && value.is_none() {
            let error = ParserError::MissingInitializer(name.val().clone());
            return Err(Failure::Strict(Located::at(error, name.location().clone())));
        }

        Ok(VariableDeclaration {
            name,
            constant,
            ty,
            value,
            variable: None,
        })
    }

    fn struct_declaration(&mut self) -> Parse<StructDeclaration> {
        self.keyword(Keyword::Struct)?;
        let name = self.id().map_err(Failure::strict)?;
        self.expect(Token::OpenCurly)?;

        let mut fields = Vec::new();
        while !self.eat(&Token::CloseCurly) {
            let ty = self.type_name().map_err(Failure::strict)?;
            let field = self.id().map_err(Failure::strict)?;

            let bits = match self.eat(&Token::Colon) {
                false => None,
                true => {
                    let (location, token) = self.next()?.split();
                    match token {
                        Token::IntLiteral(bits) if bits >= 0 => {
                            Some(Located::at(bits as u32, location))
                        }

                        _ => return self.fail(ParserError::ExpectedBits),
                    }
                }
            };

            fields.push(FieldDeclaration {
                name: field,
                ty,
                bits,
            });

            if !self.eat(&Token::Semicolon) {
                self.eat(&Token::Comma);
            }
        }

        Ok(StructDeclaration {
            name,
            fields,
            id: None,
        })
    }

    fn if_statement(&mut self) -> Parse<StatementKind> {
        self.keyword(Keyword::If)?;
        let condition = self.condition()?;
        let then = self.body()?;

        let otherwise = match self.eat(&Token::Keyword(Keyword::Else)) {
            true => Some(Box::new(self.statement().map_err(Failure::strict)?)),
            false => None,
        };

        Ok(StatementKind::If {
            condition,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Parse<StatementKind> {
        self.keyword(Keyword::While)?;
        let condition = self.condition()?;
        let body = self.body()?;

        Ok(StatementKind::While { condition, body })
    }

    fn for_statement(&mut self) -> Parse<StatementKind> {
        self.keyword(Keyword::For)?;
        self.expect(Token::OpenParen)?;

        let init = match self.peek() {
            Some(Token::Semicolon) => None,
            _ => {
                let start = self.here();
                let kind = match self.peek() {
                    Some(Token::Keyword(Keyword::Var | Keyword::Const)) => {
                        StatementKind::Variable(self.variable()?)
                    }

                    _ => self.declaration_or_expression()?,
                };

                Some(Box::new(Statement {
                    location: self.span(start),
                    kind,
                }))
            }
        };

        self.expect(Token::Semicolon)?;
        let condition = self.optional_until(Token::Semicolon)?;
        self.expect(Token::Semicolon)?;
        let update = self.optional_until(Token::CloseParen)?;
        self.expect(Token::CloseParen)?;

        let body = self.body()?;

        Ok(StatementKind::For {
            init,
            condition,
            update,
            body,
            scope: None,
        })
    }

    fn optional_until(&mut self, end: Token) -> Parse<Option<Expr>> {
        match self.peek() {
            Some(token) if *token == end => Ok(None),
            _ => Ok(Some(self.expr().map_err(Failure::strict)?)),
        }
    }

    fn return_statement(&mut self) -> Parse<StatementKind> {
        self.keyword(Keyword::Return)?;

        let value = match self.peek() {
            Some(Token::CloseCurly | Token::Semicolon) => None,
            Some(_) if self.same_line() => Some(self.expr().map_err(Failure::strict)?),
            _ => None,
        };

        Ok(StatementKind::Return(value))
    }

    fn namespace_statement(&mut self) -> Parse<StatementKind> {
        self.keyword(Keyword::Namespace)?;
        let path = self.namespace_path()?;

        let body = match self.peek() {
            Some(Token::OpenCurly) => Some(self.block()?),
            _ => None,
        };

        Ok(StatementKind::Namespace { path, body })
    }

    fn namespace_path(&mut self) -> Parse<Namespace> {
        let mut parts = vec![self.id().map_err(Failure::strict)?.into_inner()];
        while self.eat(&Token::Period) {
            parts.push(self.id().map_err(Failure::strict)?.into_inner());
        }

        Ok(Namespace(parts))
    }

    fn condition(&mut self) -> Parse<Expr> {
        self.expect(Token::OpenParen)?;
        let condition = self.expr().map_err(Failure::strict)?;
        self.expect(Token::CloseParen)?;

        Ok(condition)
    }

    fn type_name(&mut self) -> Parse<TypeName> {
        let (location, token) = self.next()?.split();
        let kind = match token {
            Token::Keyword(Keyword::Int) => TypeNameKind::Int,
            Token::Keyword(Keyword::Bool) => TypeNameKind::Bool,
            Token::Keyword(Keyword::Char) => TypeNameKind::Char,
            Token::Keyword(Keyword::Void) => TypeNameKind::Void,
            Token::Id(name) => TypeNameKind::Named(name),

            Token::Keyword(Keyword::Func) => {
                self.expect(Token::Less)?;
                let mut types = self.comma_separated(Parser::type_name, false)?;
                self.expect(Token::Greater)?;

                // El último tipo es el de retorno
                let ret = match types.pop() {
                    Some(ret) => ret,
                    None => return self.fail(ParserError::ExpectedType),
                };

                TypeNameKind::Function {
                    parameters: types,
                    ret: Box::new(ret),
                }
            }

            _ => return self.fail(ParserError::ExpectedType),
        };

        let mut ty = TypeName {
            location: Location::span(location, &self.last_known),
            kind,
        };

        while self.peek() == Some(&Token::OpenSquare)
            && self.peek_at(1) == Some(&Token::CloseSquare)
        {
            self.next()?;
            self.next()?;

            ty = TypeName {
                location: Location::span(ty.location.clone(), &self.last_known),
                kind: TypeNameKind::Array(Box::new(ty)),
            };
        }

        Ok(ty)
    }

    fn expr(&mut self) -> Parse<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Parse<Expr> {
        let target = self.ternary()?;

        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::AssignOp(op)) => Some(*op),
            _ => return Ok(target),
        };

        self.next()?;
        let value = self.assignment().map_err(Failure::strict)?;
        let location = Location::span(target.location.clone(), &value.location);

        // `a op= b` equivale a `a = a op b`
        let value = match op {
            None => value,
            Some(op) => Expr::new(
                location.clone(),
                ExprKind::Binary {
                    op,
                    left: Box::new(target.clone()),
                    right: Box::new(value),
                },
            ),
        };

        let kind = ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        };

        Ok(Expr::new(location, kind))
    }

    fn ternary(&mut self) -> Parse<Expr> {
        let condition = self.binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(condition);
        }

        let then = self.expr().map_err(Failure::strict)?;
        self.expect(Token::Colon)?;
        let otherwise = self.ternary().map_err(Failure::strict)?;

        let location = Location::span(condition.location.clone(), &otherwise.location);
        let kind = ExprKind::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        };

        Ok(Expr::new(location, kind))
    }

    fn binary(&mut self, level: usize) -> Parse<Expr> {
        let operators = match LEVELS.get(level) {
            Some(operators) => *operators,
            None => return self.unary(),
        };

        let mut left = self.binary(level + 1)?;
        loop {
            let op = self
                .peek()
                .and_then(|token| operators.iter().find(|(operator, _)| operator == token));

            let op = match op {
                Some((_, op)) => *op,
                None => break Ok(left),
            };

            self.next()?;
            let right = self.binary(level + 1).map_err(Failure::strict)?;

            let location = Location::span(left.location.clone(), &right.location);
            let kind = ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };

            left = Expr::new(location, kind);
        }
    }

    fn unary(&mut self) -> Parse<Expr> {
        let start = self.here();

        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Minus,
            Some(Token::Bang) => UnaryOp::Negate,
            Some(Token::Tilde) => UnaryOp::Not,

            Some(token @ (Token::Increment | Token::Decrement)) => {
                let increment = *token == Token::Increment;
                self.next()?;

                let target = self.unary().map_err(Failure::strict)?;
                let kind = ExprKind::Update {
                    target: Box::new(target),
                    increment,
                    prefix: true,
                };

                return Ok(Expr::new(self.span(start), kind));
            }

            Some(Token::Keyword(Keyword::Ref)) => {
                self.next()?;
                let target = self.unary().map_err(Failure::strict)?;
                return Ok(Expr::new(self.span(start), ExprKind::Reference(Box::new(target))));
            }

            Some(Token::OpenParen) => match self.attempt(Parser::cast_prefix) {
                Err(Failure::Weak(_)) => return self.postfix(),
                result => {
                    let target = result?;
                    let value = self.unary().map_err(Failure::strict)?;

                    let kind = ExprKind::Cast {
                        target,
                        value: Box::new(value),
                    };

                    return Ok(Expr::new(self.span(start), kind));
                }
            },

            _ => return self.postfix(),
        };

        self.next()?;
        let operand = self.unary().map_err(Failure::strict)?;
        let location = self.span(start);

        let kind = match (op, &operand.kind) {
            (UnaryOp::Minus, ExprKind::Integer(value)) => ExprKind::Integer(value.wrapping_neg()),
            _ => ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        };

        Ok(Expr::new(location, kind))
    }

    /// `(T)` seguido de algo que inicia una expresión.
    fn cast_prefix(&mut self) -> Parse<TypeName> {
        self.expect(Token::OpenParen).map_err(Failure::weak)?;
        let ty = self.type_name().map_err(Failure::weak)?;
        self.expect(Token::CloseParen).map_err(Failure::weak)?;

        // `(x)` puede ser una expresión entre paréntesis
        let starts_operand = matches!(
            self.peek(),
            Some(
                Token::Id(_)
                    | Token::IntLiteral(_)
                    | Token::CharLiteral(_)
                    | Token::StrLiteral(_)
                    | Token::OpenParen
                    | Token::Bang
                    | Token::Tilde
                    | Token::Keyword(
                        Keyword::True
                            | Keyword::False
                            | Keyword::SizeOf
                            | Keyword::CreatePointer
                            | Keyword::StackAlloc
                    )
            )
        );

        match (&ty.kind, starts_operand) {
            (TypeNameKind::Named(_), false) => {
                self.fail(ParserError::ExpectedExpr).map_err(Failure::weak)
            }

            _ => Ok(ty),
        }
    }

    fn postfix(&mut self) -> Parse<Expr> {
        let mut expr = self.primary()?;

        loop {
            let start = expr.location.clone();

            let kind = match self.peek() {
                Some(Token::OpenParen) if self.same_line() => {
                    self.next()?;
                    let arguments = self.comma_separated(Parser::expr, true)?;
                    self.expect(Token::CloseParen)?;

                    ExprKind::Call(Box::new(Call {
                        callee: expr,
                        arguments,
                        target: CallTarget::Unresolved,
                    }))
                }

                Some(Token::OpenSquare) => {
                    self.next()?;
                    let index = self.expr().map_err(Failure::strict)?;
                    self.expect(Token::CloseSquare)?;

                    ExprKind::Index {
                        array: Box::new(expr),
                        index: Box::new(index),
                    }
                }

                Some(Token::Period) => {
                    self.next()?;
                    let field = self.id().map_err(Failure::strict)?;

                    ExprKind::Member {
                        object: Box::new(expr),
                        field,
                        resolved: None,
                    }
                }

                Some(token @ (Token::Increment | Token::Decrement)) if self.same_line() => {
                    let increment = *token == Token::Increment;
                    self.next()?;

                    ExprKind::Update {
                        target: Box::new(expr),
                        increment,
                        prefix: false,
                    }
                }

                Some(Token::Keyword(Keyword::Switch)) => {
                    self.next()?;
                    self.switch(expr)?
                }

                _ => break Ok(expr),
            };

            expr = Expr::new(self.span(start), kind);
        }
    }

    fn switch(&mut self, value: Expr) -> Parse<ExprKind> {
        self.expect(Token::OpenCurly)?;

        let mut arms = Vec::new();
        let mut default = None;

        while !self.eat(&Token::CloseCurly) {
            let wildcard = matches!(self.peek(), Some(Token::Id(id)) if id.as_ref() == "_")
                && self.peek_at(1) == Some(&Token::Arrow);

            if wildcard {
                self.next()?;
                self.expect(Token::Arrow)?;
                default = Some(Box::new(self.expr().map_err(Failure::strict)?));
            } else {
                let pattern = self.expr().map_err(Failure::strict)?;
                self.expect(Token::Arrow)?;
                let value = self.expr().map_err(Failure::strict)?;

                arms.push(SwitchArm { pattern, value });
            }

            if !self.eat(&Token::Comma) {
                self.expect(Token::CloseCurly)?;
                break;
            }
        }

        Ok(ExprKind::Switch {
            value: Box::new(value),
            arms,
            default,
        })
    }

    fn primary(&mut self) -> Parse<Expr> {
        let start = self.here();

        let kind = match self.peek() {
            Some(Token::Id(_)) if self.peek_at(1) == Some(&Token::Arrow) => {
                let parameter = self.id()?;
                self.arrow(vec![parameter])?
            }

            Some(Token::OpenParen) => match self.attempt(Parser::arrow_parameters) {
                Ok(parameters) => self.arrow(parameters)?,
                Err(Failure::Weak(_)) => {
                    self.next()?;
                    let inner = self.expr().map_err(Failure::strict)?;
                    self.expect(Token::CloseParen)?;

                    return Ok(inner);
                }

                Err(error) => return Err(error),
            },

            Some(Token::OpenCurly) => self.init_struct()?,
            Some(Token::Keyword(Keyword::CreatePointer)) => self.create_pointer()?,
            Some(Token::Keyword(Keyword::Asm)) => self.asm()?,

            Some(Token::Keyword(Keyword::SizeOf)) => {
                self.next()?;
                ExprKind::SizeOf(Box::new(self.condition()?))
            }

            Some(Token::Keyword(Keyword::StackAlloc)) => {
                self.next()?;
                let element = self.type_name().map_err(Failure::strict)?;

                self.expect(Token::OpenSquare)?;
                let length = self.expr().map_err(Failure::strict)?;
                self.expect(Token::CloseSquare)?;

                ExprKind::StackAlloc {
                    element,
                    length: Box::new(length),
                }
            }

            _ => match self.next()?.into_inner() {
                Token::IntLiteral(value) => ExprKind::Integer(value),
                Token::CharLiteral(c) => ExprKind::Char(c),
                Token::StrLiteral(string) => ExprKind::String(string),
                Token::Keyword(Keyword::True) => ExprKind::Boolean(true),
                Token::Keyword(Keyword::False) => ExprKind::Boolean(false),

                Token::Id(name) => ExprKind::Identifier {
                    name,
                    binding: Binding::Unresolved,
                },

                _ => return self.fail(ParserError::ExpectedExpr).map_err(Failure::weak),
            },
        };

        Ok(Expr::new(self.span(start), kind))
    }

    fn arrow_parameters(&mut self) -> Parse<Vec<Id>> {
        self.expect(Token::OpenParen).map_err(Failure::weak)?;
        let parameters = self
            .comma_separated(|s| s.id().map_err(Failure::weak), true)
            .map_err(Failure::weak)?;

        self.expect(Token::CloseParen).map_err(Failure::weak)?;
        match self.peek() {
            Some(Token::Arrow) => Ok(parameters),
            _ => self.fail(ParserError::ExpectedExpr).map_err(Failure::weak),
        }
    }

    /// Cuerpo de función flecha tras sus parámetros.
    fn arrow(&mut self, parameters: Vec<Id>) -> Parse<ExprKind> {
        self.expect(Token::Arrow)?;

        let (body, expression_body) = match self.peek() {
            Some(Token::OpenCurly) => (self.block()?, false),
            _ => {
                let expr = self.expr().map_err(Failure::strict)?;
                let location = expr.location.clone();

                let statement = Statement {
                    location: location.clone(),
                    kind: StatementKind::Return(Some(expr)),
                };

                let body = Block {
                    location,
                    statements: vec![statement],
                    scope: None,
                };

                (body, true)
            }
        };

        Ok(ExprKind::Arrow(Box::new(Arrow {
            parameters,
            body,
            expression_body,
            function: None,
        })))
    }

    fn init_struct(&mut self) -> Parse<ExprKind> {
        self.expect(Token::OpenCurly)?;

        let mut items = Vec::new();
        while !self.eat(&Token::CloseCurly) {
            let name = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Id(_)), Some(Token::Colon)) => {
                    let name = self.id()?;
                    self.next()?;
                    Some(name)
                }

                _ => None,
            };

            let value = self.expr().map_err(Failure::strict)?;
            items.push(InitItem {
                name,
                value,
                field: None,
            });

            if !self.eat(&Token::Comma) {
                self.expect(Token::CloseCurly)?;
                break;
            }
        }

        Ok(ExprKind::InitStruct(items))
    }

    /// `create_pointer[<T>](dirección[, banco])`
    fn create_pointer(&mut self) -> Parse<ExprKind> {
        self.keyword(Keyword::CreatePointer)?;

        let element = match self.eat(&Token::Less) {
            true => {
                let element = self.type_name().map_err(Failure::strict)?;
                self.expect(Token::Greater)?;
                Some(element)
            }

            false => None,
        };

        self.expect(Token::OpenParen)?;
        let address = self.expr().map_err(Failure::strict)?;

        let bank = match self.eat(&Token::Comma) {
            false => Located::at(0, self.last_known.clone()),
            true => {
                let (location, token) = self.next()?.split();
                match token {
                    Token::IntLiteral(bank) if bank >= 0 => Located::at(bank as u32, location),
                    _ => return self.fail(ParserError::ExpectedBank),
                }
            }
        };

        self.expect(Token::CloseParen)?;

        Ok(ExprKind::CreatePointer {
            address: Box::new(address),
            bank,
            element,
        })
    }

    fn asm(&mut self) -> Parse<ExprKind> {
        self.keyword(Keyword::Asm)?;
        self.expect(Token::OpenCurly)?;

        let mut items = Vec::new();
        loop {
            let (location, token) = self.next()?.split();
            let item = match token {
                Token::CloseCurly => break,
                Token::Semicolon => continue,

                Token::Id(name) if self.eat(&Token::Colon) => {
                    AsmItem::Label(Located::at(name, location))
                }

                Token::IntLiteral(value) => {
                    AsmItem::Raw(Located::at(AsmArgument::Integer(value), location))
                }

                Token::Id(mnemonic) => {
                    let mut arguments = Vec::new();
                    while self.same_line() && self.peek() != Some(&Token::CloseCurly) {
                        arguments.push(self.asm_argument()?);
                    }

                    AsmItem::Instruction {
                        mnemonic: Located::at(mnemonic, location),
                        arguments,
                    }
                }

                _ => return self.fail(ParserError::ExpectedAsm),
            };

            items.push(item);
        }

        Ok(ExprKind::Asm(items))
    }

    fn asm_argument(&mut self) -> Parse<Located<AsmArgument>> {
        let start = self.here();

        let argument = match self.next()?.into_inner() {
            Token::IntLiteral(value) => AsmArgument::Integer(value),
            Token::Minus => match self.next()?.into_inner() {
                Token::IntLiteral(value) => AsmArgument::Integer(-value),
                _ => return self.fail(ParserError::ExpectedAsm),
            },

            Token::At => AsmArgument::Variable(self.id()?.into_inner(), None),
            Token::Id(label) => AsmArgument::Label(label),

            _ => return self.fail(ParserError::ExpectedAsm),
        };

        Ok(Located::at(argument, self.span(start)))
    }

    fn attempt<T, F>(&mut self, rule: F) -> Parse<T>
    where
        F: FnOnce(&mut Self) -> Parse<T>,
    {
        let mut fork = self.clone();

        let result = rule(&mut fork);
        if result.is_ok() {
            *self = fork;
        }

        result
    }

    fn comma_separated<T, F>(&mut self, mut rule: F, allow_empty: bool) -> Parse<Vec<T>>
    where
        F: FnMut(&mut Self) -> Parse<T>,
    {
        let mut items = match self.attempt(|s| rule(s)) {
            Err(Failure::Weak(_)) if allow_empty => return Ok(Vec::new()),
            item => vec![item.map_err(Failure::strict)?],
        };

        while self.eat(&Token::Comma) {
            items.push(rule(self).map_err(Failure::strict)?);
        }

        Ok(items)
    }

    fn id(&mut self) -> Parse<Id> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            _ => self.fail(ParserError::ExpectedId),
        }
    }

    fn keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(Token::Keyword(keyword))
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        match self.next().map(Located::into_inner) {
            Ok(found) if found == token => Ok(()),
            Ok(found) => self.fail(ParserError::UnexpectedToken(token, found)),
            Err(_) => self.fail(ParserError::MissingToken(token)),
        }
    }

    /// Consume el siguiente token si es igual a `token`.
    fn eat(&mut self, token: &Token) -> bool {
        let found = self.peek() == Some(token);
        if found {
            self.cursor += 1;
            self.last_known = self.tokens[self.cursor - 1].location().clone();
        }

        found
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.get(self.cursor) {
            Some(token) => {
                self.cursor += 1;
                self.last_known = token.location().clone();
                Ok(token.clone())
            }

            None => {
                self.last_known = self.eof.clone();
                self.fail(ParserError::UnexpectedEof)
            }
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.cursor + ahead).map(Located::val)
    }

    /// Ubicación del siguiente token.
    fn here(&self) -> Location {
        match self.tokens.get(self.cursor) {
            Some(token) => token.location().clone(),
            None => self.eof.clone(),
        }
    }

    /// Rango desde `start` hasta el último token consumido.
    fn span(&self, start: Location) -> Location {
        if self.last_known.offset() < start.offset() {
            return start;
        }

        Location::span(start, &self.last_known)
    }

    /// El siguiente token inicia en la línea donde terminó el anterior.
    fn same_line(&self) -> bool {
        match self.tokens.get(self.cursor) {
            Some(token) => token.location().start().line() == self.last_known.end().line(),
            None => false,
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Failure::Strict(Located::at(error, self.last_known.clone())))
    }
}

fn binary_operator(token: &Token) -> Option<BinaryOp> {
    LEVELS
        .iter()
        .flat_map(|level| level.iter())
        .find(|(operator, _)| operator == token)
        .map(|(_, op)| *op)
        .filter(|op| !op.is_logical())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        lex::Lexer,
        source::{consume, Source},
    };
    use pretty_assertions::assert_eq;

    fn parse_text(text: &str) -> Result<Program, String> {
        let source = Source::new("test.yabal", text);
        let (eof, chars) = consume(&source);
        let tokens = Lexer::new(chars).try_exhaustive().unwrap();

        parse(&tokens, eof).map_err(|error| error.val().to_string())
    }

    fn statements(text: &str) -> Vec<StatementKind> {
        parse_text(text)
            .unwrap()
            .statements
            .into_iter()
            .map(|statement| statement.kind)
            .collect()
    }

    fn expression(text: &str) -> ExprKind {
        match statements(text).pop() {
            Some(StatementKind::Expression(expr)) => expr.kind,
            other => panic!("not an expression: {:?}", other),
        }
    }

    #[test]
    fn declarations_without_semicolons() {
        let parsed = statements("var a = 1\nint b = 2; Test c\nconst var d = 3");
        assert_eq!(parsed.len(), 4);

        match &parsed[1] {
            StatementKind::Variable(declaration) => {
                assert_eq!(declaration.name.val().as_ref(), "b");
                assert!(matches!(declaration.ty.as_ref().unwrap().kind, TypeNameKind::Int));
            }

            other => panic!("{:?}", other),
        }

        match &parsed[2] {
            StatementKind::Variable(declaration) => {
                assert!(declaration.value.is_none());
                assert!(matches!(
                    &declaration.ty.as_ref().unwrap().kind,
                    TypeNameKind::Named(name) if name.as_ref() == "Test"
                ));
            }

            other => panic!("{:?}", other),
        }

        assert!(matches!(&parsed[3], StatementKind::Variable(d) if d.constant));
    }

    #[test]
    fn assignments_are_expressions() {
        match expression("a = b = 2") {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { .. }))
            }

            other => panic!("{:?}", other),
        }

        match expression("x[0] += 1") {
            ExprKind::Assign { target, value } => {
                assert!(matches!(target.kind, ExprKind::Index { .. }));
                assert!(matches!(
                    value.kind,
                    ExprKind::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }

            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn precedence() {
        match expression("1 + 2 * 3 == 7 && !b") {
            ExprKind::Binary {
                op: BinaryOp::AndAlso,
                left,
                right,
                ..
            } => {
                assert!(matches!(
                    left.kind,
                    ExprKind::Binary {
                        op: BinaryOp::Equal,
                        ..
                    }
                ));

                assert!(matches!(
                    right.kind,
                    ExprKind::Unary {
                        op: UnaryOp::Negate,
                        ..
                    }
                ));
            }

            other => panic!("{:?}", other),
        }

        assert!(matches!(expression("-5"), ExprKind::Integer(-5)));
    }

    #[test]
    fn functions_and_operators() {
        let parsed = statements(
            "int add(int a, int b = 2) { return a + b }\n\
             inline int twice(ref int x) => x * 2\n\
             Vector operator +(Vector a, Vector b) => a\n\
             operator int(Vector v) => v.x",
        );

        match &parsed[0] {
            StatementKind::Function(function) => {
                assert!(!function.inline);
                assert_eq!(function.parameters.len(), 2);
                assert!(function.parameters[1].default.is_some());
                assert!(matches!(
                    function.body.statements[0].kind,
                    StatementKind::Return(Some(_))
                ));
            }

            other => panic!("{:?}", other),
        }

        assert!(matches!(
            &parsed[1],
            StatementKind::Function(f) if f.inline && f.parameters[0].reference
        ));

        assert!(matches!(
            &parsed[2],
            StatementKind::Function(f) if matches!(f.name.val(), FunctionName::Operator(BinaryOp::Add))
        ));

        assert!(matches!(
            &parsed[3],
            StatementKind::Function(f) if matches!(f.name.val(), FunctionName::Cast)
        ));
    }

    #[test]
    fn return_value_must_share_line() {
        let parsed = statements("void f() {\n return\n a = 1\n}");
        match &parsed[0] {
            StatementKind::Function(function) => {
                assert_eq!(function.body.statements.len(), 2);
                assert!(matches!(
                    function.body.statements[0].kind,
                    StatementKind::Return(None)
                ));
            }

            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn control_flow() {
        let parsed = statements(
            "for (var i = 0; i < 10; i++) { if (i == 2) continue else break }\n\
             while (true) a++\n\
             loop: goto loop",
        );

        assert!(matches!(&parsed[0], StatementKind::For { init: Some(_), condition: Some(_), update: Some(_), .. }));
        assert!(matches!(&parsed[1], StatementKind::While { .. }));
        assert!(matches!(&parsed[2], StatementKind::Label { .. }));
        assert!(matches!(&parsed[3], StatementKind::Goto { .. }));
    }

    #[test]
    fn structs_and_initializers() {
        let parsed = statements(
            "struct Cell { int type: 4; int rot: 2, bool flag }\n\
             Cell c = { type: 1, rot: 2 }\n\
             var p = create_pointer<Cell>(10, 1)",
        );

        match &parsed[0] {
            StatementKind::Struct(declaration) => {
                assert_eq!(declaration.fields.len(), 3);
                assert_eq!(*declaration.fields[0].bits.as_ref().unwrap().val(), 4);
                assert!(declaration.fields[2].bits.is_none());
            }

            other => panic!("{:?}", other),
        }

        match &parsed[1] {
            StatementKind::Variable(VariableDeclaration {
                value: Some(value), ..
            }) => match &value.kind {
                ExprKind::InitStruct(items) => {
                    assert_eq!(items.len(), 2);
                    assert_eq!(items[1].name.as_ref().unwrap().val().as_ref(), "rot");
                }

                other => panic!("{:?}", other),
            },

            other => panic!("{:?}", other),
        }

        match &parsed[2] {
            StatementKind::Variable(VariableDeclaration {
                value: Some(value), ..
            }) => assert!(matches!(
                &value.kind,
                ExprKind::CreatePointer { bank, element: Some(_), .. } if *bank.val() == 1
            )),

            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn casts_arrows_and_switches() {
        assert!(matches!(expression("(int)c"), ExprKind::Cast { .. }));
        assert!(matches!(expression("(a) + b"), ExprKind::Binary { .. }));

        match expression("cb = (x, y) => x + y") {
            ExprKind::Assign { value, .. } => match value.kind {
                ExprKind::Arrow(arrow) => {
                    assert_eq!(arrow.parameters.len(), 2);
                    assert!(arrow.expression_body);
                }

                other => panic!("{:?}", other),
            },

            other => panic!("{:?}", other),
        }

        match expression("a = b switch { 1 => 2, 3 => 4, _ => 5 }") {
            ExprKind::Assign { value, .. } => match value.kind {
                ExprKind::Switch { arms, default, .. } => {
                    assert_eq!(arms.len(), 2);
                    assert!(default.is_some());
                }

                other => panic!("{:?}", other),
            },

            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn namespaces_and_imports() {
        let parsed = statements("namespace a.b { int f() => 1 }\nuse a.b\nimport \"lib.yabal\"");

        match &parsed[0] {
            StatementKind::Namespace { path, body } => {
                assert_eq!(path.to_string(), "a.b");
                assert!(body.is_some());
            }

            other => panic!("{:?}", other),
        }

        assert!(matches!(&parsed[1], StatementKind::Use(path) if path.0.len() == 2));
        assert!(matches!(&parsed[2], StatementKind::Import { path, .. } if path.val() == "lib.yabal"));
    }

    #[test]
    fn asm_blocks() {
        match expression("asm {\n  LDIA 5\n  STLGE 0 4095\n  JMP end\nend:\n  AIN @value\n  42\n}") {
            ExprKind::Asm(items) => {
                assert_eq!(items.len(), 6);
                assert!(matches!(&items[1], AsmItem::Instruction { arguments, .. } if arguments.len() == 2));
                assert!(matches!(&items[3], AsmItem::Label(name) if name.val().as_ref() == "end"));
                assert!(matches!(
                    &items[4],
                    AsmItem::Instruction { arguments, .. }
                        if matches!(arguments[0].val(), AsmArgument::Variable(..))
                ));
                assert!(matches!(&items[5], AsmItem::Raw(_)));
            }

            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn errors() {
        assert_eq!(parse_text("var = 1").unwrap_err(), "Expected identifier");
        assert_eq!(parse_text("if (a) {").unwrap_err(), "Expected `}`, none was found instead");
        assert_eq!(
            parse_text("const var a").unwrap_err(),
            "Constant 'a' must be initialized"
        );
    }
}
