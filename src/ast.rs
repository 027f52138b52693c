//! Árbol sintáctico.
//!
//! El parser produce estos nodos con su información semántica vacía.
//! Las pasadas de declaración e inicialización completan tipos y
//! referencias resueltas (variables, funciones, campos, ámbitos), la
//! optimización reescribe nodos en el lugar y la generación de código
//! únicamente los lee. Cada pasada recorre el árbol por pattern matching.

use std::fmt::{self, Display};

use crate::{
    driver::FunctionId,
    lex::Identifier,
    link::PointerId,
    scope::{ScopeId, VariableId},
    source::{Located, Location},
    types::{Field, StructId, Type},
};

/// Identificador con ubicación.
pub type Id = Located<Identifier>;

/// Un archivo de código fuente.
#[derive(Clone, Debug)]
pub struct Program {
    pub location: Location,
    pub statements: Vec<Statement>,
}

/// Ruta de namespace, posiblemente vacía (namespace global).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Namespace(pub Vec<Identifier>);

impl Namespace {
    /// El namespace global.
    pub fn global() -> Self {
        Namespace(Vec::new())
    }

    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    /// Determina si `self` es igual a `other` o lo contiene.
    pub fn is_prefix_of(&self, other: &Namespace) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    /// Concatena un namespace relativo.
    pub fn join(&self, relative: &Namespace) -> Namespace {
        Namespace(self.0.iter().chain(&relative.0).cloned().collect())
    }
}

impl Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.0.iter().enumerate() {
            if index > 0 {
                fmt.write_str(".")?;
            }

            write!(fmt, "{}", part)?;
        }

        Ok(())
    }
}

/// Nombre de tipo tal como aparece en código fuente.
#[derive(Clone, Debug)]
pub struct TypeName {
    pub location: Location,
    pub kind: TypeNameKind,
}

#[derive(Clone, Debug)]
pub enum TypeNameKind {
    Int,
    Bool,
    Char,
    Void,
    Named(Identifier),
    Array(Box<TypeName>),
    Function {
        parameters: Vec<TypeName>,
        ret: Box<TypeName>,
    },
}

#[derive(Clone, Debug)]
pub struct Statement {
    pub location: Location,
    pub kind: StatementKind,
}

#[derive(Clone, Debug)]
pub enum StatementKind {
    Empty,
    Expression(Expr),
    Variable(VariableDeclaration),
    Function(Box<FunctionDeclaration>),
    Struct(StructDeclaration),
    Block(Block),

    If {
        condition: Expr,
        then: Block,
        otherwise: Option<Box<Statement>>,
    },

    While {
        condition: Expr,
        body: Block,
    },

    For {
        init: Option<Box<Statement>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Block,
        scope: Option<ScopeId>,
    },

    Break,
    Continue,
    Return(Option<Expr>),

    Label {
        name: Id,
        pointer: Option<PointerId>,
    },

    Goto {
        name: Id,
        target: Option<PointerId>,
    },

    /// `namespace a.b` sin bloque aplica al resto del bloque actual.
    Namespace {
        path: Namespace,
        body: Option<Block>,
    },

    Use(Namespace),

    Import {
        path: Located<String>,
        program: Option<Box<Program>>,
        scope: Option<ScopeId>,
    },
}

/// Bloque con ámbito propio.
#[derive(Clone, Debug)]
pub struct Block {
    pub location: Location,
    pub statements: Vec<Statement>,
    pub scope: Option<ScopeId>,
}

#[derive(Clone, Debug)]
pub struct VariableDeclaration {
    pub name: Id,
    pub constant: bool,
    pub ty: Option<TypeName>,
    pub value: Option<Expr>,
    pub variable: Option<VariableId>,
}

/// Nombre de una función declarada.
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionName {
    Identifier(Identifier),
    Operator(BinaryOp),

    /// Operador de conversión hacia el tipo de retorno.
    Cast,
}

#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: Id,
    pub ty: TypeName,
    pub reference: bool,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct FunctionDeclaration {
    pub name: Located<FunctionName>,
    pub ret: TypeName,
    pub parameters: Vec<Parameter>,
    pub body: Block,
    pub inline: bool,
    pub function: Option<FunctionId>,
}

#[derive(Clone, Debug)]
pub struct FieldDeclaration {
    pub name: Id,
    pub ty: TypeName,
    pub bits: Option<Located<u32>>,
}

#[derive(Clone, Debug)]
pub struct StructDeclaration {
    pub name: Id,
    pub fields: Vec<FieldDeclaration>,
    pub id: Option<StructId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAlso,
    OrElse,
}

impl BinaryOp {
    /// Operadores cuyo resultado es booleano.
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual
        )
    }

    /// Comparación de un salto condicional de ensamblador en línea.
    pub fn from_jump(mnemonic: &str) -> Option<BinaryOp> {
        let op = match mnemonic.to_ascii_uppercase().as_str() {
            "JE" => BinaryOp::Equal,
            "JNE" => BinaryOp::NotEqual,
            "JL" => BinaryOp::Less,
            "JLE" => BinaryOp::LessEqual,
            "JG" => BinaryOp::Greater,
            "JGE" => BinaryOp::GreaterEqual,
            _ => return None,
        };

        Some(op)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    pub fn symbol(self) -> &'static str {
        use BinaryOp::*;

        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            And => "&",
            Or => "|",
            Xor => "^",
            Shl => "<<",
            Shr => ">>",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            LessEqual => "<=",
            Greater => ">",
            GreaterEqual => ">=",
            AndAlso => "&&",
            OrElse => "||",
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.symbol())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Minus,

    /// `~x`
    Not,

    /// `!x`
    Negate,
}

/// Una expresión con su tipo, `Type::Unknown` antes de inicializar.
#[derive(Clone, Debug)]
pub struct Expr {
    pub location: Location,
    pub kind: ExprKind,
    pub ty: Type,
}

impl Expr {
    pub fn new(location: Location, kind: ExprKind) -> Self {
        Expr {
            location,
            kind,
            ty: Type::Unknown,
        }
    }

    /// Valor entero si la expresión es una literal escalar.
    pub fn constant(&self) -> Option<i32> {
        match self.kind {
            ExprKind::Integer(value) => Some(value),
            ExprKind::Boolean(value) => Some(value as i32),
            ExprKind::Char(value) => Some(value as i32),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.constant().is_some()
    }
}

/// Resolución de un identificador.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Unresolved,
    Variable(VariableId),
    Function(FunctionId),
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Integer(i32),
    Boolean(bool),
    Char(char),
    String(String),

    Identifier {
        name: Identifier,
        binding: Binding,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },

    Update {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },

    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    Switch {
        value: Box<Expr>,
        arms: Vec<SwitchArm>,
        default: Option<Box<Expr>>,
    },

    Call(Box<Call>),

    Member {
        object: Box<Expr>,
        field: Id,
        resolved: Option<Field>,
    },

    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },

    Reference(Box<Expr>),

    CreatePointer {
        address: Box<Expr>,
        bank: Located<u32>,
        element: Option<TypeName>,
    },

    SizeOf(Box<Expr>),

    StackAlloc {
        element: TypeName,
        length: Box<Expr>,
    },

    InitStruct(Vec<InitItem>),

    /// Conversión explícita entre tipos escalares. Las conversiones
    /// sobrecargadas se reescriben como llamadas.
    Cast {
        target: TypeName,
        value: Box<Expr>,
    },

    Arrow(Box<Arrow>),
    Asm(Vec<AsmItem>),
}

#[derive(Clone, Debug)]
pub struct SwitchArm {
    pub pattern: Expr,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct InitItem {
    pub name: Option<Id>,
    pub value: Expr,
    pub field: Option<Field>,
}

#[derive(Clone, Debug)]
pub struct Call {
    pub callee: Expr,
    pub arguments: Vec<Expr>,
    pub target: CallTarget,
}

/// Destino resuelto de una llamada.
#[derive(Clone, Debug)]
pub enum CallTarget {
    Unresolved,

    /// Llamada real a través de los trampolines.
    Function(FunctionId),

    /// Llamada a través de un valor de tipo función.
    Value,

    /// Expansión en línea.
    Inline(Box<InlineSite>),
}

/// Copia del cuerpo de una función `inline` para un sitio de llamada.
#[derive(Clone, Debug)]
pub struct InlineSite {
    pub function: FunctionId,
    pub scope: ScopeId,
    pub parameters: Vec<VariableId>,
    pub body: Block,
}

impl InlineSite {
    /// Expresión de retorno si el cuerpo es un único `return e`.
    pub fn single_return(&self) -> Option<&Expr> {
        match self.body.statements.as_slice() {
            [Statement {
                kind: StatementKind::Return(Some(value)),
                ..
            }] => Some(value),

            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Arrow {
    pub parameters: Vec<Id>,
    pub body: Block,

    /// El cuerpo es `=> e` en vez de un bloque.
    pub expression_body: bool,
    pub function: Option<FunctionId>,
}

#[derive(Clone, Debug)]
pub enum AsmItem {
    Label(Id),

    Instruction {
        mnemonic: Id,
        arguments: Vec<Located<AsmArgument>>,
    },

    Raw(Located<AsmArgument>),
}

#[derive(Clone, Debug)]
pub enum AsmArgument {
    Integer(i32),
    Variable(Identifier, Option<VariableId>),
    Label(Identifier),
}
