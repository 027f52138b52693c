//! Universo de tipos y disposición de structs.
//!
//! Los tipos forman un conjunto cerrado. El único tipo cuya forma
//! depende de declaraciones del programa es el struct, cuyos campos
//! se disponen en palabras y, opcionalmente, en rangos de bits dentro
//! de una misma palabra. La disposición de cada struct se calcula a lo
//! sumo una vez, detectando ciclos de contención por medio de un
//! estado de tres valores.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    rc::Rc,
};

use thiserror::Error;

use crate::{
    ast::{StructDeclaration, TypeName, TypeNameKind},
    lex::Identifier,
    source::{Located, Location},
};

/// Máximo de bits por palabra.
pub const WORD_BITS: u32 = 16;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TypeError {
    #[error("Type '{0}' could not be found")]
    UnknownType(Identifier),

    #[error("Struct '{0}' is already declared")]
    DuplicateStruct(Identifier),

    #[error("Struct '{0}' cannot contain itself")]
    RecursiveStruct(Identifier),

    #[error("Field '{0}' is declared more than once")]
    DuplicateField(Identifier),

    #[error("Bit size of field '{0}' must be between 1 and {WORD_BITS}")]
    InvalidBitSize(Identifier),

    #[error("Field '{0}' must be an integer, boolean or char to use a bit size")]
    BitFieldType(Identifier),

    #[error("Field '{0}' cannot be void")]
    VoidField(Identifier),
}

/// Identificador de un struct declarado.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructId(usize);

/// Firma de una función o valor función.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub parameters: Vec<Type>,
    pub ret: Type,
}

/// Un tipo de Yabal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// Tipo de expresiones erróneas, compatible con todo.
    Unknown,
    Void,
    Integer,
    Boolean,
    Char,

    /// Tipo de un bloque `asm`.
    Assembly,

    /// Puntero a arreglo, dirección y banco.
    Pointer(Box<Type>),

    /// Referencia a una variable de otro marco.
    Reference(Box<Type>),

    Struct(StructId),
    Function(Rc<Signature>),
}

impl Type {
    /// Tamaño en palabras.
    pub fn size(&self, structs: &Structs) -> u16 {
        match self {
            Type::Unknown | Type::Void | Type::Assembly => 1,
            Type::Integer | Type::Boolean | Type::Char => 1,
            Type::Function(_) | Type::Reference(_) => 1,
            Type::Pointer(_) => 2,
            Type::Struct(id) => structs.size(*id),
        }
    }

    /// Tipo referido, o el mismo si no es referencia.
    pub fn deref(&self) -> &Type {
        match self {
            Type::Reference(inner) => inner,
            other => other,
        }
    }

    /// Tipos que se comportan como enteros de una palabra.
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Type::Integer | Type::Boolean | Type::Char | Type::Unknown
        )
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Tipo de elemento de un puntero.
    pub fn element(&self) -> Option<&Type> {
        match self.deref() {
            Type::Pointer(element) => Some(element),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self.deref() {
            Type::Function(signature) => Some(signature),
            _ => None,
        }
    }

    /// Compatibilidad de asignación sin conversión.
    ///
    /// Los tipos enteros de una palabra son intercambiables entre sí.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self.deref(), other.deref()) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (a, b) if a.is_integral() && b.is_integral() => true,
            (Type::Pointer(a), Type::Pointer(b)) => a.accepts(b),
            (a, b) => a == b,
        }
    }

    /// Adaptador de presentación con nombres de structs.
    pub fn display<'a>(&'a self, structs: &'a Structs) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, structs }
    }
}

pub struct TypeDisplay<'a> {
    ty: &'a Type,
    structs: &'a Structs,
}

impl Display for TypeDisplay<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let structs = self.structs;

        match self.ty {
            Type::Unknown => fmt.write_str("unknown"),
            Type::Void => fmt.write_str("void"),
            Type::Integer => fmt.write_str("int"),
            Type::Boolean => fmt.write_str("bool"),
            Type::Char => fmt.write_str("char"),
            Type::Assembly => fmt.write_str("asm"),
            Type::Pointer(element) => write!(fmt, "{}[]", element.display(structs)),
            Type::Reference(inner) => write!(fmt, "ref {}", inner.display(structs)),
            Type::Struct(id) => write!(fmt, "{}", structs.name(*id)),
            Type::Function(signature) => {
                fmt.write_str("func<")?;
                for parameter in &signature.parameters {
                    write!(fmt, "{}, ", parameter.display(structs))?;
                }

                write!(fmt, "{}>", signature.ret.display(structs))
            }
        }
    }
}

/// Rango de bits de un campo empacado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BitRange {
    pub offset: u8,
    pub size: u8,
}

impl BitRange {
    /// Máscara sin desplazar, `(1 << size) - 1`.
    pub fn mask(self) -> u16 {
        ((1u32 << self.size) - 1) as u16
    }

    /// Máscara en su posición dentro de la palabra.
    pub fn shifted_mask(self) -> u16 {
        self.mask() << self.offset
    }
}

/// Campo de un struct ya dispuesto.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: Identifier,
    pub ty: Type,
    pub offset: u16,
    pub bits: Option<BitRange>,
}

enum Layout {
    Unvisited,
    Visiting,
    Resolved { size: u16, fields: Vec<Field> },
}

struct StructDef {
    declaration: StructDeclaration,
    layout: Layout,
}

/// Structs declarados en una compilación.
#[derive(Default)]
pub struct Structs {
    defs: Vec<StructDef>,
    names: HashMap<Identifier, StructId>,
}

impl Structs {
    /// Registra un struct, sin calcular su disposición.
    pub fn declare(&mut self, declaration: &StructDeclaration) -> Result<StructId, Located<TypeError>> {
        let name = declaration.name.val();
        if self.names.contains_key(name) {
            let error = TypeError::DuplicateStruct(name.clone());
            return Err(Located::at(error, declaration.name.location().clone()));
        }

        let id = StructId(self.defs.len());
        self.names.insert(name.clone(), id);
        self.defs.push(StructDef {
            declaration: declaration.clone(),
            layout: Layout::Unvisited,
        });

        Ok(id)
    }

    pub fn lookup(&self, name: &Identifier) -> Option<StructId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, id: StructId) -> &Identifier {
        self.defs[id.0].declaration.name.val()
    }

    pub fn location(&self, id: StructId) -> &Location {
        self.defs[id.0].declaration.name.location()
    }

    /// Tamaño en palabras, uno si aún no se dispone.
    pub fn size(&self, id: StructId) -> u16 {
        match &self.defs[id.0].layout {
            Layout::Resolved { size, .. } => *size,
            _ => 1,
        }
    }

    /// Campos dispuestos, vacío si aún no se dispone.
    pub fn fields(&self, id: StructId) -> &[Field] {
        match &self.defs[id.0].layout {
            Layout::Resolved { fields, .. } => fields,
            _ => &[],
        }
    }

    pub fn field(&self, id: StructId, name: &str) -> Option<&Field> {
        self.fields(id)
            .iter()
            .find(|field| field.name.as_ref() == name)
    }

    /// Traduce un nombre de tipo.
    pub fn resolve(&self, name: &TypeName) -> Result<Type, Located<TypeError>> {
        let ty = match &name.kind {
            TypeNameKind::Int => Type::Integer,
            TypeNameKind::Bool => Type::Boolean,
            TypeNameKind::Char => Type::Char,
            TypeNameKind::Void => Type::Void,
            TypeNameKind::Array(element) => Type::Pointer(Box::new(self.resolve(element)?)),

            TypeNameKind::Named(id) => match self.lookup(id) {
                Some(id) => Type::Struct(id),
                None => {
                    let error = TypeError::UnknownType(id.clone());
                    return Err(Located::at(error, name.location.clone()));
                }
            },

            TypeNameKind::Function { parameters, ret } => {
                let parameters = parameters
                    .iter()
                    .map(|parameter| self.resolve(parameter))
                    .collect::<Result<_, _>>()?;

                let ret = self.resolve(ret)?;
                Type::Function(Rc::new(Signature { parameters, ret }))
            }
        };

        Ok(ty)
    }

    /// Dispone todos los structs declarados.
    pub fn layout_all(&mut self) -> Vec<Located<TypeError>> {
        let mut errors = Vec::new();
        for index in 0..self.defs.len() {
            if let Err(error) = self.layout(StructId(index)) {
                errors.push(error);
            }
        }

        errors
    }

    fn layout(&mut self, id: StructId) -> Result<(), Located<TypeError>> {
        let def = &mut self.defs[id.0];
        match def.layout {
            Layout::Resolved { .. } => return Ok(()),
            Layout::Visiting => {
                let name = def.declaration.name.clone();
                let (location, name) = name.split();

                return Err(Located::at(TypeError::RecursiveStruct(name), location));
            }

            Layout::Unvisited => def.layout = Layout::Visiting,
        }

        let declarations = def.declaration.fields.clone();
        let result = self.compute(&declarations);

        // Un struct erróneo queda vacío para no repetir el error
        let (size, fields) = match &result {
            Ok((size, fields)) => (*size, fields.clone()),
            Err(_) => (1, Vec::new()),
        };

        self.defs[id.0].layout = Layout::Resolved { size, fields };
        result.map(|_| ())
    }

    fn compute(
        &mut self,
        declarations: &[crate::ast::FieldDeclaration],
    ) -> Result<(u16, Vec<Field>), Located<TypeError>> {
        let mut fields: Vec<Field> = Vec::with_capacity(declarations.len());
        let mut offset = 0u16;
        let mut bit = 0u32;

        for declaration in declarations {
            let (location, name) = declaration.name.clone().split();
            if fields.iter().any(|field| field.name == name) {
                return Err(Located::at(TypeError::DuplicateField(name), location));
            }

            let ty = self.resolve(&declaration.ty)?;
            match &ty {
                Type::Void => return Err(Located::at(TypeError::VoidField(name), location)),
                Type::Struct(inner) => self.layout(*inner).map_err(|error| {
                    let (_, error) = error.split();
                    Located::at(error, location.clone())
                })?,

                _ => (),
            }

            match &declaration.bits {
                Some(bits) => {
                    let size = *bits.val();
                    if !(1..=WORD_BITS).contains(&size) {
                        let error = TypeError::InvalidBitSize(name);
                        return Err(Located::at(error, bits.location().clone()));
                    } else if !matches!(ty, Type::Integer | Type::Boolean | Type::Char) {
                        return Err(Located::at(TypeError::BitFieldType(name), location));
                    }

                    if bit + size > WORD_BITS {
                        offset += 1;
                        bit = 0;
                    }

                    fields.push(Field {
                        name,
                        ty,
                        offset,
                        bits: Some(BitRange {
                            offset: bit as u8,
                            size: size as u8,
                        }),
                    });

                    bit += size;
                    if bit == WORD_BITS {
                        offset += 1;
                        bit = 0;
                    }
                }

                None => {
                    if bit > 0 {
                        offset += 1;
                        bit = 0;
                    }

                    let size = ty.size(self);
                    fields.push(Field {
                        name,
                        ty,
                        offset,
                        bits: None,
                    });

                    offset += size;
                }
            }
        }

        let size = offset + (bit > 0) as u16;
        Ok((size.max(1), fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, parse, source::{consume, Source}, ast::StatementKind};
    use pretty_assertions::assert_eq;

    fn structs(text: &str) -> (Structs, Vec<Located<TypeError>>) {
        let source = Source::new("test.yabal", text);
        let (eof, chars) = consume(&source);
        let tokens = Lexer::new(chars).try_exhaustive().unwrap();
        let program = parse::parse(&tokens, eof).unwrap();

        let mut structs = Structs::default();
        for statement in &program.statements {
            if let StatementKind::Struct(declaration) = &statement.kind {
                structs.declare(declaration).unwrap();
            }
        }

        let errors = structs.layout_all();
        (structs, errors)
    }

    fn bits(structs: &Structs, id: StructId, name: &str) -> (u16, Option<(u8, u8)>) {
        let field = structs.field(id, name).unwrap();
        (field.offset, field.bits.map(|bits| (bits.offset, bits.size)))
    }

    #[test]
    fn bit_fields_share_words() {
        let (structs, errors) = structs(
            "struct MouseInput { int y : 7; int x : 7; bool left : 1; bool right : 1 }
             struct Cell { bool updated; int type : 5; int rot : 2 }",
        );

        assert!(errors.is_empty());

        let mouse = structs.lookup(&Identifier::from("MouseInput")).unwrap();
        assert_eq!(structs.size(mouse), 1);
        assert_eq!(bits(&structs, mouse, "y"), (0, Some((0, 7))));
        assert_eq!(bits(&structs, mouse, "x"), (0, Some((7, 7))));
        assert_eq!(bits(&structs, mouse, "right"), (0, Some((15, 1))));

        let cell = structs.lookup(&Identifier::from("Cell")).unwrap();
        assert_eq!(structs.size(cell), 2);
        assert_eq!(bits(&structs, cell, "updated"), (0, None));
        assert_eq!(bits(&structs, cell, "type"), (1, Some((0, 5))));
        assert_eq!(bits(&structs, cell, "rot"), (1, Some((5, 2))));
    }

    #[test]
    fn overflowing_bits_move_to_next_word() {
        let (structs, errors) = structs("struct S { int a : 10; int b : 10; int c }");
        assert!(errors.is_empty());

        let id = structs.lookup(&Identifier::from("S")).unwrap();
        assert_eq!(bits(&structs, id, "b"), (1, Some((0, 10))));
        assert_eq!(bits(&structs, id, "c"), (2, None));
        assert_eq!(structs.size(id), 3);
    }

    #[test]
    fn nested_structs_are_laid_out_first() {
        let (structs, errors) = structs(
            "struct Outer { Inner a; int b }
             struct Inner { int x; int y; int z }",
        );

        assert!(errors.is_empty());

        let outer = structs.lookup(&Identifier::from("Outer")).unwrap();
        assert_eq!(structs.size(outer), 4);
        assert_eq!(bits(&structs, outer, "b"), (3, None));
    }

    #[test]
    fn self_containment_is_rejected() {
        let (_, errors) = structs("struct A { B b } struct B { A a }");
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].val(), TypeError::RecursiveStruct(_)));
    }

    #[test]
    fn bit_sizes_are_checked() {
        let (_, errors) = structs("struct A { int a : 17 } struct B { int[] p : 3 }");
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0].val(), TypeError::InvalidBitSize(_)));
        assert!(matches!(errors[1].val(), TypeError::BitFieldType(_)));
    }

    #[test]
    fn masks() {
        let range = BitRange { offset: 4, size: 4 };
        assert_eq!(range.mask(), 0b1111);
        assert_eq!(range.shifted_mask(), 0b1111_0000);
        assert_eq!(BitRange { offset: 0, size: 16 }.mask(), 0xFFFF);
    }
}
