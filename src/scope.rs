//! Ámbitos léxicos y asignación de almacenamiento.
//!
//! Los ámbitos viven en una arena y se refieren entre sí por
//! [`ScopeId`]. Cada ámbito tiene dos padres: uno léxico, para
//! resolución de nombres, y uno de almacenamiento, del cual copia sus
//! contadores de celdas. Ambos coinciden excepto en expansiones en
//! línea, cuyos nombres se resuelven desde el ámbito que declaró la
//! función pero cuyas celdas se toman del sitio de llamada.
//!
//! Las celdas se asignan por posición paralela: la n-ésima variable de
//! tamaño `s` de un ámbito ocupa la n-ésima celda de tamaño `s` de su
//! pool, de manera que bloques hermanos comparten almacenamiento. Los
//! temporales siempre son celdas nuevas o liberadas previamente en el
//! mismo ámbito raíz, nunca celdas indexadas.

use std::collections::HashMap;

use crate::{
    arch::MAX_DATA,
    ast::Namespace,
    driver::FunctionId,
    lex::Identifier,
    link::{PointerId, PointerTable},
    source::Location,
    types::Type,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(usize);

/// Clase de almacenamiento.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Variables fuera de toda función.
    Global,

    /// Celdas que se guardan en el marco en cada llamada.
    Stack,

    /// Temporales fuera de toda función.
    Temporary,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Program,

    /// Nivel superior de un archivo importado.
    File,

    Function(FunctionId),
    Inline(FunctionId),
    Block,
    Loop,
}

pub struct Scope {
    kind: ScopeKind,
    parent: Option<ScopeId>,
    storage: Option<ScopeId>,
    variables: HashMap<Identifier, VariableId>,
    labels: HashMap<Identifier, PointerId>,
    namespace: Namespace,
    uses: Vec<Namespace>,
    counters: HashMap<u16, usize>,
    free: HashMap<u16, Vec<PointerId>>,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<ScopeId>, storage: Option<ScopeId>) -> Self {
        Scope {
            kind,
            parent,
            storage,
            variables: HashMap::new(),
            labels: HashMap::new(),
            namespace: Namespace::global(),
            uses: Vec::new(),
            counters: HashMap::new(),
            free: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn uses(&self) -> &[Namespace] {
        &self.uses
    }

    fn is_root(&self) -> bool {
        matches!(
            self.kind,
            ScopeKind::Program | ScopeKind::File | ScopeKind::Function(_)
        )
    }
}

/// Una variable declarada, parámetro o local de expansión en línea.
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: Identifier,
    pub location: Location,
    pub ty: Type,
    pub cell: PointerId,
    pub pool: Pool,

    /// Ámbito en que se declaró.
    pub scope: ScopeId,

    /// Ámbito raíz dueño de la celda.
    pub root: ScopeId,

    /// Declarada con `const`.
    pub constant: bool,

    /// Ninguna escritura tras la inicialización.
    pub unmodified: bool,

    /// Valor inicial, para propagación de literales.
    pub initializer: Option<crate::ast::Expr>,

    /// Lecturas que sobreviven a la optimización.
    pub reads: usize,

    /// Se tomó su dirección o se pasó por referencia.
    pub referenced: bool,

    /// Excluida de la salida.
    pub removed: bool,
}

/// Arena de variables.
#[derive(Default)]
pub struct Variables(Vec<Variable>);

impl Variables {
    pub fn push(&mut self, variable: Variable) -> VariableId {
        self.0.push(variable);
        VariableId(self.0.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, variable)| (VariableId(index), variable))
    }
}

impl std::ops::Index<VariableId> for Variables {
    type Output = Variable;

    fn index(&self, VariableId(id): VariableId) -> &Variable {
        &self.0[id]
    }
}

impl std::ops::IndexMut<VariableId> for Variables {
    fn index_mut(&mut self, VariableId(id): VariableId) -> &mut Variable {
        &mut self.0[id]
    }
}

/// Una celda de almacenamiento creada.
#[derive(Copy, Clone, Debug)]
pub struct Cell {
    pub id: PointerId,
    pub pool: Pool,
    pub size: u16,
}

/// Pools de celdas de una compilación.
///
/// Las celdas se disponen en la cabecera en orden de creación a partir
/// de `next`, así que la dirección de cada una se conoce al crearla.
#[derive(Default)]
pub struct Storage {
    cells: Vec<Cell>,
    slots: HashMap<(Pool, Option<ScopeId>, u16), Vec<PointerId>>,
    frame: HashMap<PointerId, u16>,
    frame_size: u16,
    next: u32,
}

impl Storage {
    /// Pools cuya primera celda se ubicará en `address`.
    pub fn starting_at(address: u16) -> Self {
        Storage {
            next: u32::from(address),
            ..Storage::default()
        }
    }

    /// Celda por posición paralela.
    ///
    /// Las celdas globales se indexan además por ámbito raíz, ya que
    /// cada archivo mantiene vivas sus variables globales. Las celdas de
    /// pila se comparten entre funciones, pues cada llamada las guarda.
    fn slot(
        &mut self,
        table: &mut PointerTable,
        pool: Pool,
        root: Option<ScopeId>,
        size: u16,
        index: usize,
    ) -> PointerId {
        let key = (pool, root, size);
        while self.slots.get(&key).map_or(0, Vec::len) <= index {
            let id = self.fresh(table, pool, size);
            self.slots.entry(key).or_default().push(id);
        }

        self.slots[&key][index]
    }

    /// Celda nueva, nunca compartida por posición.
    fn fresh(&mut self, table: &mut PointerTable, pool: Pool, size: u16) -> PointerId {
        let prefix = match pool {
            Pool::Global => "global",
            Pool::Stack => "stack",
            Pool::Temporary => "temp",
        };

        let small = self.next + u32::from(size) <= u32::from(MAX_DATA) + 1;
        self.next += u32::from(size);

        let id = table.storage(format!("{}_{}", prefix, self.cells.len()), size, small);
        if pool == Pool::Stack {
            self.frame.insert(id, self.frame_size);
            self.frame_size += size;
        }

        self.cells.push(Cell { id, pool, size });
        id
    }

    /// Celda del parámetro `index` de tamaño `size` de cualquier función.
    ///
    /// Coincide con la celda que recibe el parámetro al asignarse desde
    /// un ámbito de función recién creado.
    pub fn parameter(&mut self, table: &mut PointerTable, size: u16, index: usize) -> PointerId {
        self.slot(table, Pool::Stack, None, size, index)
    }

    /// Celdas en orden de creación.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Desplazamiento de una celda de pila dentro del marco.
    pub fn frame_offset(&self, id: PointerId) -> Option<u16> {
        self.frame.get(&id).copied()
    }

    /// Palabras que se guardan por llamada.
    pub fn frame_size(&self) -> u16 {
        self.frame_size
    }
}

/// Arena de ámbitos.
pub struct Scopes {
    scopes: Vec<Scope>,
}

impl Scopes {
    /// Crea la arena con el ámbito raíz del programa.
    pub fn new() -> (Self, ScopeId) {
        let scopes = Scopes {
            scopes: vec![Scope::new(ScopeKind::Program, None, None)],
        };

        (scopes, ScopeId(0))
    }

    fn insert(&mut self, scope: Scope) -> ScopeId {
        self.scopes.push(scope);
        ScopeId(self.scopes.len() - 1)
    }

    /// Bloque anidado que comparte pool con su padre.
    pub fn block(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        let mut scope = Scope::new(kind, Some(parent), Some(parent));
        scope.counters = self[parent].counters.clone();
        scope.namespace = self[parent].namespace.clone();
        scope.uses = self[parent].uses.clone();

        self.insert(scope)
    }

    /// Nivel superior de un archivo importado.
    pub fn file(&mut self, parent: ScopeId) -> ScopeId {
        self.insert(Scope::new(ScopeKind::File, Some(parent), None))
    }

    /// Cuerpo de función, con contadores desde cero.
    pub fn function(&mut self, parent: ScopeId, function: FunctionId) -> ScopeId {
        let mut scope = Scope::new(ScopeKind::Function(function), Some(parent), None);
        scope.namespace = self[parent].namespace.clone();
        scope.uses = self[parent].uses.clone();

        self.insert(scope)
    }

    /// Expansión en línea: nombres desde `declaring`, celdas desde `site`.
    pub fn inline(&mut self, declaring: ScopeId, site: ScopeId, function: FunctionId) -> ScopeId {
        let mut scope = Scope::new(ScopeKind::Inline(function), Some(declaring), Some(site));
        scope.counters = self[site].counters.clone();
        scope.namespace = self[declaring].namespace.clone();
        scope.uses = self[declaring].uses.clone();

        self.insert(scope)
    }

    pub fn set_namespace(&mut self, scope: ScopeId, namespace: Namespace) {
        self[scope].namespace = namespace;
    }

    pub fn add_use(&mut self, scope: ScopeId, namespace: Namespace) {
        self[scope].uses.push(namespace);
    }

    /// Ámbito raíz que posee las celdas de `scope`.
    pub fn root(&self, mut scope: ScopeId) -> ScopeId {
        loop {
            let current = &self[scope];
            match current.storage {
                Some(storage) if !current.is_root() => scope = storage,
                _ => return scope,
            }
        }
    }

    /// Pool de las variables declaradas en `scope`.
    pub fn pool(&self, scope: ScopeId) -> Pool {
        match self[self.root(scope)].kind {
            ScopeKind::Program | ScopeKind::File => Pool::Global,
            _ => Pool::Stack,
        }
    }

    /// Función cuyo marco contiene a `scope`, si existe.
    pub fn frame_owner(&self, scope: ScopeId) -> Option<FunctionId> {
        match self[self.root(scope)].kind {
            ScopeKind::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Función en la que aparece `scope` léxicamente.
    pub fn function_of(&self, mut scope: ScopeId) -> Option<FunctionId> {
        loop {
            match self[scope].kind {
                ScopeKind::Function(function) | ScopeKind::Inline(function) => {
                    return Some(function)
                }

                ScopeKind::Program | ScopeKind::File => return None,
                _ => scope = self[scope].parent?,
            }
        }
    }

    /// Determina si `outer` es `inner` o uno de sus ancestros léxicos.
    pub fn encloses(&self, outer: ScopeId, mut inner: ScopeId) -> bool {
        loop {
            if inner == outer {
                return true;
            }

            match self[inner].parent {
                Some(parent) => inner = parent,
                None => return false,
            }
        }
    }

    /// Determina si hay un ciclo envolvente dentro de la misma función.
    pub fn in_loop(&self, mut scope: ScopeId) -> bool {
        loop {
            match self[scope].kind {
                ScopeKind::Loop => return true,
                ScopeKind::Block => match self[scope].parent {
                    Some(parent) => scope = parent,
                    None => return false,
                },

                _ => return false,
            }
        }
    }

    /// Asigna la celda de una variable nueva.
    pub fn allocate(
        &mut self,
        scope: ScopeId,
        size: u16,
        storage: &mut Storage,
        table: &mut PointerTable,
    ) -> PointerId {
        let pool = self.pool(scope);
        let root = match pool {
            Pool::Global => Some(self.root(scope)),
            _ => None,
        };

        let counter = self[scope].counters.entry(size).or_insert(0);
        let index = *counter;
        *counter += 1;

        storage.slot(table, pool, root, size, index)
    }

    /// Solicita un temporal.
    pub fn temporary(
        &mut self,
        scope: ScopeId,
        size: u16,
        storage: &mut Storage,
        table: &mut PointerTable,
    ) -> PointerId {
        let root = self.root(scope);
        if let Some(id) = self[root].free.get_mut(&size).and_then(Vec::pop) {
            return id;
        }

        let pool = match self[root].kind {
            ScopeKind::Program | ScopeKind::File => Pool::Temporary,
            _ => Pool::Stack,
        };

        storage.fresh(table, pool, size)
    }

    /// Devuelve un temporal a su ámbito raíz.
    pub fn release(&mut self, scope: ScopeId, id: PointerId, size: u16) {
        let root = self.root(scope);
        self[root].free.entry(size).or_default().push(id);
    }

    /// Registra una variable, devolviendo la anterior si ya existe en este ámbito.
    pub fn declare_variable(
        &mut self,
        scope: ScopeId,
        name: Identifier,
        variable: VariableId,
    ) -> Result<(), VariableId> {
        match self[scope].variables.get(&name) {
            Some(existing) => Err(*existing),
            None => {
                self[scope].variables.insert(name, variable);
                Ok(())
            }
        }
    }

    pub fn lookup_variable(&self, mut scope: ScopeId, name: &Identifier) -> Option<VariableId> {
        loop {
            if let Some(variable) = self[scope].variables.get(name) {
                return Some(*variable);
            }

            scope = self[scope].parent?;
        }
    }

    /// Registra una etiqueta de `goto`.
    pub fn declare_label(
        &mut self,
        scope: ScopeId,
        name: Identifier,
        label: PointerId,
    ) -> Result<(), PointerId> {
        match self[scope].labels.get(&name) {
            Some(existing) => Err(*existing),
            None => {
                self[scope].labels.insert(name, label);
                Ok(())
            }
        }
    }

    /// Busca una etiqueta sin salir de la función actual.
    pub fn lookup_label(&self, mut scope: ScopeId, name: &Identifier) -> Option<PointerId> {
        loop {
            let current = &self[scope];
            if let Some(label) = current.labels.get(name) {
                return Some(*label);
            }

            match current.kind {
                ScopeKind::Block | ScopeKind::Loop => scope = current.parent?,
                _ => return None,
            }
        }
    }
}

impl std::ops::Index<ScopeId> for Scopes {
    type Output = Scope;

    fn index(&self, ScopeId(id): ScopeId) -> &Scope {
        &self.scopes[id]
    }
}

impl std::ops::IndexMut<ScopeId> for Scopes {
    fn index_mut(&mut self, ScopeId(id): ScopeId) -> &mut Scope {
        &mut self.scopes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn siblings_share_slots() {
        let (mut scopes, root) = Scopes::new();
        let mut storage = Storage::default();
        let mut table = PointerTable::default();

        let a = scopes.allocate(root, 1, &mut storage, &mut table);
        let first = scopes.block(root, ScopeKind::Block);
        let second = scopes.block(root, ScopeKind::Block);

        let x = scopes.allocate(first, 1, &mut storage, &mut table);
        let y = scopes.allocate(second, 1, &mut storage, &mut table);
        let wide = scopes.allocate(second, 2, &mut storage, &mut table);

        assert_eq!(x, y);
        assert_ne!(a, x);
        assert_ne!(wide, y);
        assert_eq!(storage.cells().len(), 3);
    }

    #[test]
    fn temporaries_are_reused_per_root() {
        let (mut scopes, root) = Scopes::new();
        let mut storage = Storage::default();
        let mut table = PointerTable::default();

        let block = scopes.block(root, ScopeKind::Block);
        let temp = scopes.temporary(block, 1, &mut storage, &mut table);
        scopes.release(block, temp, 1);

        assert_eq!(scopes.temporary(root, 1, &mut storage, &mut table), temp);
        assert_ne!(scopes.temporary(root, 1, &mut storage, &mut table), temp);
        assert_eq!(storage.cells()[0].pool, Pool::Temporary);
    }

    #[test]
    fn stack_cells_track_frame_offsets() {
        let (mut scopes, root) = Scopes::new();
        let mut storage = Storage::default();
        let mut table = PointerTable::default();

        let body = scopes.function(root, FunctionId::new(0));
        let wide = scopes.allocate(body, 2, &mut storage, &mut table);
        let narrow = scopes.allocate(body, 1, &mut storage, &mut table);
        let temp = scopes.temporary(body, 1, &mut storage, &mut table);

        assert_eq!(scopes.pool(body), Pool::Stack);
        assert_eq!(storage.frame_offset(wide), Some(0));
        assert_eq!(storage.frame_offset(narrow), Some(2));
        assert_eq!(storage.frame_offset(temp), Some(3));
        assert_eq!(storage.frame_size(), 4);
    }

    #[test]
    fn inline_scopes_allocate_after_call_site() {
        let (mut scopes, root) = Scopes::new();
        let mut storage = Storage::default();
        let mut table = PointerTable::default();

        let caller = scopes.function(root, FunctionId::new(0));
        let local = scopes.allocate(caller, 1, &mut storage, &mut table);

        let site = scopes.inline(root, caller, FunctionId::new(1));
        let parameter = scopes.allocate(site, 1, &mut storage, &mut table);

        assert_ne!(local, parameter);
        assert_eq!(scopes.pool(site), Pool::Stack);
        assert_eq!(scopes.root(site), caller);
        assert_eq!(scopes.function_of(site), Some(FunctionId::new(1)));
        assert_eq!(scopes.frame_owner(site), Some(FunctionId::new(0)));
    }

    #[test]
    fn files_keep_their_own_globals() {
        let (mut scopes, root) = Scopes::new();
        let mut storage = Storage::default();
        let mut table = PointerTable::default();

        let file = scopes.file(root);
        let imported = scopes.allocate(file, 1, &mut storage, &mut table);
        let local = scopes.allocate(root, 1, &mut storage, &mut table);

        assert_ne!(imported, local);
        assert_eq!(scopes.pool(file), Pool::Global);
        assert_eq!(scopes.root(file), file);
    }

    #[test]
    fn cells_past_the_immediate_range_are_large() {
        let (mut scopes, root) = Scopes::new();
        let mut storage = Storage::starting_at(1000);
        let mut table = PointerTable::default();

        let near = scopes.allocate(root, 20, &mut storage, &mut table);
        let edge = scopes.allocate(root, 4, &mut storage, &mut table);
        let far = scopes.allocate(root, 1, &mut storage, &mut table);

        assert!(table.is_small(near));
        assert!(table.is_small(edge));
        assert!(!table.is_small(far));

        let wide = scopes.allocate(root, 20, &mut storage, &mut table);
        assert!(!table.is_small(wide));
    }

    #[test]
    fn labels_stop_at_functions() {
        let (mut scopes, root) = Scopes::new();
        let mut table = PointerTable::default();
        let name = Identifier::from("outer");

        let label = table.label("outer");
        scopes.declare_label(root, name.clone(), label).unwrap();

        let block = scopes.block(root, ScopeKind::Loop);
        let body = scopes.function(block, FunctionId::new(0));

        assert_eq!(scopes.lookup_label(block, &name), Some(label));
        assert_eq!(scopes.lookup_label(body, &name), None);
        assert!(scopes.in_loop(block));
        assert!(!scopes.in_loop(body));
    }
}
