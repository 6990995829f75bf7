use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::types::TypeInfo;

/// A named entity. The type is refined after creation (declarations
/// set their base type once the full declarator list has been read),
/// so it sits behind a `RefCell` shared between the table and every
/// AST leaf referring to the symbol.
#[derive(Debug)]
pub struct Symbol {
    pub id: String,
    pub ty: RefCell<TypeInfo>,
}

pub type SymbolRef = Rc<Symbol>;

/// Stack of scopes, each mapping a name to its symbol. Lookup walks
/// from the innermost scope outwards; insertion always targets the
/// innermost scope except for functions, which live in the global one.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, SymbolRef>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Drop the innermost scope and all of its entries. The global
    /// scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolRef> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    pub fn lookup_current_scope(&self, name: &str) -> Option<SymbolRef> {
        self.scopes
            .last()
            .and_then(|scope| scope.get(name).cloned())
    }

    /// Insert `name` into the innermost scope. A missing type defaults
    /// to plain `int`.
    pub fn add(&mut self, name: &str, ty: Option<TypeInfo>) -> SymbolRef {
        let sym = Rc::new(Symbol {
            id: name.to_owned(),
            ty: RefCell::new(ty.unwrap_or_else(TypeInfo::int)),
        });
        self.scopes
            .last_mut()
            .expect("symbol table always has a global scope")
            .insert(name.to_owned(), Rc::clone(&sym));
        sym
    }

    /// Insert a function into the global scope with the function
    /// property bit set on its return type.
    pub fn add_function(&mut self, name: &str, ret: TypeInfo) -> SymbolRef {
        let ty = TypeInfo {
            flags: ret.flags.with_func(),
            def: ret.def,
        };
        let sym = Rc::new(Symbol {
            id: name.to_owned(),
            ty: RefCell::new(ty),
        });
        self.scopes[0].insert(name.to_owned(), Rc::clone(&sym));
        sym
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}
