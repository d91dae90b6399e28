use crate::block::BlockId;
use crate::precedence::{EmittedExpr, ValueType};
use std::collections::{HashMap, HashSet};

const RESERVED: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "false", "final", "finally",
    "float", "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "null", "package", "private", "protected", "public", "return", "short",
    "static", "strictfp", "super", "switch", "synchronized", "this", "throw", "throws",
    "transient", "true", "try", "var", "void", "volatile", "while", "String", "length", "main",
    "highlightBlock", "move_up", "move_down", "move_left", "move_right", "fireball", "interact",
    "rest", "push", "pull", "pickup", "move_to_exit", "drop_item", "print", "isNearWall", "abs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Variable,
    Array,
    Function,
}

impl SymbolKind {
    fn namespace(self) -> Namespace {
        match self {
            SymbolKind::Variable | SymbolKind::Array => Namespace::Value,
            SymbolKind::Function => Namespace::Function,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Namespace {
    Value,
    Function,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    /// Name as shown in the editor.
    pub name: String,
    /// Identifier used in generated code.
    pub ident: String,
    pub kind: SymbolKind,
    pub ty: ValueType,
    /// First block whose code mentioned the symbol in this pass.
    pub first_block: Option<BlockId>,
    value: Option<EmittedExpr>,
    typed: bool,
    pinned: bool,
    declared: bool,
}

/// Result of reading a variable: the folded literal when one is known, else its identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    Value(&'a EmittedExpr),
    Name(&'a str),
}

/// Names known to one generation pass. A fresh table is built for every pass.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_key: HashMap<(Namespace, String), usize>,
    taken: HashSet<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name`, returning its identifier. Redeclaring overwrites the kind.
    pub fn declare(&mut self, name: &str, kind: SymbolKind) -> &str {
        let key = (kind.namespace(), name.to_string());
        let pos = match self.by_key.get(&key) {
            Some(&pos) => {
                self.symbols[pos].kind = kind;
                pos
            }
            None => {
                let ident = self.fresh(&sanitize_identifier(name));
                self.symbols.push(Symbol {
                    name: name.to_string(),
                    ident,
                    kind,
                    ty: ValueType::Int,
                    first_block: None,
                    value: None,
                    typed: false,
                    pinned: false,
                    declared: false,
                });
                let pos = self.symbols.len() - 1;
                self.by_key.insert(key, pos);
                pos
            }
        };
        &self.symbols[pos].ident
    }

    /// Declares `name` and records `block` as its first user if none is recorded yet.
    pub fn reference(&mut self, name: &str, kind: SymbolKind, block: &str) -> String {
        self.declare(name, kind);
        let symbol = self.symbol_mut(name, kind.namespace());
        if symbol.first_block.is_none() {
            symbol.first_block = Some(block.to_string());
        }
        symbol.ident.clone()
    }

    /// Records the value last assigned to `name`. Only literals are kept, and pinned
    /// names never keep one.
    pub fn assign(&mut self, name: &str, value: Option<EmittedExpr>) {
        let symbol = self.value_symbol(name);
        symbol.value = if symbol.pinned { None } else { value };
    }

    /// Fixes the declared type of `name` from its first assignment; later calls are ignored.
    pub fn infer_type(&mut self, name: &str, ty: ValueType) {
        let symbol = self.value_symbol(name);
        if !symbol.typed {
            symbol.typed = true;
            symbol.ty = ty;
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Lookup<'_>> {
        let pos = *self.by_key.get(&(Namespace::Value, name.to_string()))?;
        let symbol = &self.symbols[pos];
        Some(match &symbol.value {
            Some(value) => Lookup::Value(value),
            None => Lookup::Name(&symbol.ident),
        })
    }

    pub fn get(&self, name: &str, kind: SymbolKind) -> Option<&Symbol> {
        self.by_key
            .get(&(kind.namespace(), name.to_string()))
            .map(|&pos| &self.symbols[pos])
    }

    /// Excludes `name` from value folding for the rest of the pass.
    pub fn pin(&mut self, name: &str) {
        let symbol = self.value_symbol(name);
        symbol.pinned = true;
        symbol.value = None;
    }

    /// Marks `name` as declared in the emitted text. Returns true the first time.
    pub fn mark_declared(&mut self, name: &str) -> bool {
        let symbol = self.value_symbol(name);
        !std::mem::replace(&mut symbol.declared, true)
    }

    /// Reserves an identifier starting with `base` that no other symbol uses.
    pub fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{}{}", base, suffix);
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }

    /// Value symbols that were referenced during the pass, in first-reference order.
    pub fn referenced_values(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols
            .iter()
            .filter(|s| s.kind != SymbolKind::Function && s.first_block.is_some())
    }

    /// The value symbol for `name`, declared as a scalar when unknown. An existing kind is kept.
    fn value_symbol(&mut self, name: &str) -> &mut Symbol {
        if !self.by_key.contains_key(&(Namespace::Value, name.to_string())) {
            self.declare(name, SymbolKind::Variable);
        }
        self.symbol_mut(name, Namespace::Value)
    }

    fn symbol_mut(&mut self, name: &str, namespace: Namespace) -> &mut Symbol {
        let pos = self.by_key[&(namespace, name.to_string())];
        &mut self.symbols[pos]
    }
}

pub fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if RESERVED.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(sanitize_identifier("my var"), "my_var");
        assert_eq!(sanitize_identifier("2fast"), "_2fast");
        assert_eq!(sanitize_identifier("while"), "while_");
        assert_eq!(sanitize_identifier("move_up"), "move_up_");
        assert_eq!(sanitize_identifier(""), "_");
    }

    #[test]
    fn colliding_names_get_suffixes() {
        let mut table = SymbolTable::new();
        let a = table.declare("a b", SymbolKind::Variable).to_string();
        let b = table.declare("a-b", SymbolKind::Variable).to_string();
        assert_eq!(a, "a_b");
        assert_eq!(b, "a_b2");
    }

    #[test]
    fn redeclaration_overwrites_kind() {
        let mut table = SymbolTable::new();
        table.declare("x", SymbolKind::Variable);
        let ident = table.declare("x", SymbolKind::Array).to_string();
        assert_eq!(ident, "x");
        assert_eq!(table.get("x", SymbolKind::Array).map(|s| s.kind), Some(SymbolKind::Array));
    }

    #[test]
    fn lookup_prefers_cached_value() {
        let mut table = SymbolTable::new();
        table.assign("x", Some(EmittedExpr::atomic("5", ValueType::Int)));
        assert_eq!(
            table.lookup("x"),
            Some(Lookup::Value(&EmittedExpr::atomic("5", ValueType::Int)))
        );
        table.assign("x", None);
        assert_eq!(table.lookup("x"), Some(Lookup::Name("x")));
        assert_eq!(table.lookup("y"), None);
    }

    #[test]
    fn pinned_names_never_fold() {
        let mut table = SymbolTable::new();
        table.pin("x");
        table.assign("x", Some(EmittedExpr::atomic("5", ValueType::Int)));
        assert_eq!(table.lookup("x"), Some(Lookup::Name("x")));
    }

    #[test]
    fn functions_and_variables_do_not_share_entries() {
        let mut table = SymbolTable::new();
        let var = table.declare("patrol", SymbolKind::Variable).to_string();
        let func = table.declare("patrol", SymbolKind::Function).to_string();
        assert_eq!(var, "patrol");
        assert_eq!(func, "patrol2");
    }

    #[test]
    fn first_assignment_fixes_the_type() {
        let mut table = SymbolTable::new();
        table.infer_type("flag", ValueType::Bool);
        table.infer_type("flag", ValueType::Int);
        assert_eq!(table.get("flag", SymbolKind::Variable).map(|s| s.ty), Some(ValueType::Bool));
    }

    #[test]
    fn first_declaration_is_reported_once() {
        let mut table = SymbolTable::new();
        table.declare("arr", SymbolKind::Array);
        assert!(table.mark_declared("arr"));
        assert!(!table.mark_declared("arr"));
        assert_eq!(table.get("arr", SymbolKind::Array).map(|s| s.kind), Some(SymbolKind::Array));
    }

    #[test]
    fn referenced_values_keep_first_use_order() {
        let mut table = SymbolTable::new();
        table.reference("b", SymbolKind::Variable, "blk1");
        table.reference("a", SymbolKind::Array, "blk2");
        table.reference("b", SymbolKind::Variable, "blk3");
        table.reference("go", SymbolKind::Function, "blk4");
        let seen = table
            .referenced_values()
            .map(|s| (s.ident.clone(), s.first_block.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            seen,
            vec![
                ("b".to_string(), Some("blk1".to_string())),
                ("a".to_string(), Some("blk2".to_string()))
            ]
        );
    }
}
