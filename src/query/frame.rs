use std::fmt;

use crate::query::value::QueryValue;

/// Position of a named variable on the frame.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Symbol(pub usize);

/// Maps variable names to frame positions. Filled by the planner (or the
/// test building the operator tree), fixed for the execution.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the symbol for `name`, creating it on first use.
    pub fn declare(&mut self, name: &str) -> Symbol {
        if let Some(position) = self.names.iter().position(|have| have == name) {
            return Symbol(position);
        }
        self.names.push(name.to_owned());
        Symbol(self.names.len() - 1)
    }

    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.names.iter().position(|have| have == name).map(Symbol)
    }

    pub fn name_of(&self, symbol: Symbol) -> &str {
        self.names.get(symbol.0).map(String::as_str).unwrap_or("?")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The symbol-indexed value vector cursors read from and write to.
#[derive(Clone)]
pub struct Frame {
    values: Vec<QueryValue>,
}

impl Frame {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![QueryValue::Null; size],
        }
    }

    pub fn get(&self, symbol: Symbol) -> &QueryValue {
        &self.values[symbol.0]
    }

    pub fn set(&mut self, symbol: Symbol, value: QueryValue) {
        self.values[symbol.0] = value;
    }

    pub fn take(&mut self, symbol: Symbol) -> QueryValue {
        std::mem::replace(&mut self.values[symbol.0], QueryValue::Null)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot of selected symbols, used by materializing operators.
    pub fn collect(&self, symbols: &[Symbol]) -> Vec<QueryValue> {
        symbols.iter().map(|symbol| self.get(*symbol).clone()).collect()
    }

    /// Restores previously collected symbol values.
    pub fn restore(&mut self, symbols: &[Symbol], values: &[QueryValue]) {
        for (symbol, value) in symbols.iter().zip(values.iter()) {
            self.set(*symbol, value.clone());
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}
