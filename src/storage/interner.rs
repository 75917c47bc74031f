use dashmap::DashMap;
use parking_lot::RwLock;

/// Process-wide name interning: label, edge-type and property names map to
/// stable small integer ids. Names are never unmapped.
#[derive(Debug, Default)]
pub struct NameIdMapper {
    ids: DashMap<String, u32>,
    names: RwLock<Vec<String>>,
}

impl NameIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, interning it on first use.
    pub fn intern(&self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        *self.ids.entry(name.to_owned()).or_insert_with(|| {
            let mut names = self.names.write();
            let id = names.len() as u32;
            names.push(name.to_owned());
            id
        })
    }

    /// Non-interning lookup.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).map(|id| *id)
    }

    pub fn name_of(&self, id: u32) -> String {
        let names = self.names.read();
        names
            .get(id as usize)
            .cloned()
            .unwrap_or_else(|| format!("<unknown:{id}>"))
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let mapper = NameIdMapper::new();
        let a = mapper.intern("Person");
        let b = mapper.intern("City");
        assert_ne!(a, b);
        assert_eq!(mapper.intern("Person"), a);
        assert_eq!(mapper.get("Person"), Some(a));
        assert_eq!(mapper.get("Animal"), None);
        assert_eq!(mapper.name_of(b), "City");
    }
}
