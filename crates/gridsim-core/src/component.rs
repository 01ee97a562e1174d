//! Simulation component identity.

use std::collections::HashMap;

/// Identifier of a simulation component.
///
/// Identifiers are assigned sequentially starting from 0 in the order components are registered.
pub type Id = u32;

/// Names of registered components, shared by the simulation and all contexts.
#[derive(Default)]
pub(crate) struct Registry {
    ids: HashMap<String, Id>,
    names: Vec<String>,
}

impl Registry {
    /// Returns the id of the named component, registering the name on first use.
    pub fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as Id;
        self.ids.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }

    pub fn id(&self, name: &str) -> Option<Id> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: Id) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }
}
