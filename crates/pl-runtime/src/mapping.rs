use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::array::TypedArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingRole {
    Input,
    Output,
}

impl MappingRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Name to array mapping passed to the entry function.
///
/// The input mapping is filled by the host and is read-only for scripts,
/// although the arrays inside it are writable views. The output mapping
/// starts empty and accepts one array per schema dimension.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    role: MappingRole,
    names: Rc<[String]>,
    entries: Rc<RefCell<BTreeMap<String, TypedArray>>>,
}

impl ColumnMap {
    pub fn new(role: MappingRole, names: Vec<String>) -> Self {
        Self {
            role,
            names: names.into(),
            entries: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    pub fn role(&self) -> MappingRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn knows(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Host-side insertion; bypasses the script write rules.
    pub(crate) fn insert(&self, name: impl Into<String>, array: TypedArray) {
        self.entries.borrow_mut().insert(name.into(), array);
    }

    /// `Ok(None)` means the name is valid but nothing was stored yet.
    pub fn get(&self, name: &str) -> Result<Option<TypedArray>, String> {
        if let Some(array) = self.entries.borrow().get(name) {
            return Ok(Some(array.clone()));
        }
        if self.role == MappingRole::Output && self.knows(name) {
            return Ok(None);
        }
        Err(format!(
            "\"{}\" is not a dimension of the {} mapping.",
            name,
            self.role.as_str()
        ))
    }

    /// Script-side assignment.
    pub fn assign(&self, name: &str, array: TypedArray) -> Result<(), String> {
        match self.role {
            MappingRole::Input => {
                // Chained index writes (`input["Z"][0] = v`) store the same
                // view back after mutating it.
                let entries = self.entries.borrow();
                match entries.get(name) {
                    Some(current) if current.shares_storage(&array) => Ok(()),
                    _ => Err(format!(
                        "The input mapping is read-only; cannot replace \"{}\".",
                        name
                    )),
                }
            }
            MappingRole::Output => {
                if !self.knows(name) {
                    return Err(format!(
                        "\"{}\" is not a dimension of the output schema.",
                        name
                    ));
                }
                self.entries.borrow_mut().insert(name.to_string(), array);
                Ok(())
            }
        }
    }

    /// Stored names in schema order.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.borrow();
        self.names
            .iter()
            .filter(|name| entries.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, TypedArray)> {
        let entries = self.entries.borrow();
        let mut ordered = self
            .names
            .iter()
            .filter_map(|name| entries.get(name).map(|array| (name.clone(), array.clone())))
            .collect::<Vec<_>>();
        // Host insertions may use names outside the schema.
        for (name, array) in entries.iter() {
            if !self.knows(name) {
                ordered.push((name.clone(), array.clone()));
            }
        }
        ordered
    }

    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}
