//! Arena storage for IR entities
//!
//! Variables, labels and declarations are owned by arenas on the module and
//! referred to by index. Identity is index equality, so rewrites never have
//! to reason about aliased nodes.

use crate::tast::id_types::{define_id_type, IdType};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

define_id_type! {
    /// A local variable or compiler temporary
    VarId
}

define_id_type! {
    /// A labeled construct (loop, switch or block) usable as a jump target
    LabelId
}

define_id_type! {
    /// A file within the module being translated
    IrFileId
}

define_id_type! {
    ClassId
}

define_id_type! {
    FunctionId
}

define_id_type! {
    PropertyId
}

define_id_type! {
    /// Synthesized storage for state captured from an enclosing scope
    ClosureFieldId
}

define_id_type! {
    /// Synthesized storage for a delegated-to instance
    DelegateFieldId
}

/// Append-only storage keyed by an ID type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arena<I: IdType, T> {
    items: Vec<T>,
    #[serde(skip)]
    _marker: PhantomData<I>,
}

impl<I: IdType, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: IdType, T> Arena<I, T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn alloc(&mut self, item: T) -> I {
        let id = I::from_raw(self.items.len() as u32);
        self.items.push(item);
        id
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.items.get(id.index())
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.items.get_mut(id.index())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = I> {
        (0..self.items.len() as u32).map(I::from_raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (I::from_raw(i as u32), item))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, item)| (I::from_raw(i as u32), item))
    }
}

impl<I: IdType, T> std::ops::Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        &self.items[id.index()]
    }
}

impl<I: IdType, T> std::ops::IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        &mut self.items[id.index()]
    }
}
