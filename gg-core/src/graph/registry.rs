//! Identity Registry
//!
//! Maps objects to node ids by reference identity. Two objects that compare
//! equal but live at different addresses get different ids; the same object
//! seen twice gets the same id.
//!
//! The registry keeps a clone of every object it has seen. That keeps the
//! object's allocation alive, so its address can never be reused by another
//! object while the registry exists.

use std::sync::Arc;

use indexmap::IndexMap;

use super::node::NodeId;

/// Objects that have a reference identity.
pub trait Identity {
    /// An address that is unique among live objects.
    fn identity(&self) -> usize;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn identity(&self) -> usize {
        Arc::as_ptr(self) as *const () as usize
    }
}

/// Sequential id allocation keyed by identity.
///
/// Backed by an insertion-ordered map, so an object's index in the map is
/// its id.
#[derive(Debug)]
pub struct IdentityRegistry<T> {
    objects: IndexMap<usize, T>,
}

impl<T: Identity + Clone> IdentityRegistry<T> {
    pub fn new() -> Self {
        Self {
            objects: IndexMap::new(),
        }
    }

    /// Look up or allocate the id for `obj`.
    ///
    /// The flag is `true` when the id was allocated by this call.
    pub fn id_of(&mut self, obj: &T) -> (NodeId, bool) {
        let key = obj.identity();
        if let Some(index) = self.objects.get_index_of(&key) {
            return (NodeId::from_index(index), false);
        }
        let (index, _) = self.objects.insert_full(key, obj.clone());
        (NodeId::from_index(index), true)
    }

    /// Id of `obj` if it has been seen.
    pub fn get_id(&self, obj: &T) -> Option<NodeId> {
        self.objects
            .get_index_of(&obj.identity())
            .map(NodeId::from_index)
    }

    /// The object registered under `id`.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.objects.get_index(id.index()).map(|(_, obj)| obj)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T: Identity + Clone> Default for IdentityRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
