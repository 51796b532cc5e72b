//! Copy-on-write list state
//!
//! Each record holds an `Arc<Vec<T>>`; a write copies the vector once and
//! publishes the edited copy. Concurrent edits to the same list always
//! conflict.

use std::fmt;
use std::sync::Arc;

use super::mutable_state::initial_chain;
use super::{StateId, StateObject, StateObjectRef};
use crate::mvcc::{RecordChain, ValueRecord};
use crate::snapshot::{readable, writable_with, Snapshot, SnapshotResult};

struct ListCell<T> {
    id: StateId,
    records: RecordChain,
    _items: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> StateObject for ListCell<T> {
    fn state_id(&self) -> StateId {
        self.id
    }

    fn records(&self) -> &RecordChain {
        &self.records
    }
}

/// A snapshot-isolated list.
pub struct StateList<T> {
    cell: Arc<ListCell<T>>,
}

impl<T> Clone for StateList<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StateList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            cell: Arc::new(ListCell {
                id: StateId::allocate(),
                records: initial_chain(Arc::new(items)),
                _items: std::marker::PhantomData,
            }),
        }
    }

    pub fn state_id(&self) -> StateId {
        self.cell.id
    }

    pub fn as_state_object(&self) -> StateObjectRef {
        let object: StateObjectRef = self.cell.clone();
        object
    }

    /// Items visible to `snapshot`, shared.
    pub fn items_in(&self, snapshot: &Snapshot) -> SnapshotResult<Arc<Vec<T>>> {
        let record = readable(self.cell.as_ref(), snapshot)?;
        Ok(ValueRecord::<Vec<T>>::downcast(&*record)?.value())
    }

    pub fn items(&self) -> SnapshotResult<Arc<Vec<T>>> {
        self.items_in(&Snapshot::current())
    }

    pub fn to_vec(&self) -> SnapshotResult<Vec<T>> {
        Ok(self.items()?.as_ref().clone())
    }

    pub fn len(&self) -> SnapshotResult<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> SnapshotResult<bool> {
        Ok(self.items()?.is_empty())
    }

    pub fn get(&self, index: usize) -> SnapshotResult<Option<T>> {
        Ok(self.items()?.get(index).cloned())
    }

    pub fn push(&self, item: T) -> SnapshotResult<()> {
        self.edit(move |items| items.push(item))
    }

    /// Removes the item at `index`; `None` when out of bounds.
    pub fn remove_at(&self, index: usize) -> SnapshotResult<Option<T>> {
        if index >= self.len()? {
            return Ok(None);
        }
        self.edit(move |items| (index < items.len()).then(|| items.remove(index)))
    }

    /// Empties the list. An already empty list is left unwritten.
    pub fn clear(&self) -> SnapshotResult<()> {
        if self.is_empty()? {
            return Ok(());
        }
        self.edit(|items| items.clear())
    }

    pub fn replace_all(&self, items: Vec<T>) -> SnapshotResult<()> {
        self.edit(move |current| *current = items)
    }

    /// Applies `edit` to a copy of the list in the current snapshot.
    fn edit<R>(&self, edit: impl FnOnce(&mut Vec<T>) -> R) -> SnapshotResult<R> {
        writable_with(&self.as_state_object(), &Snapshot::current(), move |record| {
            let record = ValueRecord::<Vec<T>>::downcast(&**record)?;
            let mut items = record.value().as_ref().clone();
            let result = edit(&mut items);
            record.set_value(Arc::new(items));
            Ok(result)
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Default for StateList<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: fmt::Debug + Clone + Send + Sync + 'static> fmt::Debug for StateList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.items() {
            Ok(items) => f.debug_list().entries(items.iter()).finish(),
            Err(err) => write!(f, "StateList({err})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_edits_in_global_snapshot() {
        let list = StateList::new(vec![1, 2]);
        list.push(3).unwrap();
        assert_eq!(list.to_vec().unwrap(), vec![1, 2, 3]);
        assert_eq!(list.remove_at(0).unwrap(), Some(1));
        assert_eq!(list.remove_at(9).unwrap(), None);
        assert_eq!(list.len().unwrap(), 2);
        list.clear().unwrap();
        assert!(list.is_empty().unwrap());
    }

    #[test]
    fn test_list_get() {
        let list = StateList::new(vec!["a", "b"]);
        assert_eq!(list.get(1).unwrap(), Some("b"));
        assert_eq!(list.get(2).unwrap(), None);
    }
}
