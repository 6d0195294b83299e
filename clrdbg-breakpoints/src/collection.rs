use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use clrdbg_ppdb::PdbFile;

use crate::breakpoint::{Breakpoint, BreakpointState, ResolvedLocation};
use crate::request::{BreakpointError, BreakpointId, BreakpointRequest};

/// A change the debugger has to apply to the live process.
///
/// Collection operations return these instead of talking to the process themselves. A
/// `Resolved` breakpoint is not yet enabled. It is followed by `Activated` or `Deactivated` once
/// its requested activation is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum BreakpointEvent {
    /// The breakpoint was bound to a code location.
    Resolved {
        /// The breakpoint.
        id: BreakpointId,
        /// Where it was bound.
        location: ResolvedLocation,
    },
    /// The breakpoint lost its code location, for example because its PDB was unloaded.
    Unresolved {
        /// The breakpoint.
        id: BreakpointId,
        /// The location it was bound to.
        location: ResolvedLocation,
    },
    /// The breakpoint should trap.
    Activated {
        /// The breakpoint.
        id: BreakpointId,
        /// Where to set the trap.
        location: ResolvedLocation,
    },
    /// The breakpoint should no longer trap.
    Deactivated {
        /// The breakpoint.
        id: BreakpointId,
        /// Where to clear the trap.
        location: ResolvedLocation,
    },
    /// The breakpoint was removed from the collection.
    Removed {
        /// The breakpoint.
        id: BreakpointId,
        /// The location it was bound to, if it was resolved.
        location: Option<ResolvedLocation>,
    },
}

impl BreakpointEvent {
    /// The id of the affected breakpoint.
    pub fn id(&self) -> BreakpointId {
        match *self {
            Self::Resolved { id, .. }
            | Self::Unresolved { id, .. }
            | Self::Activated { id, .. }
            | Self::Deactivated { id, .. }
            | Self::Removed { id, .. } => id,
        }
    }
}

#[derive(Debug)]
struct Entry {
    breakpoint: Breakpoint,
    /// Whether the client wants this breakpoint enabled once it resolves.
    activated: bool,
    /// The file the breakpoint resolved against.
    pdb: Option<Arc<PdbFile>>,
}

impl Entry {
    fn new(request: &BreakpointRequest) -> Result<Self, BreakpointError> {
        Ok(Self {
            breakpoint: Breakpoint::new(request)?,
            activated: request.activated,
            pdb: None,
        })
    }

    fn location(&self) -> Option<ResolvedLocation> {
        self.breakpoint.location().cloned()
    }

    /// Resolves against the first of `pdbs` that has code at the breakpoint.
    fn resolve(&mut self, pdbs: &[Arc<PdbFile>], events: &mut Vec<BreakpointEvent>) {
        if self.breakpoint.state().is_resolved() {
            return;
        }

        let Some(pdb) = pdbs.iter().find(|pdb| self.breakpoint.try_resolve(pdb)) else {
            return;
        };
        self.pdb = Some(Arc::clone(pdb));

        if let Some(location) = self.location() {
            events.push(BreakpointEvent::Resolved {
                id: self.breakpoint.id(),
                location,
            });
        }
        self.apply_activation(events);
    }

    /// Brings a resolved breakpoint's state in line with the requested activation.
    fn apply_activation(&mut self, events: &mut Vec<BreakpointEvent>) {
        let target = if self.activated {
            BreakpointState::Activated
        } else {
            BreakpointState::Deactivated
        };

        let state = self.breakpoint.state();
        if state == target || !state.is_resolved() {
            return;
        }

        if self.breakpoint.set_active(self.activated).is_err() {
            return;
        }

        if let Some(location) = self.location() {
            let id = self.breakpoint.id();
            events.push(if self.activated {
                BreakpointEvent::Activated { id, location }
            } else {
                BreakpointEvent::Deactivated { id, location }
            });
        }
    }

    fn unresolve(&mut self, events: &mut Vec<BreakpointEvent>) {
        self.pdb = None;
        if let Some(location) = self.breakpoint.unresolve() {
            events.push(BreakpointEvent::Unresolved {
                id: self.breakpoint.id(),
                location,
            });
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    pdbs: Vec<Arc<PdbFile>>,
}

impl Inner {
    fn entry_mut(&mut self, id: BreakpointId) -> Result<&mut Entry, BreakpointError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.breakpoint.id() == id)
            .ok_or(BreakpointError::UnknownId(id))
    }
}

/// The set of source breakpoints of a debugging session.
///
/// The collection holds the loaded [`PdbFile`]s and resolves breakpoints against them in load
/// order. All operations lock the whole collection, so a collection can be shared between
/// threads and no partially applied update is ever observable.
///
/// Operations return the [`BreakpointEvent`]s the debugger has to apply to the live process.
///
/// ```
/// use clrdbg_breakpoints::{BreakpointCollection, BreakpointId, BreakpointRequest};
///
/// let collection = BreakpointCollection::new();
/// let events = collection
///     .sync(vec![BreakpointRequest::new(BreakpointId(1), "Program.cs", 12)])
///     .unwrap();
///
/// // Nothing to bind to until a PDB is loaded.
/// assert!(events.is_empty());
/// assert_eq!(collection.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct BreakpointCollection {
    inner: Mutex<Inner>,
}

impl BreakpointCollection {
    /// Creates an empty collection without loaded PDBs.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of breakpoints.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if there are no breakpoints.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// The number of loaded PDB files.
    pub fn pdb_count(&self) -> usize {
        self.inner.lock().pdbs.len()
    }

    /// Returns a snapshot of all breakpoints in request order.
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|entry| entry.breakpoint.clone())
            .collect()
    }

    /// Returns a snapshot of the breakpoint with the given id.
    pub fn get(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|entry| entry.breakpoint.id() == id)
            .map(|entry| entry.breakpoint.clone())
    }

    /// Loads a PDB file and resolves all unresolved breakpoints against it.
    pub fn add_pdb(&self, pdb: Arc<PdbFile>) -> Vec<BreakpointEvent> {
        let mut inner = self.inner.lock();
        let mut events = Vec::new();

        let pdbs = [Arc::clone(&pdb)];
        for entry in &mut inner.entries {
            entry.resolve(&pdbs, &mut events);
        }
        inner.pdbs.push(pdb);

        tracing::debug!(
            pdbs = inner.pdbs.len(),
            events = events.len(),
            "added pdb to breakpoint collection"
        );
        events
    }

    /// Unloads a PDB file.
    ///
    /// Breakpoints bound to it become unresolved and are resolved again against the remaining
    /// files. Unloading a file that was never added does nothing.
    pub fn remove_pdb(&self, pdb: &Arc<PdbFile>) -> Vec<BreakpointEvent> {
        let mut inner = self.inner.lock();
        let mut events = Vec::new();

        inner.pdbs.retain(|loaded| !Arc::ptr_eq(loaded, pdb));

        let Inner { entries, pdbs } = &mut *inner;
        for entry in entries.iter_mut() {
            if entry.pdb.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, pdb)) {
                entry.unresolve(&mut events);
                entry.resolve(pdbs, &mut events);
            }
        }

        events
    }

    /// Tries to resolve every unresolved breakpoint against all loaded files.
    pub fn resolve_pending(&self) -> Vec<BreakpointEvent> {
        let mut inner = self.inner.lock();
        let mut events = Vec::new();

        let Inner { entries, pdbs } = &mut *inner;
        for entry in entries.iter_mut() {
            entry.resolve(pdbs, &mut events);
        }

        events
    }

    /// Replaces the breakpoint set with `requests`.
    ///
    /// Breakpoints whose id is not requested are removed. A requested id that already exists
    /// keeps its resolution if its source location is unchanged, otherwise it is resolved anew.
    /// New breakpoints are resolved against the loaded files. Finally, every resolved
    /// breakpoint is activated or deactivated as requested.
    ///
    /// All requests are validated before anything changes. On error, the collection is left
    /// untouched.
    pub fn sync(
        &self,
        requests: Vec<BreakpointRequest>,
    ) -> Result<Vec<BreakpointEvent>, BreakpointError> {
        let mut seen = HashSet::with_capacity(requests.len());
        let mut fresh = Vec::with_capacity(requests.len());
        for request in &requests {
            if !seen.insert(request.id) {
                return Err(BreakpointError::DuplicateId(request.id));
            }
            fresh.push(Entry::new(request)?);
        }

        let mut inner = self.inner.lock();
        let mut events = Vec::new();

        let mut existing: HashMap<BreakpointId, Entry> = mem::take(&mut inner.entries)
            .into_iter()
            .map(|entry| (entry.breakpoint.id(), entry))
            .collect();

        let mut removed: Vec<BreakpointId> = existing
            .keys()
            .filter(|id| !seen.contains(*id))
            .copied()
            .collect();
        removed.sort();
        for id in removed {
            if let Some(entry) = existing.remove(&id) {
                events.push(BreakpointEvent::Removed {
                    id,
                    location: entry.location(),
                });
            }
        }

        let mut entries = Vec::with_capacity(requests.len());
        for (request, new_entry) in requests.iter().zip(fresh) {
            let mut entry = match existing.remove(&request.id) {
                Some(entry) if entry.breakpoint.same_source(request) => entry,
                Some(mut stale) => {
                    stale.unresolve(&mut events);
                    new_entry
                }
                None => new_entry,
            };

            entry.activated = request.activated;
            entry.resolve(&inner.pdbs, &mut events);
            entry.apply_activation(&mut events);
            entries.push(entry);
        }
        inner.entries = entries;

        tracing::debug!(
            breakpoints = inner.entries.len(),
            events = events.len(),
            "synchronized breakpoints"
        );
        Ok(events)
    }

    /// Enables the breakpoint with the given id.
    pub fn activate(&self, id: BreakpointId) -> Result<Option<BreakpointEvent>, BreakpointError> {
        self.set_active(id, true)
    }

    /// Disables the breakpoint with the given id.
    pub fn deactivate(&self, id: BreakpointId) -> Result<Option<BreakpointEvent>, BreakpointError> {
        self.set_active(id, false)
    }

    /// Returns the resulting event, or `None` if the breakpoint already was in that state.
    fn set_active(
        &self,
        id: BreakpointId,
        active: bool,
    ) -> Result<Option<BreakpointEvent>, BreakpointError> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(id)?;

        if !entry.breakpoint.state().is_resolved() {
            return Err(BreakpointError::NotResolved(id));
        }

        entry.activated = active;
        let mut events = Vec::new();
        entry.apply_activation(&mut events);
        Ok(events.pop())
    }
}
