use super::Slot;
use serde::{Deserialize, Serialize};

/// Index of a variable cell inside its owning [`VarPool`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VarId(u32);

impl VarId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pool of mergeable scalar cells, owned by one drawing.
///
/// Merging, breaking off and removing are total operations: self-merge
/// and merge of two already-merged cells are no-ops, never errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarPool {
    slots: Vec<Slot>,
}

impl VarPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: f64) -> VarId {
        let id = VarId(self.slots.len() as u32);
        self.slots.push(Slot::Canonical {
            value,
            members: Vec::new(),
        });
        id
    }

    /// Follow merge links to the canonical root.
    pub fn resolve(&self, v: VarId) -> VarId {
        let mut current = v;
        loop {
            match &self.slots[current.index()] {
                Slot::Merged { root } => current = *root,
                _ => return current,
            }
        }
    }

    pub fn is_canonical(&self, v: VarId) -> bool {
        matches!(self.slots[v.index()], Slot::Canonical { .. })
    }

    pub fn is_live(&self, v: VarId) -> bool {
        !matches!(self.slots[v.index()], Slot::Free)
    }

    /// Read through the merge chain to the canonical value.
    pub fn value(&self, v: VarId) -> f64 {
        match &self.slots[self.resolve(v).index()] {
            Slot::Canonical { value, .. } => *value,
            _ => 0.0,
        }
    }

    /// Write through the merge chain to the canonical value.
    pub fn set_value(&mut self, v: VarId, value: f64) {
        let root = self.resolve(v);
        if let Slot::Canonical { value: slot, .. } = &mut self.slots[root.index()] {
            *slot = value;
        }
    }

    pub fn same_root(&self, a: VarId, b: VarId) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    /// Merge `a`'s group into `b`'s: `b`'s root survives and keeps its
    /// value. Re-points every member of `a`'s root directly at the
    /// survivor so the forest stays one level deep.
    pub fn merge(&mut self, a: VarId, b: VarId) {
        let absorbed = self.resolve(a);
        let survivor = self.resolve(b);
        if absorbed == survivor {
            return;
        }

        let moved = match &mut self.slots[absorbed.index()] {
            Slot::Canonical { members, .. } => std::mem::take(members),
            _ => return,
        };
        self.slots[absorbed.index()] = Slot::Merged { root: survivor };
        for m in &moved {
            self.slots[m.index()] = Slot::Merged { root: survivor };
        }
        if let Slot::Canonical { members, .. } = &mut self.slots[survivor.index()] {
            members.extend(moved);
            members.push(absorbed);
        }
    }

    /// Detach a merged cell from its root, making it canonical again
    /// with the last resolved value. No-op on a canonical cell.
    pub fn break_off(&mut self, v: VarId) {
        let root = match self.slots[v.index()] {
            Slot::Merged { root } => root,
            _ => return,
        };
        let value = self.value(root);
        if let Slot::Canonical { members, .. } = &mut self.slots[root.index()] {
            members.retain(|m| *m != v);
        }
        self.slots[v.index()] = Slot::Canonical {
            value,
            members: Vec::new(),
        };
    }

    /// Delete a cell. A canonical cell with members promotes one member
    /// to be the new root, keeping the group's shared value; the
    /// promoted id is returned so callers can rewrite references.
    pub fn remove(&mut self, v: VarId) -> Option<VarId> {
        match self.slots[v.index()].clone() {
            Slot::Free => None,
            Slot::Merged { root } => {
                if let Slot::Canonical { members, .. } = &mut self.slots[root.index()] {
                    members.retain(|m| *m != v);
                }
                self.slots[v.index()] = Slot::Free;
                None
            }
            Slot::Canonical { value, members } => {
                self.slots[v.index()] = Slot::Free;
                let mut it = members.into_iter();
                let promoted = it.next()?;
                let rest: Vec<VarId> = it.collect();
                for m in &rest {
                    self.slots[m.index()] = Slot::Merged { root: promoted };
                }
                self.slots[promoted.index()] = Slot::Canonical {
                    value,
                    members: rest,
                };
                Some(promoted)
            }
        }
    }

    /// Canonical cells in allocation order; the stable iteration set
    /// the relaxation solver walks each pass.
    pub fn live_roots(&self) -> Vec<VarId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Canonical { .. }))
            .map(|(i, _)| VarId(i as u32))
            .collect()
    }
}
