//! VLAN tag allocation for auto-created networks

use std::collections::BTreeSet;

use crate::config::VlanRange;
use crate::error::{LabforgeError, LabforgeResult};

/// Hands out VLAN tags in increasing order from a configured range.
///
/// Tags are never returned to the pool within a run. Tags pinned explicitly
/// by the network catalog are reserved up front and skipped.
#[derive(Debug, Clone)]
pub struct VlanAllocator {
    range: VlanRange,
    next: u32,
    reserved: BTreeSet<u16>,
    issued: BTreeSet<u16>,
}

impl VlanAllocator {
    pub fn new(range: VlanRange, reserved: impl IntoIterator<Item = u16>) -> Self {
        Self {
            range,
            next: u32::from(range.start),
            reserved: reserved.into_iter().collect(),
            issued: BTreeSet::new(),
        }
    }

    /// Next unused tag
    pub fn allocate(&mut self) -> LabforgeResult<u16> {
        while self.next <= u32::from(self.range.end) {
            let candidate = self.next as u16;
            self.next += 1;
            if !self.reserved.contains(&candidate) && !self.issued.contains(&candidate) {
                self.issued.insert(candidate);
                return Ok(candidate);
            }
        }
        Err(LabforgeError::ResourceExhausted {
            resource: format!(
                "VLAN tags {}..={} are all in use",
                self.range.start, self.range.end
            ),
        })
    }

    /// Record a tag that was assigned outside the allocator
    pub fn reserve(&mut self, tag: u16) {
        self.reserved.insert(tag);
    }
}
