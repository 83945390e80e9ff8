//! Dense point table with stable identifiers.
//!
//! Slots live in one `Vec` and dropped slots go on a free list. Each slot
//! carries a generation counter that is bumped on removal, so a
//! [`PointId`] names exactly one point for the whole run even when its slot
//! is later recycled for a replacement.

use serde::{Deserialize, Serialize};
use std::fmt;
use vbt_core::Vec2;

/// Stable identifier of a tracked point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId {
    slot: u32,
    generation: u32,
}

impl PointId {
    #[inline]
    pub fn slot(self) -> u32 {
        self.slot
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// Per-point tracking state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivePoint {
    pub position: Vec2,
    pub confidence: f32,
    /// Frames this point has been followed for.
    pub age: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    point: Option<LivePoint>,
}

/// Arena of live points.
#[derive(Debug, Clone, Default)]
pub struct PointTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl PointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Add a point, recycling a free slot when one exists.
    pub fn insert(&mut self, position: Vec2) -> PointId {
        let point = LivePoint {
            position,
            confidence: 1.0,
            age: 0,
        };
        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.point = Some(point);
                PointId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    point: Some(point),
                });
                PointId {
                    slot,
                    generation: 0,
                }
            }
        }
    }

    /// Remove a point. Stale ids are ignored.
    pub fn remove(&mut self, id: PointId) -> Option<LivePoint> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let point = entry.point.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.live -= 1;
        Some(point)
    }

    pub fn get(&self, id: PointId) -> Option<&LivePoint> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.point.as_ref())
    }

    pub fn get_mut(&mut self, id: PointId) -> Option<&mut LivePoint> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.point.as_mut())
    }

    pub fn contains(&self, id: PointId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live points.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Live points in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (PointId, &LivePoint)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, s)| {
            s.point.as_ref().map(|p| {
                (
                    PointId {
                        slot: slot as u32,
                        generation: s.generation,
                    },
                    p,
                )
            })
        })
    }

    pub fn positions(&self) -> Vec<Vec2> {
        self.iter().map(|(_, p)| p.position).collect()
    }

    pub fn centroid(&self) -> Option<Vec2> {
        if self.live == 0 {
            return None;
        }
        let sum: Vec2 = self.iter().map(|(_, p)| p.position).sum();
        Some(sum / self.live as f32)
    }

    /// Drop every live point. Their ids become stale.
    pub fn clear(&mut self) {
        let ids: Vec<PointId> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.remove(id);
        }
    }
}
