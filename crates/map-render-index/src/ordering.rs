//! Draw ordering of query results
//!
//! Flat views order by the application z-order. Tilted views use
//! [`DepthComparator`], a painter's ordering that draws farther sprites first
//! while keeping surface content and related items in z-order.
//!
//! Both orderings sort on keys computed once per item before the sort starts,
//! so items moving during the sort cannot make the order inconsistent.

use crate::config::IndexConfig;
use crate::item::{GroupId, ItemId, MapItem, RenderPass, Subject};
use crate::quadtree::Visible;
use crate::scene::{SceneModel, ViewState};
use crate::utils;
use glam::DVec3;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

/// Result of [`sort_for_view`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    Sorted,
    /// An item panicked while its sort key was read; the list is left as it was
    Unsorted,
}

/// Ascending z-order, then ascending id. A total order over distinct items.
pub fn z_order_cmp(a: &dyn MapItem, b: &dyn MapItem) -> Ordering {
    a.subject()
        .z_order
        .total_cmp(&b.subject().z_order)
        .then_with(|| a.id().cmp(&b.id()))
}

/// Position of one item in the draw order
#[derive(Debug, Clone, Copy)]
struct SortKey {
    /// 0 for surface content, 1 for everything drawn in depth order
    section: u8,
    /// Distance of the item's cluster, farthest first
    distance: f64,
    /// Lowest id in the item's cluster, keeps equidistant clusters apart
    cluster: ItemId,
    z_order: f64,
    id: ItemId,
}

impl SortKey {
    fn flat(subject: &Subject, id: ItemId) -> Self {
        Self {
            section: 0,
            distance: 0.0,
            cluster: ItemId(0),
            z_order: subject.z_order,
            id,
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.section
            .cmp(&other.section)
            .then_with(|| other.distance.total_cmp(&self.distance))
            .then_with(|| self.cluster.cmp(&other.cluster))
            .then_with(|| self.z_order.total_cmp(&other.z_order))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

/// Disjoint sets over list positions
struct Clusters {
    parent: Vec<usize>,
}

impl Clusters {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }
}

/// What the depth ordering needs to know about one list entry
struct Entry {
    id: ItemId,
    subject: Subject,
    surface_only: bool,
    distance: f64,
}

/// Back-to-front ordering for tilted views.
///
/// Related items (see [`Subject::is_related_to`]) form clusters that are
/// placed as a unit at the distance of their farthest member and drawn in
/// z-order inside the cluster. Clusters made only of surface content come
/// first, in z-order.
#[derive(Debug, Clone, Copy)]
pub struct DepthComparator {
    /// Point distances are measured from, in ECEF meters
    reference: DVec3,
}

impl DepthComparator {
    pub fn new(scene: &SceneModel, config: &IndexConfig) -> Self {
        let reference = if scene.projection.is_perspective() {
            scene.position
        } else {
            // An orthographic camera has no meaningful eye point; back it off
            // so relative distances stay ordered
            let pullback = scene.focus_distance.max(config.ortho_min_pullback);
            scene.position - scene.forward * pullback
        };
        Self { reference }
    }

    pub fn reference(&self) -> DVec3 {
        self.reference
    }

    /// Slant distance from the reference point to the center of an item
    pub fn distance_to(&self, item: &dyn MapItem) -> f64 {
        let bounds = item.bounds();
        let (lat, lon) = bounds.center();
        let alt = match (bounds.min_altitude(), bounds.max_altitude()) {
            (min, max) if min.is_finite() && max.is_finite() => (min + max) / 2.0,
            (min, _) if min.is_finite() => min,
            (_, max) if max.is_finite() => max,
            _ => 0.0,
        };
        utils::slant_distance(self.reference, utils::wgs84_to_ecef(lat, lon, alt))
    }

    fn keys(&self, items: &[Visible]) -> Vec<SortKey> {
        let entries: Vec<Entry> = items
            .iter()
            .map(|visible| {
                let item = visible.item.as_ref();
                Entry {
                    id: item.id(),
                    subject: item.subject(),
                    surface_only: item.render_pass() == RenderPass::SURFACE,
                    distance: self.distance_to(item),
                }
            })
            .collect();

        let mut members: HashMap<GroupId, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(group) = entry.subject.group {
                members.entry(group).or_default().push(i);
            }
        }

        let mut clusters = Clusters::new(entries.len());
        for group_members in members.values() {
            if group_members
                .iter()
                .any(|&i| entries[i].subject.group_is_shape)
            {
                for pair in group_members.windows(2) {
                    clusters.union(pair[0], pair[1]);
                }
            }
        }
        for (i, entry) in entries.iter().enumerate() {
            let subject = &entry.subject;
            let Some(children) = subject
                .child_group
                .filter(|_| subject.group.is_some())
                .and_then(|child_group| members.get(&child_group))
            else {
                continue;
            };
            for &child in children {
                clusters.union(i, child);
            }
        }

        // Per root: farthest distance, lowest id, whether all members are surface
        let mut summary: HashMap<usize, (f64, ItemId, bool)> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let root = clusters.find(i);
            summary
                .entry(root)
                .and_modify(|(distance, cluster, surface)| {
                    *distance = distance.max(entry.distance);
                    *cluster = (*cluster).min(entry.id);
                    *surface &= entry.surface_only;
                })
                .or_insert((entry.distance, entry.id, entry.surface_only));
        }

        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let (distance, cluster, surface) = summary[&clusters.find(i)];
                if surface {
                    SortKey::flat(&entry.subject, entry.id)
                } else {
                    SortKey {
                        section: 1,
                        distance,
                        cluster,
                        z_order: entry.subject.z_order,
                        id: entry.id,
                    }
                }
            })
            .collect()
    }

    /// Sort `items` back to front
    pub fn sort(&self, items: &mut [Visible]) {
        let keys = self.keys(items);
        apply_keys(items, keys);
    }
}

/// Reorder `items` by `keys`, which are parallel to it
fn apply_keys(items: &mut [Visible], keys: Vec<SortKey>) {
    let mut keyed: Vec<(SortKey, Visible)> = keys.into_iter().zip(items.iter().cloned()).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    for (slot, (_, visible)) in items.iter_mut().zip(keyed) {
        *slot = visible;
    }
}

/// Sort query results for drawing in `view`.
///
/// A panicking item (for instance one whose state is torn by a concurrent
/// update) is caught and logged; the list is then left in query order.
pub fn sort_for_view(items: &mut [Visible], view: &ViewState, config: &IndexConfig) -> SortOutcome {
    #[cfg(feature = "profiling")]
    profiling::scope!("ordering::sort_for_view");

    let depth = match &view.scene {
        Some(scene) if view.tilt > 0.0 => Some(DepthComparator::new(scene, config)),
        _ => None,
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| match &depth {
        Some(cmp) => cmp.sort(items),
        None => {
            let keys = items
                .iter()
                .map(|v| SortKey::flat(&v.item.subject(), v.item.id()))
                .collect();
            apply_keys(items, keys);
        }
    }));

    match result {
        Ok(()) => SortOutcome::Sorted,
        Err(_) => {
            tracing::warn!(
                count = items.len(),
                "Sort failed, possibly due to an item changing during the sort; drawing unsorted"
            );
            SortOutcome::Unsorted
        }
    }
}
