//! Quantity-keyed resource collections (cart lines) and wishlists.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::ResourceId;

/// One line of a resource collection as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Resource (product) id.
    #[serde(alias = "productId")]
    pub resource_id: ResourceId,
    /// Number of units.
    pub quantity: u32,
}

/// Mapping of resource id to quantity.
///
/// Used for both the guest collection accumulated before login and the
/// user-scoped collection owned by the backend. Zero quantities are never
/// stored: setting a line to zero removes it.
///
/// ```
/// use marketsync_core::{ResourceId, ResourceSet};
///
/// let mut guest = ResourceSet::new();
/// guest.add(ResourceId::from("A"), 2);
///
/// let mut user = ResourceSet::new();
/// user.add(ResourceId::from("A"), 1);
///
/// user.merge_sum(&guest);
/// assert_eq!(user.quantity(&ResourceId::from("A")), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LineItem>", into = "Vec<LineItem>")]
pub struct ResourceSet(BTreeMap<ResourceId, u32>);

impl ResourceSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add `quantity` units of `id`, saturating at `u32::MAX`.
    pub fn add(&mut self, id: ResourceId, quantity: u32) {
        if quantity == 0 {
            return;
        }
        let entry = self.0.entry(id).or_insert(0);
        *entry = entry.saturating_add(quantity);
    }

    /// Overwrite the quantity of `id`; zero removes the line.
    pub fn set_quantity(&mut self, id: ResourceId, quantity: u32) {
        if quantity == 0 {
            self.0.remove(&id);
        } else {
            self.0.insert(id, quantity);
        }
    }

    /// Remove a line entirely, returning its previous quantity.
    pub fn remove(&mut self, id: &ResourceId) -> Option<u32> {
        self.0.remove(id)
    }

    /// Quantity held for `id` (zero when absent).
    #[must_use]
    pub fn quantity(&self, id: &ResourceId) -> u32 {
        self.0.get(id).copied().unwrap_or(0)
    }

    /// Whether the set has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sum of all quantities.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.0.values().map(|&q| u64::from(q)).sum()
    }

    /// Union `other` into `self`, summing quantities for matching ids.
    pub fn merge_sum(&mut self, other: &Self) {
        for (id, &quantity) in &other.0 {
            self.add(id.clone(), quantity);
        }
    }

    /// Non-mutating variant of [`merge_sum`](Self::merge_sum).
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge_sum(other);
        out
    }

    /// Iterate over `(id, quantity)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, u32)> {
        self.0.iter().map(|(id, &q)| (id, q))
    }

    /// Lines in wire form.
    #[must_use]
    pub fn to_items(&self) -> Vec<LineItem> {
        self.iter()
            .map(|(id, quantity)| LineItem {
                resource_id: id.clone(),
                quantity,
            })
            .collect()
    }
}

impl From<Vec<LineItem>> for ResourceSet {
    fn from(items: Vec<LineItem>) -> Self {
        let mut set = Self::new();
        for item in items {
            set.add(item.resource_id, item.quantity);
        }
        set
    }
}

impl From<ResourceSet> for Vec<LineItem> {
    fn from(set: ResourceSet) -> Self {
        set.to_items()
    }
}

impl FromIterator<(ResourceId, u32)> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = (ResourceId, u32)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (id, quantity) in iter {
            set.add(id, quantity);
        }
        set
    }
}

/// Set of saved resource ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wishlist(BTreeSet<ResourceId>);

impl Wishlist {
    /// Create an empty wishlist.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a resource; returns `false` if it was already present.
    pub fn insert(&mut self, id: ResourceId) -> bool {
        self.0.insert(id)
    }

    /// Whether `id` is saved.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.0.contains(id)
    }

    /// Number of saved resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over saved ids in order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> {
        self.0.iter()
    }
}

impl FromIterator<ResourceId> for Wishlist {
    fn from_iter<I: IntoIterator<Item = ResourceId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
