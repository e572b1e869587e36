//! Draw Buckets
//!
//! A bucket groups draw calls sharing a layer (opaque / transparent /
//! impostor) and a shader define set. Opaque buckets sort by a
//! material+mesh hash so identical pipelines batch; depth-sorted buckets
//! draw back-to-front.

use crate::scene::InstanceId;
use crate::utils::hash::RuntimeHash;

/// Bucket sort orders.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SortOrder {
    /// Front-to-back-ish, hashed by material + mesh for batching.
    #[default]
    Default,
    /// Strict back-to-front by view distance.
    Depth,
}

/// Description of one bucket requested from [`Pipeline::cull`].
///
/// [`Pipeline::cull`]: crate::pipeline::Pipeline::cull
#[derive(Clone, Copy, Debug)]
pub struct BucketDesc {
    pub layer: &'static str,
    /// Shader define applied to every draw in the bucket (e.g. `DEPTH`).
    pub define: &'static str,
    pub sort: SortOrder,
}

impl BucketDesc {
    #[must_use]
    pub fn layer_hash(&self) -> RuntimeHash {
        RuntimeHash::of(self.layer)
    }
}

/// One draw call candidate inside a bucket.
#[derive(Clone, Copy, Debug)]
pub struct BucketItem {
    pub instance: InstanceId,
    pub mesh_index: u32,
    /// Material sort key combined with the mesh seed.
    pub batch_key: u64,
    pub squared_distance: f32,
}

/// Sorts a bucket in place according to `order`.
pub fn sort_items(items: &mut [BucketItem], order: SortOrder) {
    match order {
        SortOrder::Default => {
            items.sort_unstable_by_key(|item| (item.batch_key, item.squared_distance.to_bits()));
        }
        SortOrder::Depth => {
            // Back-to-front. Distances are non-negative, so the raw bit
            // pattern orders like the float.
            items.sort_unstable_by_key(|item| std::cmp::Reverse(item.squared_distance.to_bits()));
        }
    }
}

/// Runs of identical `(instance-independent) batch_key` draw as one
/// instanced call.
pub fn batch_runs(items: &[BucketItem]) -> impl Iterator<Item = &[BucketItem]> {
    items.chunk_by(|a, b| a.batch_key == b.batch_key && a.mesh_index == b.mesh_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn item(batch_key: u64, squared_distance: f32) -> BucketItem {
        let mut map: SlotMap<InstanceId, ()> = SlotMap::with_key();
        BucketItem {
            instance: map.insert(()),
            mesh_index: 0,
            batch_key,
            squared_distance,
        }
    }

    #[test]
    fn default_sort_groups_by_batch_key() {
        let mut items = vec![item(3, 1.0), item(1, 5.0), item(3, 0.5), item(1, 2.0)];
        sort_items(&mut items, SortOrder::Default);
        let keys: Vec<u64> = items.iter().map(|i| i.batch_key).collect();
        assert_eq!(keys, vec![1, 1, 3, 3]);
    }

    #[test]
    fn depth_sort_is_back_to_front() {
        let mut items = vec![item(0, 1.0), item(0, 9.0), item(0, 4.0)];
        sort_items(&mut items, SortOrder::Depth);
        let dists: Vec<f32> = items.iter().map(|i| i.squared_distance).collect();
        assert_eq!(dists, vec![9.0, 4.0, 1.0]);
    }

    #[test]
    fn batch_runs_split_on_key_change() {
        let mut items = vec![item(1, 0.0), item(1, 0.0), item(2, 0.0)];
        sort_items(&mut items, SortOrder::Default);
        let runs: Vec<usize> = batch_runs(&items).map(<[BucketItem]>::len).collect();
        assert_eq!(runs, vec![2, 1]);
    }
}
