//! Binning of instances into per-slice batches.

use super::policy::{DistributionPolicy, PolicyContext};
use crate::config::ConfigError;
use crate::{Result, SliceError};
use slice_core::{ManagedInstance, ObjectId, Row, SliceName, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Prior placements learned outside the instances themselves,
/// typically the origin markers of rows a query returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHint {
    origins: HashMap<ObjectId, SliceName>,
}

impl RoutingHint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `oid` was read from `slice`.
    pub fn insert(&mut self, oid: ObjectId, slice: SliceName) {
        self.origins.insert(oid, slice);
    }

    /// Builds a hint from query rows whose `oid_column` holds the object id.
    ///
    /// Rows without an origin or without an integer id are skipped.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a Row>, oid_column: usize) -> Self {
        let mut hint = Self::new();
        for row in rows {
            if let (Some(origin), Some(Value::Int(id))) = (&row.origin, row.get(oid_column)) {
                if let Ok(id) = u64::try_from(*id) {
                    hint.insert(ObjectId(id), origin.clone());
                }
            }
        }
        hint
    }

    pub fn get(&self, oid: ObjectId) -> Option<&SliceName> {
        self.origins.get(&oid)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// Per-slice subsets of a routed batch.
///
/// Holds an entry for every active slice in enumeration order, empty when the
/// slice got no work. Each entry lists indices into the routed batch in their
/// original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceBins {
    bins: Vec<(SliceName, Vec<usize>)>,
}

impl SliceBins {
    fn empty_for(active: &[SliceName]) -> Self {
        Self {
            bins: active.iter().map(|name| (name.clone(), Vec::new())).collect(),
        }
    }

    /// Iterates `(slice, indices)` in slice enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (&SliceName, &[usize])> {
        self.bins.iter().map(|(name, idx)| (name, idx.as_slice()))
    }

    /// Iterates only the slices that received instances.
    pub fn non_empty(&self) -> impl Iterator<Item = (&SliceName, &[usize])> {
        self.iter().filter(|(_, idx)| !idx.is_empty())
    }

    /// Returns the subset assigned to `slice`.
    pub fn get(&self, slice: &SliceName) -> Option<&[usize]> {
        self.bins
            .iter()
            .find(|(name, _)| name == slice)
            .map(|(_, idx)| idx.as_slice())
    }

    /// Number of slices (including empty ones).
    pub fn slice_count(&self) -> usize {
        self.bins.len()
    }

    /// Total number of routed instances.
    pub fn total(&self) -> usize {
        self.bins.iter().map(|(_, idx)| idx.len()).sum()
    }
}

/// Resolves the owning slice of every instance in a batch.
///
/// Resolution order per instance: its existing tag, then the routing hint,
/// then the distribution policy. Newly resolved slices are written back onto
/// the instances only once the whole batch routed successfully.
#[derive(Clone)]
pub struct SliceRouter {
    policy: Arc<dyn DistributionPolicy>,
}

impl std::fmt::Debug for SliceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SliceRouter")
            .field("policy", &self.policy.describe())
            .finish()
    }
}

impl SliceRouter {
    pub fn new(policy: Arc<dyn DistributionPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Arc<dyn DistributionPolicy> {
        &self.policy
    }

    /// Bins `instances` over `active`, tagging unassigned instances.
    pub fn route(
        &self,
        instances: &mut [ManagedInstance],
        active: &[SliceName],
        hint: &RoutingHint,
    ) -> Result<SliceBins> {
        if active.is_empty() {
            return Err(SliceError::NoActiveSlices);
        }

        let mut bins = SliceBins::empty_for(active);
        let position: HashMap<&SliceName, usize> =
            active.iter().enumerate().map(|(i, name)| (name, i)).collect();

        let batch_len = instances.len();
        let mut placements: Vec<(usize, SliceName)> = Vec::new();

        for (i, instance) in instances.iter().enumerate() {
            let context = PolicyContext {
                batch_position: i,
                batch_len,
            };
            let (slice, newly_assigned) = self.resolve(instance, active, hint, &context)?;
            let bin = position.get(&slice).copied().ok_or_else(|| SliceError::UnavailableSlice {
                oid: instance.oid,
                slice: slice.clone(),
            })?;
            bins.bins[bin].1.push(i);
            if newly_assigned {
                placements.push((i, slice));
            }
        }

        for (i, slice) in placements {
            instances[i].assign_slice(slice)?;
        }

        tracing::debug!(
            instances = batch_len,
            slices = active.len(),
            policy = %self.policy.describe(),
            "Routed batch"
        );
        Ok(bins)
    }

    /// Resolves one instance without tagging it.
    ///
    /// Returns the slice and whether it was newly assigned.
    fn resolve(
        &self,
        instance: &ManagedInstance,
        active: &[SliceName],
        hint: &RoutingHint,
        context: &PolicyContext,
    ) -> Result<(SliceName, bool)> {
        if let Some(tag) = instance.slice() {
            return Ok((tag.clone(), false));
        }
        if let Some(origin) = hint.get(instance.oid) {
            return Ok((origin.clone(), true));
        }

        let chosen = self.policy.select_slice(instance, active, context);
        if !active.contains(&chosen) {
            return Err(ConfigError::PolicyViolation {
                policy: self.policy.describe(),
                slice: chosen,
                active: active.to_vec(),
            }
            .into());
        }
        Ok((chosen, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::policy::{HashPolicy, RoundRobinPolicy};

    fn names(list: &[&str]) -> Vec<SliceName> {
        list.iter().map(|s| SliceName::new(*s)).collect()
    }

    fn batch(n: u64) -> Vec<ManagedInstance> {
        (0..n).map(|i| ManagedInstance::new(i, "Customer")).collect()
    }

    struct Rogue;

    impl DistributionPolicy for Rogue {
        fn select_slice(&self, _: &ManagedInstance, _: &[SliceName], _: &PolicyContext) -> SliceName {
            SliceName::new("Nowhere")
        }

        fn describe(&self) -> String {
            "Rogue".to_string()
        }
    }

    #[test]
    fn test_round_robin_binning() {
        let router = SliceRouter::new(Arc::new(RoundRobinPolicy::new()));
        let active = names(&["A", "B"]);
        let mut instances = batch(4);

        let bins = router.route(&mut instances, &active, &RoutingHint::new()).unwrap();
        assert_eq!(bins.get(&SliceName::new("A")), Some(&[0usize, 2][..]));
        assert_eq!(bins.get(&SliceName::new("B")), Some(&[1usize, 3][..]));
        assert_eq!(instances[0].slice().map(SliceName::as_str), Some("A"));
        assert_eq!(instances[3].slice().map(SliceName::as_str), Some("B"));
    }

    #[test]
    fn test_every_active_slice_present() {
        let router = SliceRouter::new(Arc::new(RoundRobinPolicy::new()));
        let active = names(&["A", "B", "C"]);
        let mut instances = batch(1);

        let bins = router.route(&mut instances, &active, &RoutingHint::new()).unwrap();
        assert_eq!(bins.slice_count(), 3);
        assert_eq!(bins.total(), 1);
        assert_eq!(bins.non_empty().count(), 1);
        let order: Vec<&str> = bins.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_existing_tag_wins() {
        let router = SliceRouter::new(Arc::new(Rogue));
        let active = names(&["A", "B"]);
        let mut instances = batch(2);
        instances[0].assign_slice("B".into()).unwrap();
        instances[1].assign_slice("A".into()).unwrap();

        let mut hint = RoutingHint::new();
        hint.insert(ObjectId(0), SliceName::new("A"));

        let bins = router.route(&mut instances, &active, &hint).unwrap();
        assert_eq!(bins.get(&SliceName::new("B")), Some(&[0usize][..]));
        assert_eq!(bins.get(&SliceName::new("A")), Some(&[1usize][..]));
    }

    #[test]
    fn test_hint_adopted_and_tagged() {
        let router = SliceRouter::new(Arc::new(Rogue));
        let active = names(&["A", "B"]);
        let rows = vec![
            Row::new(vec![Value::Int(0)]).with_origin("B".into()),
            Row::new(vec![Value::Int(1)]),
        ];
        let hint = RoutingHint::from_rows(&rows, 0);
        assert_eq!(hint.len(), 1);

        let mut instances = batch(1);
        router.route(&mut instances, &active, &hint).unwrap();
        assert_eq!(instances[0].slice().map(SliceName::as_str), Some("B"));
    }

    #[test]
    fn test_policy_violation_aborts_without_tagging() {
        let router = SliceRouter::new(Arc::new(Rogue));
        let active = names(&["A", "B"]);
        let mut instances = batch(3);
        let mut hint = RoutingHint::new();
        hint.insert(ObjectId(0), SliceName::new("A"));

        let err = router.route(&mut instances, &active, &hint).unwrap_err();
        match err {
            SliceError::Config(ConfigError::PolicyViolation { policy, slice, active: valid }) => {
                assert_eq!(policy, "Rogue");
                assert_eq!(slice.as_str(), "Nowhere");
                assert_eq!(valid, active);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Hint-resolved instance 0 was not tagged either
        assert!(instances.iter().all(ManagedInstance::is_unassigned));
    }

    #[test]
    fn test_tag_on_inactive_slice() {
        let router = SliceRouter::new(Arc::new(HashPolicy));
        let active = names(&["A"]);
        let mut instances = batch(1);
        instances[0].assign_slice("Gone".into()).unwrap();

        let err = router.route(&mut instances, &active, &RoutingHint::new()).unwrap_err();
        assert!(matches!(err, SliceError::UnavailableSlice { oid, .. } if oid == ObjectId(0)));
    }

    #[test]
    fn test_no_active_slices() {
        let router = SliceRouter::new(Arc::new(HashPolicy));
        let mut instances = batch(1);
        let err = router.route(&mut instances, &[], &RoutingHint::new()).unwrap_err();
        assert!(matches!(err, SliceError::NoActiveSlices));
    }
}
