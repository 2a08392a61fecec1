//! Distribution policies.
//!
//! Decide which slice owns a new instance, and which slices a query visits
//! when the caller gave no explicit target.

use crate::config::{ConfigError, PolicyConfig};
use crate::mapper::LogicalQuery;
use crate::slice::RESERVED_SLICE_NAME;
use slice_core::{ManagedInstance, SliceName};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Read-only context handed to a policy for one placement decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyContext {
    /// Position of the instance within the routed batch.
    pub batch_position: usize,
    /// Size of the routed batch.
    pub batch_len: usize,
}

/// Chooses the owning slice of an unassigned instance.
///
/// `active` is never empty. The returned name must be one of `active`;
/// the router rejects anything else as a configuration error.
/// Implementations must not mutate the instance.
pub trait DistributionPolicy: Send + Sync {
    /// Returns the slice that should own `instance`.
    fn select_slice(
        &self,
        instance: &ManagedInstance,
        active: &[SliceName],
        context: &PolicyContext,
    ) -> SliceName;

    /// Returns a description of the policy for diagnostics.
    fn describe(&self) -> String;
}

fn pick(active: &[SliceName], index: usize) -> SliceName {
    match active.len() {
        0 => SliceName::new(RESERVED_SLICE_NAME),
        len => active[index % len].clone(),
    }
}

// =============================================================================
// Round-robin
// =============================================================================

/// Alternates new instances over the active slices: A, B, A, B, ...
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    next: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributionPolicy for RoundRobinPolicy {
    fn select_slice(&self, _instance: &ManagedInstance, active: &[SliceName], _context: &PolicyContext) -> SliceName {
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        pick(active, turn)
    }

    fn describe(&self) -> String {
        "RoundRobinPolicy".to_string()
    }
}

// =============================================================================
// Hash-based
// =============================================================================

/// Places an instance by hashing its object id.
///
/// The same id always maps to the same slice for a fixed active set.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPolicy;

impl HashPolicy {
    fn hash_oid(instance: &ManagedInstance) -> u64 {
        let mut hasher = DefaultHasher::new();
        instance.oid.as_u64().hash(&mut hasher);
        hasher.finish()
    }
}

impl DistributionPolicy for HashPolicy {
    fn select_slice(&self, instance: &ManagedInstance, active: &[SliceName], _context: &PolicyContext) -> SliceName {
        let len = active.len().max(1) as u64;
        pick(active, (Self::hash_oid(instance) % len) as usize)
    }

    fn describe(&self) -> String {
        "HashPolicy".to_string()
    }
}

// =============================================================================
// Type affinity
// =============================================================================

/// Pins persistent types to slices, hashing everything else.
///
/// A pinned slice that is not currently active falls back to hashing.
#[derive(Debug, Clone, Default)]
pub struct TypeAffinityPolicy {
    affinity: BTreeMap<String, SliceName>,
    fallback: HashPolicy,
}

impl TypeAffinityPolicy {
    pub fn new(affinity: BTreeMap<String, SliceName>) -> Self {
        Self {
            affinity,
            fallback: HashPolicy,
        }
    }

    /// Pins a type to a slice (builder style).
    pub fn with_affinity(mut self, type_name: impl Into<String>, slice: impl Into<SliceName>) -> Self {
        self.affinity.insert(type_name.into(), slice.into());
        self
    }
}

impl DistributionPolicy for TypeAffinityPolicy {
    fn select_slice(&self, instance: &ManagedInstance, active: &[SliceName], context: &PolicyContext) -> SliceName {
        match self.affinity.get(&instance.type_name) {
            Some(slice) if active.contains(slice) => slice.clone(),
            _ => self.fallback.select_slice(instance, active, context),
        }
    }

    fn describe(&self) -> String {
        format!("TypeAffinityPolicy(types={})", self.affinity.len())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Constructor registered under a policy name.
pub type PolicyFactory = Arc<dyn Fn(&PolicyConfig) -> Arc<dyn DistributionPolicy> + Send + Sync>;

/// Maps policy names from configuration to constructors.
///
/// Owned by whoever builds the store; there is no process-wide registry.
#[derive(Clone)]
pub struct PolicyRegistry {
    factories: HashMap<String, PolicyFactory>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("policies", &self.names())
            .finish()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding `round-robin`, `hash` and `type-affinity`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("round-robin", |_| Arc::new(RoundRobinPolicy::new()));
        registry.register("hash", |_| Arc::new(HashPolicy));
        registry.register("type-affinity", |config| {
            Arc::new(TypeAffinityPolicy::new(config.affinity.clone()))
        });
        registry
    }

    /// Registers (or replaces) a named policy constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&PolicyConfig) -> Arc<dyn DistributionPolicy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Instantiates the policy named by `config.distribution`.
    pub fn create(&self, config: &PolicyConfig) -> Result<Arc<dyn DistributionPolicy>, ConfigError> {
        self.factories
            .get(&config.distribution)
            .map(|factory| factory(config))
            .ok_or_else(|| ConfigError::UnknownPolicy(config.distribution.clone()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// =============================================================================
// Query targeting
// =============================================================================

/// Narrows the slices a query or extent visits when no target hint is given.
pub trait QueryTargetPolicy: Send + Sync {
    /// Returns the subset of `active` to query. An empty result queries nothing.
    fn targets(&self, query: &LogicalQuery, active: &[SliceName]) -> Vec<SliceName>;
}

/// Visits every active slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllSlices;

impl QueryTargetPolicy for AllSlices {
    fn targets(&self, _query: &LogicalQuery, active: &[SliceName]) -> Vec<SliceName> {
        active.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<SliceName> {
        list.iter().map(|s| SliceName::new(*s)).collect()
    }

    #[test]
    fn test_round_robin_alternates() {
        let policy = RoundRobinPolicy::new();
        let active = names(&["A", "B"]);
        let ctx = PolicyContext::default();
        let picks: Vec<String> = (0..4u64)
            .map(|i| {
                policy
                    .select_slice(&ManagedInstance::new(i, "T"), &active, &ctx)
                    .to_string()
            })
            .collect();
        assert_eq!(picks, vec!["A", "B", "A", "B"]);
    }

    #[test]
    fn test_hash_is_deterministic_and_valid() {
        let policy = HashPolicy;
        let active = names(&["A", "B", "C"]);
        let ctx = PolicyContext::default();
        for oid in 0..100u64 {
            let pc = ManagedInstance::new(oid, "T");
            let first = policy.select_slice(&pc, &active, &ctx);
            let second = policy.select_slice(&pc, &active, &ctx);
            assert_eq!(first, second);
            assert!(active.contains(&first));
        }
    }

    #[test]
    fn test_type_affinity_with_fallback() {
        let policy = TypeAffinityPolicy::default()
            .with_affinity("Invoice", "B")
            .with_affinity("Audit", "Offline");
        let active = names(&["A", "B"]);
        let ctx = PolicyContext::default();

        let invoice = ManagedInstance::new(1u64, "Invoice");
        assert_eq!(policy.select_slice(&invoice, &active, &ctx).as_str(), "B");

        // Pinned slice not active: hash fallback stays inside the active set
        let audit = ManagedInstance::new(2u64, "Audit");
        assert!(active.contains(&policy.select_slice(&audit, &active, &ctx)));
    }

    #[test]
    fn test_registry_defaults() {
        let registry = PolicyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["hash", "round-robin", "type-affinity"]);

        let policy = registry.create(&PolicyConfig::default()).unwrap();
        assert_eq!(policy.describe(), "RoundRobinPolicy");
    }

    #[test]
    fn test_registry_custom_and_unknown() {
        struct Fixed;
        impl DistributionPolicy for Fixed {
            fn select_slice(&self, _: &ManagedInstance, _: &[SliceName], _: &PolicyContext) -> SliceName {
                SliceName::new("A")
            }
            fn describe(&self) -> String {
                "Fixed".to_string()
            }
        }

        let mut registry = PolicyRegistry::empty();
        registry.register("fixed", |_| Arc::new(Fixed));

        let config = PolicyConfig {
            distribution: "fixed".to_string(),
            ..PolicyConfig::default()
        };
        assert_eq!(registry.create(&config).unwrap().describe(), "Fixed");

        let missing = PolicyConfig::default();
        assert!(matches!(
            registry.create(&missing),
            Err(ConfigError::UnknownPolicy(name)) if name == "round-robin"
        ));
    }

    #[test]
    fn test_all_slices_target() {
        let active = names(&["A", "B"]);
        let targets = AllSlices.targets(&LogicalQuery::new("q"), &active);
        assert_eq!(targets, active);
    }
}
