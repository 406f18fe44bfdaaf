//! # Dependency Graph
//!
//! Current version per component plus the dependencies each component
//! declared. An edge `component -> dependency` means the component requires
//! the dependency to be present and compatible.
//!
//! All data structures use `BTreeMap`/`BTreeSet`, so cycle reports and
//! update orders are deterministic for a given set of registrations.

use crate::{ComponentId, DependencyError, EvolveError, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, btree_set};
use std::fmt;

// =============================================================================
// DECLARED DEPENDENCIES
// =============================================================================

/// Inclusive `[min, max]` precedence window.
///
/// Deserialization goes through [`CompatibilityRange::new`], so a snapshot
/// can never carry an inverted range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct CompatibilityRange {
    min: Version,
    max: Version,
}

impl CompatibilityRange {
    /// Create a range; `min` must not outrank `max`.
    pub fn new(min: Version, max: Version) -> Result<Self, EvolveError> {
        if min.compare(&max).is_gt() {
            return Err(EvolveError::Validation(format!(
                "compatibility range minimum {min} is above maximum {max}"
            )));
        }
        Ok(Self { min, max })
    }

    #[must_use]
    pub fn min(&self) -> &Version {
        &self.min
    }

    #[must_use]
    pub fn max(&self) -> &Version {
        &self.max
    }

    /// Check `min <= version <= max` under precedence (build ignored).
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        version.compare(&self.min).is_ge() && version.compare(&self.max).is_le()
    }
}

#[derive(Deserialize)]
struct RawRange {
    min: Version,
    max: Version,
}

impl TryFrom<RawRange> for CompatibilityRange {
    type Error = EvolveError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Self::new(raw.min, raw.max)
    }
}

impl fmt::Display for CompatibilityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// A need declared by one component on another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDependency {
    pub component: ComponentId,
    pub version: Version,
    pub required: bool,
    pub compatibility_range: Option<CompatibilityRange>,
}

impl VersionDependency {
    /// A required dependency on exactly `version`.
    #[must_use]
    pub fn required(component: impl Into<ComponentId>, version: Version) -> Self {
        Self {
            component: component.into(),
            version,
            required: true,
            compatibility_range: None,
        }
    }

    /// An optional dependency: missing is fine, present must be compatible.
    #[must_use]
    pub fn optional(component: impl Into<ComponentId>, version: Version) -> Self {
        Self {
            required: false,
            ..Self::required(component, version)
        }
    }

    /// Accept any registered version inside `range` instead of an exact match.
    #[must_use]
    pub fn with_range(mut self, range: CompatibilityRange) -> Self {
        self.compatibility_range = Some(range);
        self
    }

    /// Check a registered version against this declaration.
    ///
    /// Without a range the match is exact (strict equality, build included).
    #[must_use]
    pub fn is_satisfied_by(&self, found: &Version) -> bool {
        match &self.compatibility_range {
            Some(range) => range.contains(found),
            None => found == &self.version,
        }
    }

    fn requirement(&self) -> String {
        match &self.compatibility_range {
            Some(range) => format!("range {range}"),
            None => format!("exactly {}", self.version),
        }
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Component versions and dependency edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Current version per component (last write wins).
    versions: BTreeMap<ComponentId, Version>,

    /// Declared dependencies in registration order.
    dependencies: BTreeMap<ComponentId, Vec<VersionDependency>>,

    /// Adjacency: component -> components it depends on.
    /// Rebuilt from `dependencies` on every registration.
    edges: BTreeMap<ComponentId, BTreeSet<ComponentId>>,

    /// Refuse registrations that would close a cycle.
    reject_cycles: bool,
}

impl DependencyGraph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph that refuses cycle-closing dependencies.
    #[must_use]
    pub fn rejecting_cycles() -> Self {
        Self {
            reject_cycles: true,
            ..Self::default()
        }
    }

    /// Record the current version of a component. Last write wins.
    ///
    /// Returns the version it replaced, if any.
    pub fn register_version(
        &mut self,
        component: impl Into<ComponentId>,
        version: Version,
    ) -> Option<Version> {
        self.versions.insert(component.into(), version)
    }

    /// Declare that `component` depends on `dependency.component`.
    ///
    /// Declarations accumulate; nothing is deduplicated or removed. When the
    /// graph rejects cycles, a declaration that would close one fails with
    /// `DependencyError::Cycle` and leaves the graph untouched.
    pub fn register_dependency(
        &mut self,
        component: impl Into<ComponentId>,
        dependency: VersionDependency,
    ) -> Result<(), EvolveError> {
        let component = component.into();

        if self.reject_cycles {
            if let Some(mut cycle) = self.path_between(&dependency.component, &component) {
                // path runs dependency .. component; rotate so the cycle
                // starts at the declaring component
                cycle.rotate_right(1);
                tracing::warn!(
                    "Rejected dependency {} -> {}: would close a cycle",
                    component,
                    dependency.component
                );
                return Err(DependencyError::Cycle(cycle).into());
            }
        }

        tracing::debug!(
            "Registered dependency {} -> {} ({})",
            component,
            dependency.component,
            dependency.requirement()
        );
        self.dependencies
            .entry(component)
            .or_default()
            .push(dependency);
        self.rebuild_edges();
        Ok(())
    }

    fn rebuild_edges(&mut self) {
        self.edges = self
            .dependencies
            .iter()
            .map(|(component, deps)| {
                let targets = deps.iter().map(|d| d.component.clone()).collect();
                (component.clone(), targets)
            })
            .collect();
    }

    /// Check every declared dependency of `component`.
    ///
    /// Returns `Ok(true)` when all are satisfied. Fails with
    /// `DependencyError::Missing` for a required dependency with no
    /// registered version, and `DependencyError::Incompatible` for any
    /// registered dependency whose version does not match its declaration.
    pub fn check_dependencies(&self, component: &str) -> Result<bool, EvolveError> {
        let Some(deps) = self.dependencies.get(component) else {
            return Ok(true);
        };

        for dep in deps {
            match self.versions.get(dep.component.as_str()) {
                None if dep.required => {
                    return Err(DependencyError::Missing {
                        component: ComponentId::new(component),
                        dependency: dep.component.clone(),
                    }
                    .into());
                }
                None => {}
                Some(found) if !dep.is_satisfied_by(found) => {
                    return Err(DependencyError::Incompatible {
                        component: ComponentId::new(component),
                        dependency: dep.component.clone(),
                        found: found.clone(),
                        requirement: dep.requirement(),
                    }
                    .into());
                }
                Some(_) => {}
            }
        }

        Ok(true)
    }

    /// Find dependency cycles.
    ///
    /// Depth-first search from every unvisited component (in name order),
    /// tracking the current path. Reaching a component already on the path
    /// reports the path suffix starting at that component as one cycle.
    ///
    /// The walk keeps its own stack, so chain depth is bounded by memory,
    /// not by the thread's stack.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<ComponentId>> {
        let mut visited = BTreeSet::new();
        let mut cycles = Vec::new();

        for node in self.nodes() {
            if visited.insert(node) {
                self.cycle_walk(node, &mut visited, &mut cycles);
            }
        }

        if !cycles.is_empty() {
            tracing::warn!("Dependency graph contains {} cycle(s)", cycles.len());
        }
        cycles
    }

    fn cycle_walk<'a>(
        &'a self,
        start: &'a ComponentId,
        visited: &mut BTreeSet<&'a ComponentId>,
        cycles: &mut Vec<Vec<ComponentId>>,
    ) {
        // path[i] is the node whose children are stack[i]
        let mut path = vec![start];
        let mut on_path = BTreeMap::from([(start, 0usize)]);
        let mut stack = vec![self.depends_on(start)];

        while let Some(children) = stack.last_mut() {
            match children.next() {
                Some(next) => {
                    if let Some(&at) = on_path.get(next) {
                        cycles.push(path[at..].iter().map(|n| (*n).clone()).collect());
                    } else if visited.insert(next) {
                        on_path.insert(next, path.len());
                        path.push(next);
                        stack.push(self.depends_on(next));
                    }
                }
                None => {
                    stack.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(done);
                    }
                }
            }
        }
    }

    /// Order components so each follows everything it depends on.
    ///
    /// Fails with `DependencyError::Cycle` (the first cycle found) instead of
    /// producing a partial order.
    pub fn get_update_order(&self) -> Result<Vec<ComponentId>, EvolveError> {
        if let Some(cycle) = self.find_cycles().into_iter().next() {
            return Err(DependencyError::Cycle(cycle).into());
        }

        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        for node in self.nodes() {
            if !visited.insert(node) {
                continue;
            }
            // post-order: a component is emitted once all its dependencies are
            let mut stack = vec![(node, self.depends_on(node))];
            while let Some((current, children)) = stack.last_mut() {
                match children.next() {
                    Some(next) => {
                        if visited.insert(next) {
                            stack.push((next, self.depends_on(next)));
                        }
                    }
                    None => {
                        order.push((*current).clone());
                        stack.pop();
                    }
                }
            }
        }
        Ok(order)
    }

    /// Components that declared a dependency on `component`.
    #[must_use]
    pub fn get_dependent_components(&self, component: &str) -> BTreeSet<ComponentId> {
        self.edges
            .iter()
            .filter(|(_, targets)| targets.contains(component))
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// The registered version of a component.
    #[must_use]
    pub fn version_of(&self, component: &str) -> Option<&Version> {
        self.versions.get(component)
    }

    /// Declared dependencies of a component, in registration order.
    #[must_use]
    pub fn dependencies_of(&self, component: &str) -> &[VersionDependency] {
        self.dependencies
            .get(component)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every component known to the graph: registered, declaring, or depended on.
    #[must_use]
    pub fn components(&self) -> Vec<ComponentId> {
        self.nodes().into_iter().cloned().collect()
    }

    fn nodes(&self) -> BTreeSet<&ComponentId> {
        self.versions
            .keys()
            .chain(self.edges.keys())
            .chain(self.edges.values().flatten())
            .collect()
    }

    fn depends_on(&self, component: &ComponentId) -> btree_set::Iter<'_, ComponentId> {
        self.edges
            .get(component)
            .map(BTreeSet::iter)
            .unwrap_or_default()
    }

    /// A path `from -> ... -> to` along dependency edges, if one exists.
    fn path_between(&self, from: &ComponentId, to: &ComponentId) -> Option<Vec<ComponentId>> {
        if from == to {
            return Some(vec![from.clone()]);
        }

        let mut visited = BTreeSet::from([from]);
        let mut stack = vec![(from, self.depends_on(from))];
        while let Some((_, children)) = stack.last_mut() {
            match children.next() {
                Some(next) if next == to => {
                    let mut path: Vec<ComponentId> =
                        stack.iter().map(|(node, _)| (*node).clone()).collect();
                    path.push(next.clone());
                    return Some(path);
                }
                Some(next) => {
                    if visited.insert(next) {
                        stack.push((next, self.depends_on(next)));
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
        None
    }
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

/// Serializable representation of the graph for snapshots.
///
/// Edges are not stored; they are derived from the declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub versions: BTreeMap<ComponentId, Version>,
    pub dependencies: BTreeMap<ComponentId, Vec<VersionDependency>>,
}

impl From<&DependencyGraph> for GraphSnapshot {
    fn from(graph: &DependencyGraph) -> Self {
        Self {
            versions: graph.versions.clone(),
            dependencies: graph.dependencies.clone(),
        }
    }
}

impl DependencyGraph {
    /// Replace all state with a snapshot, keeping the cycle policy.
    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        self.versions = snapshot.versions;
        self.dependencies = snapshot.dependencies;
        self.rebuild_edges();
    }
}

// =============================================================================
// TESTS
// =============================================================================
