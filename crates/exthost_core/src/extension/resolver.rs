//! Dependency graph construction and load-order resolution.
//!
//! # Responsibility
//! - Build the "depends on" graph over one load cycle's descriptors.
//! - Produce a load order plus one exclusion per extension that cannot load.
//!
//! # Invariants
//! - Every extension in `order` appears after all of its dependencies.
//! - Ties between independent extensions follow declaration order.
//! - Only members of a cycle are excluded as `CircularDependency`; extensions
//!   that merely depend on a cycle member are `UnsatisfiedDependency`.
//! - Resolution is a pure function of its input.

use crate::extension::descriptor::ExtensionDescriptor;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Why an extension was left out of the load order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Direct dependencies that are absent, disabled or themselves excluded.
    UnsatisfiedDependency { unavailable: Vec<String> },
    /// Members of the dependency cycle, in declaration order.
    CircularDependency { cycle: Vec<String> },
    /// Another descriptor already declared this name.
    DuplicateName { first_origin: String },
    /// A dependency resolved but failed while initializing this session.
    DependencyLoadFailed { failed: Vec<String> },
}

impl Display for ExclusionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsatisfiedDependency { unavailable } => {
                write!(f, "unsatisfied dependency: requires {}", quote_list(unavailable))
            }
            Self::CircularDependency { cycle } => {
                write!(f, "circular dependency between {}", quote_list(cycle))
            }
            Self::DuplicateName { first_origin } => {
                write!(f, "duplicate extension name, first declared by `{first_origin}`")
            }
            Self::DependencyLoadFailed { failed } => {
                write!(f, "dependency failed to load: {}", quote_list(failed))
            }
        }
    }
}

/// One extension excluded from loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub descriptor: Arc<ExtensionDescriptor>,
    pub reason: ExclusionReason,
}

/// Output of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Extensions to load, dependencies first.
    pub order: Vec<Arc<ExtensionDescriptor>>,
    /// Excluded extensions in declaration order.
    pub excluded: Vec<Exclusion>,
    /// Each detected cycle once, members in declaration order.
    pub cycles: Vec<Vec<String>>,
}

impl Resolution {
    pub fn order_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|descriptor| descriptor.name.as_str())
            .collect()
    }

    pub fn exclusion(&self, name: &str) -> Option<&Exclusion> {
        self.excluded
            .iter()
            .find(|exclusion| exclusion.descriptor.name == name)
    }
}

/// Directed "depends on" graph for one load cycle.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    duplicates: Vec<(usize, Arc<ExtensionDescriptor>, String)>,
}

#[derive(Debug, Clone)]
struct Node {
    descriptor: Arc<ExtensionDescriptor>,
    position: usize,
    /// Indices of declared dependencies present in the graph, deduplicated.
    edges: Vec<usize>,
    has_absent_dependency: bool,
}

impl DependencyGraph {
    /// Builds the graph; descriptors are taken in declaration order.
    pub fn build(descriptors: impl IntoIterator<Item = Arc<ExtensionDescriptor>>) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut duplicates = Vec::new();

        for (position, descriptor) in descriptors.into_iter().enumerate() {
            if let Some(&first) = index.get(descriptor.name.as_str()) {
                let first_origin = nodes[first].descriptor.origin.clone();
                duplicates.push((position, descriptor, first_origin));
                continue;
            }
            index.insert(descriptor.name.clone(), nodes.len());
            nodes.push(Node {
                descriptor,
                position,
                edges: Vec::new(),
                has_absent_dependency: false,
            });
        }

        for node in &mut nodes {
            let mut seen = BTreeSet::new();
            for dependency in &node.descriptor.dependencies {
                match index.get(dependency.as_str()) {
                    Some(&target) => {
                        if seen.insert(target) {
                            node.edges.push(target);
                        }
                    }
                    None => node.has_absent_dependency = true,
                }
            }
        }

        Self {
            nodes,
            index,
            duplicates,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Computes the load order and the exclusions.
    pub fn resolve(&self) -> Resolution {
        let count = self.nodes.len();
        let mut excluded: Vec<Option<ExclusionReason>> = vec![None; count];

        for (slot, node) in excluded.iter_mut().zip(&self.nodes) {
            if node.has_absent_dependency {
                *slot = Some(unsatisfied());
            }
        }
        self.propagate_unsatisfied(&mut excluded);

        let mut cycles = Vec::new();
        for component in self.strongly_connected(&excluded) {
            let is_cycle = component.len() > 1
                || component
                    .first()
                    .is_some_and(|&only| self.nodes[only].edges.contains(&only));
            if !is_cycle {
                continue;
            }
            let names: Vec<String> = component
                .iter()
                .map(|&member| self.nodes[member].descriptor.name.clone())
                .collect();
            for &member in &component {
                excluded[member] = Some(ExclusionReason::CircularDependency {
                    cycle: names.clone(),
                });
            }
            cycles.push(names);
        }
        self.propagate_unsatisfied(&mut excluded);
        self.fill_unavailable(&mut excluded);

        let order = self.topological_order(&excluded);

        let mut exclusions: Vec<(usize, Exclusion)> = excluded
            .into_iter()
            .enumerate()
            .filter_map(|(at, reason)| {
                let node = &self.nodes[at];
                reason.map(|reason| {
                    (
                        node.position,
                        Exclusion {
                            descriptor: Arc::clone(&node.descriptor),
                            reason,
                        },
                    )
                })
            })
            .collect();
        exclusions.extend(self.duplicates.iter().map(|(position, descriptor, origin)| {
            (
                *position,
                Exclusion {
                    descriptor: Arc::clone(descriptor),
                    reason: ExclusionReason::DuplicateName {
                        first_origin: origin.clone(),
                    },
                },
            )
        }));
        exclusions.sort_by_key(|(position, _)| *position);

        Resolution {
            order,
            excluded: exclusions.into_iter().map(|(_, exclusion)| exclusion).collect(),
            cycles,
        }
    }

    /// Excludes every node with an excluded dependency until nothing changes.
    fn propagate_unsatisfied(&self, excluded: &mut [Option<ExclusionReason>]) {
        loop {
            let mut changed = false;
            for (at, node) in self.nodes.iter().enumerate() {
                if excluded[at].is_some() {
                    continue;
                }
                if node.edges.iter().any(|&target| excluded[target].is_some()) {
                    excluded[at] = Some(unsatisfied());
                    changed = true;
                }
            }
            if !changed {
                return;
            }
        }
    }

    /// Lists, per unsatisfied node, every direct dependency that cannot load.
    fn fill_unavailable(&self, excluded: &mut [Option<ExclusionReason>]) {
        let blocked: Vec<bool> = excluded.iter().map(Option::is_some).collect();
        for (at, node) in self.nodes.iter().enumerate() {
            if let Some(ExclusionReason::UnsatisfiedDependency { unavailable }) = &mut excluded[at]
            {
                *unavailable = node
                    .descriptor
                    .dependencies
                    .iter()
                    .filter(|dependency| match self.index.get(dependency.as_str()) {
                        Some(&target) => blocked[target],
                        None => true,
                    })
                    .cloned()
                    .collect();
            }
        }
    }

    /// Tarjan's algorithm over the nodes not yet excluded.
    ///
    /// The depth-first walk keeps its own frame stack, so chain length is not
    /// bounded by the thread stack. Components come out with members sorted
    /// by declaration order.
    fn strongly_connected(&self, excluded: &[Option<ExclusionReason>]) -> Vec<Vec<usize>> {
        struct Tarjan<'a> {
            graph: &'a DependencyGraph,
            excluded: &'a [Option<ExclusionReason>],
            next_index: usize,
            index: Vec<Option<usize>>,
            low_link: Vec<usize>,
            on_stack: Vec<bool>,
            stack: Vec<usize>,
            // (node, next edge to follow)
            frames: Vec<(usize, usize)>,
            components: Vec<Vec<usize>>,
        }

        impl Tarjan<'_> {
            fn enter(&mut self, at: usize) {
                self.index[at] = Some(self.next_index);
                self.low_link[at] = self.next_index;
                self.next_index += 1;
                self.stack.push(at);
                self.on_stack[at] = true;
                self.frames.push((at, 0));
            }

            fn walk(&mut self, root: usize) {
                let graph = self.graph;
                self.enter(root);

                while let Some(&(at, edge)) = self.frames.last() {
                    if let Some(&target) = graph.nodes[at].edges.get(edge) {
                        let top = self.frames.len() - 1;
                        self.frames[top].1 += 1;
                        if self.excluded[target].is_some() {
                            continue;
                        }
                        match self.index[target] {
                            None => self.enter(target),
                            Some(target_index) if self.on_stack[target] => {
                                self.low_link[at] = self.low_link[at].min(target_index);
                            }
                            Some(_) => {}
                        }
                        continue;
                    }

                    self.frames.pop();
                    if let Some(&(parent, _)) = self.frames.last() {
                        self.low_link[parent] = self.low_link[parent].min(self.low_link[at]);
                    }
                    if Some(self.low_link[at]) == self.index[at] {
                        self.close_component(at);
                    }
                }
            }

            fn close_component(&mut self, root: usize) {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack[member] = false;
                    component.push(member);
                    if member == root {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }

        let count = self.nodes.len();
        let mut tarjan = Tarjan {
            graph: self,
            excluded,
            next_index: 0,
            index: vec![None; count],
            low_link: vec![0; count],
            on_stack: vec![false; count],
            stack: Vec::new(),
            frames: Vec::new(),
            components: Vec::new(),
        };
        for at in 0..count {
            if excluded[at].is_none() && tarjan.index[at].is_none() {
                tarjan.walk(at);
            }
        }

        let mut components = tarjan.components;
        components.sort_by_key(|component| component.first().copied());
        components
    }

    /// Kahn's algorithm; the ready set is ordered by declaration position.
    fn topological_order(
        &self,
        excluded: &[Option<ExclusionReason>],
    ) -> Vec<Arc<ExtensionDescriptor>> {
        let count = self.nodes.len();
        let mut pending = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (at, node) in self.nodes.iter().enumerate() {
            if excluded[at].is_some() {
                continue;
            }
            for &target in &node.edges {
                pending[at] += 1;
                dependents[target].push(at);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count)
            .filter(|&at| excluded[at].is_none() && pending[at] == 0)
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(at) = ready.pop_first() {
            order.push(Arc::clone(&self.nodes[at].descriptor));
            for &dependent in &dependents[at] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }
}

/// Resolves one set of descriptors given in declaration order.
pub fn resolve(descriptors: &[Arc<ExtensionDescriptor>]) -> Resolution {
    DependencyGraph::build(descriptors.iter().cloned()).resolve()
}

fn unsatisfied() -> ExclusionReason {
    ExclusionReason::UnsatisfiedDependency {
        unavailable: Vec::new(),
    }
}

fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{resolve, DependencyGraph, ExclusionReason, Resolution};
    use crate::extension::descriptor::ExtensionDescriptor;
    use std::sync::Arc;

    fn ext(name: &str, dependencies: &[&str]) -> Arc<ExtensionDescriptor> {
        Arc::new(ExtensionDescriptor::new(name).with_dependencies(dependencies.iter().copied()))
    }

    fn reason<'a>(resolution: &'a Resolution, name: &str) -> &'a ExclusionReason {
        &resolution
            .exclusion(name)
            .unwrap_or_else(|| panic!("{name} should be excluded"))
            .reason
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let resolution = resolve(&[
            ext("editor", &["core", "midi"]),
            ext("midi", &["core"]),
            ext("core", &[]),
        ]);

        assert!(resolution.excluded.is_empty());
        assert_eq!(resolution.order_names(), vec!["core", "midi", "editor"]);
    }

    #[test]
    fn independent_extensions_keep_declaration_order() {
        let resolution = resolve(&[ext("c", &[]), ext("a", &[]), ext("b", &[])]);
        assert_eq!(resolution.order_names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn missing_dependency_excludes_transitive_dependents() {
        let resolution = resolve(&[
            ext("a", &["z"]),
            ext("b", &["a"]),
            ext("c", &["b"]),
            ext("d", &[]),
        ]);

        assert_eq!(resolution.order_names(), vec!["d"]);
        assert_eq!(
            reason(&resolution, "a"),
            &ExclusionReason::UnsatisfiedDependency {
                unavailable: vec!["z".to_string()]
            }
        );
        assert_eq!(
            reason(&resolution, "b"),
            &ExclusionReason::UnsatisfiedDependency {
                unavailable: vec!["a".to_string()]
            }
        );
        assert_eq!(
            reason(&resolution, "c"),
            &ExclusionReason::UnsatisfiedDependency {
                unavailable: vec!["b".to_string()]
            }
        );
    }

    #[test]
    fn two_member_cycle_excludes_exactly_its_members() {
        let resolution = resolve(&[ext("a", &["b"]), ext("b", &["a"]), ext("c", &[])]);

        let cycle = ExclusionReason::CircularDependency {
            cycle: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(reason(&resolution, "a"), &cycle);
        assert_eq!(reason(&resolution, "b"), &cycle);
        assert_eq!(resolution.cycles.len(), 1);
        assert_eq!(resolution.order_names(), vec!["c"]);
    }

    #[test]
    fn dependents_of_a_cycle_are_unsatisfied_not_circular() {
        let resolution = resolve(&[
            ext("x", &["a"]),
            ext("a", &["b"]),
            ext("b", &["c"]),
            ext("c", &["a"]),
        ]);

        assert_eq!(
            reason(&resolution, "x"),
            &ExclusionReason::UnsatisfiedDependency {
                unavailable: vec!["a".to_string()]
            }
        );
        assert_eq!(
            resolution.cycles,
            vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]
        );
        assert!(resolution.order.is_empty());
    }

    #[test]
    fn self_dependency_is_a_cycle_of_one() {
        let resolution = resolve(&[ext("loop", &["loop"]), ext("ok", &[])]);

        assert_eq!(
            reason(&resolution, "loop"),
            &ExclusionReason::CircularDependency {
                cycle: vec!["loop".to_string()]
            }
        );
        assert_eq!(resolution.order_names(), vec!["ok"]);
    }

    #[test]
    fn separate_cycles_are_reported_separately() {
        let resolution = resolve(&[
            ext("a", &["b"]),
            ext("b", &["a"]),
            ext("c", &["d"]),
            ext("d", &["c"]),
        ]);
        assert_eq!(resolution.cycles.len(), 2);
        assert_eq!(resolution.excluded.len(), 4);
    }

    #[test]
    fn duplicate_names_keep_first_declaration() {
        let mut second = ExtensionDescriptor::new("midi");
        second.origin = "midi-copy".to_string();
        let resolution = resolve(&[ext("midi", &[]), Arc::new(second)]);

        assert_eq!(resolution.order_names(), vec!["midi"]);
        assert_eq!(resolution.excluded.len(), 1);
        assert_eq!(resolution.excluded[0].descriptor.origin, "midi-copy");
        assert_eq!(
            resolution.excluded[0].reason,
            ExclusionReason::DuplicateName {
                first_origin: "midi".to_string()
            }
        );
    }

    #[test]
    fn unsatisfied_lists_every_unavailable_dependency() {
        let resolution = resolve(&[
            ext("a", &["gone"]),
            ext("b", &["a", "ok", "missing"]),
            ext("ok", &[]),
        ]);
        assert_eq!(
            reason(&resolution, "b"),
            &ExclusionReason::UnsatisfiedDependency {
                unavailable: vec!["a".to_string(), "missing".to_string()]
            }
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let descriptors = vec![
            ext("a", &["b"]),
            ext("b", &["a"]),
            ext("c", &["z"]),
            ext("d", &[]),
            ext("e", &["d"]),
        ];
        let graph = DependencyGraph::build(descriptors.iter().cloned());
        assert_eq!(graph.resolve(), graph.resolve());
        assert_eq!(resolve(&descriptors), resolve(&descriptors));
    }

    #[test]
    fn every_ordered_extension_follows_its_dependencies() {
        let descriptors = vec![
            ext("f", &["e", "a"]),
            ext("e", &["d"]),
            ext("d", &["b", "c"]),
            ext("c", &["a"]),
            ext("b", &["a"]),
            ext("a", &[]),
        ];
        let resolution = resolve(&descriptors);
        let names = resolution.order_names();
        assert_eq!(names.len(), descriptors.len());
        for descriptor in &resolution.order {
            let at = names.iter().position(|name| *name == descriptor.name);
            for dependency in &descriptor.dependencies {
                let dep_at = names.iter().position(|name| name == dependency);
                assert!(dep_at < at, "{dependency} must load before {}", descriptor.name);
            }
        }
    }

    #[test]
    fn very_long_dependency_chain_resolves() {
        const LENGTH: usize = 50_000;
        let names: Vec<String> = (0..LENGTH).map(|at| format!("n{at}")).collect();
        let chain: Vec<_> = (0..LENGTH)
            .map(|at| match names.get(at + 1) {
                Some(next) => ext(&names[at], &[next.as_str()]),
                None => ext(&names[at], &[]),
            })
            .collect();

        let resolution = resolve(&chain);
        assert!(resolution.cycles.is_empty());
        assert_eq!(resolution.order.len(), LENGTH);
        assert_eq!(resolution.order[0].name, names[LENGTH - 1]);
        assert_eq!(resolution.order[LENGTH - 1].name, names[0]);
    }

    #[test]
    fn long_cycle_is_one_component() {
        const LENGTH: usize = 2_000;
        let names: Vec<String> = (0..LENGTH).map(|at| format!("n{at}")).collect();
        let ring: Vec<_> = (0..LENGTH)
            .map(|at| ext(&names[at], &[names[(at + 1) % LENGTH].as_str()]))
            .collect();

        let resolution = resolve(&ring);
        assert!(resolution.order.is_empty());
        assert_eq!(resolution.cycles, vec![names.clone()]);
        assert_eq!(resolution.excluded.len(), LENGTH);
    }
}
