//! Best-effort dependency ordering of tables.
//!
//! Tables are ordered so that a table referenced by a foreign key comes
//! before the tables referencing it. Tables that reference each other,
//! directly or through a longer chain, form a strongly connected component
//! and share one position in the order. Each component's key is the length of
//! its longest chain of foreign keys into other components; ties, including
//! the members of one component, keep name order. Self references are
//! ignored.
//!
//! The result is only best effort for cyclic schemas: callers that need
//! strict correctness in that case must disable foreign-key enforcement for
//! the duration of their bulk operation.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::schema::{Schema, TableInfo};

/// Orders the tables of `schema` dependencies first.
#[must_use]
pub fn best_effort_dag_sort(schema: &Schema) -> Vec<&TableInfo> {
    let tables: Vec<&TableInfo> = schema.tables().collect();
    let ids: BTreeMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(id, table)| (table.name.as_str(), id))
        .collect();
    // Forward references to tables the schema does not define are dropped.
    let edges: Vec<Vec<usize>> = tables
        .iter()
        .map(|table| {
            table
                .referenced_tables()
                .filter_map(|target| ids.get(target).copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .collect();

    let components = Components::of(&edges);
    for members in components.members.iter().filter(|m| m.len() > 1) {
        let names: Vec<&str> = members.iter().map(|id| tables[*id].name.as_str()).collect();
        warn!(tables = ?names, "Foreign key cycle; ordering is best effort");
    }

    let depths = components.depths(&edges);
    let mut order: Vec<usize> = (0..tables.len()).collect();
    order.sort_by_key(|id| (depths[components.component[*id]], *id));
    order.into_iter().map(|id| tables[id]).collect()
}

/// Minimum number of foreign-key hops from `from` to `to`, or `None` if `to`
/// is unreachable. Self references are not followed.
#[must_use]
pub fn hop_count(schema: &Schema, from: &str, to: &str) -> Option<usize> {
    let mut frontier = vec![from];
    let mut seen = BTreeSet::from([from]);
    let mut hops = 0;

    while !frontier.is_empty() {
        hops += 1;
        let mut next = Vec::new();
        for name in frontier {
            let Some(table) = schema.get_table(name) else {
                continue;
            };
            for target in table.referenced_tables() {
                if target == to {
                    return Some(hops);
                }
                if seen.insert(target) {
                    next.push(target);
                }
            }
        }
        frontier = next;
    }
    None
}

/// Strongly connected components of the foreign-key graph, found with
/// Tarjan's algorithm.
///
/// Components are numbered in completion order, so every component a
/// component references has a lower number than itself.
struct Components {
    /// Component number of each table.
    component: Vec<usize>,
    /// Tables of each component.
    members: Vec<Vec<usize>>,
}

struct Search<'a> {
    edges: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    visited: usize,
    result: Components,
}

impl Components {
    fn of(edges: &[Vec<usize>]) -> Self {
        let count = edges.len();
        let mut search = Search {
            edges,
            index: vec![None; count],
            lowlink: vec![0; count],
            stack: Vec::new(),
            on_stack: vec![false; count],
            visited: 0,
            result: Self {
                component: vec![0; count],
                members: Vec::new(),
            },
        };
        for node in 0..count {
            if search.index[node].is_none() {
                search.visit(node);
            }
        }
        search.result
    }

    /// Longest chain of references from each component into other components.
    fn depths(&self, edges: &[Vec<usize>]) -> Vec<usize> {
        let mut depths = vec![0; self.members.len()];
        for (component, members) in self.members.iter().enumerate() {
            let depth = members
                .iter()
                .flat_map(|node| &edges[*node])
                .map(|target| self.component[*target])
                .filter(|target| *target != component)
                .map(|target| depths[target] + 1)
                .max()
                .unwrap_or(0);
            depths[component] = depth;
        }
        depths
    }
}

impl Search<'_> {
    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.visited);
        self.lowlink[node] = self.visited;
        self.visited += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let edges = self.edges;
        for &target in &edges[node] {
            match self.index[target] {
                None => {
                    self.visit(target);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[target]);
                }
                Some(index) if self.on_stack[target] => {
                    self.lowlink[node] = self.lowlink[node].min(index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[node]) == self.index[node] {
            let number = self.result.members.len();
            let mut members = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                self.result.component[member] = number;
                members.push(member);
                if member == node {
                    break;
                }
            }
            members.sort_unstable();
            self.result.members.push(members);
        }
    }
}
