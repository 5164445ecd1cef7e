//! Cycle detection over area reliance edges.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::CapabilityArea;
use crate::error::CycleError;

/// Every set of areas that rely on each other in a loop, including areas
/// that rely on themselves. Members and cycles follow declaration order.
///
/// Tarjan's strongly connected components. Edges to undeclared areas are
/// ignored here.
pub(super) fn find_cycles(areas: &IndexMap<String, CapabilityArea>) -> Vec<CycleError> {
    let mut tarjan = Tarjan {
        areas,
        index: 0,
        indices: HashMap::new(),
        lowlink: HashMap::new(),
        stack: Vec::new(),
        on_stack: vec![false; areas.len()],
        components: Vec::new(),
    };
    for node in 0..areas.len() {
        if !tarjan.indices.contains_key(&node) {
            tarjan.connect(node);
        }
    }

    let mut cycles: Vec<Vec<usize>> = tarjan
        .components
        .into_iter()
        .filter(|component| match component.as_slice() {
            [single] => areas[*single].reliant_areas.iter().any(|r| r == &areas[*single].id),
            _ => true,
        })
        .collect();
    for component in &mut cycles {
        component.sort_unstable();
    }
    cycles.sort_by_key(|component| component[0]);

    cycles
        .into_iter()
        .map(|component| CycleError {
            areas: component.into_iter().map(|i| areas[i].id.clone()).collect(),
        })
        .collect()
}

struct Tarjan<'a> {
    areas: &'a IndexMap<String, CapabilityArea>,
    index: usize,
    indices: HashMap<usize, usize>,
    lowlink: HashMap<usize, usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    components: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    fn connect(&mut self, node: usize) {
        self.indices.insert(node, self.index);
        self.lowlink.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let areas = self.areas;
        for reliant in &areas[node].reliant_areas {
            let Some(next) = areas.get_index_of(reliant) else {
                continue;
            };
            match self.indices.get(&next).copied() {
                None => {
                    self.connect(next);
                    let low = self.lowlink[&node].min(self.lowlink[&next]);
                    self.lowlink.insert(node, low);
                }
                Some(next_index) if self.on_stack[next] => {
                    let low = self.lowlink[&node].min(next_index);
                    self.lowlink.insert(node, low);
                }
                Some(_) => {}
            }
        }

        if self.lowlink[&node] == self.indices[&node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
