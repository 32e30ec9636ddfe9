//! Cursor over a set of applications in the canonical order.
//!
//! Every pass that asks "which app is placed next" walks the same
//! request-wide order, so placement decisions are reproducible even though
//! the apps themselves live in maps.

use std::collections::BTreeMap;

use crate::application::{Application, PriorityFilter};

/// Independent cursor; `clone()` forks it at the current position.
#[derive(Debug, Clone)]
pub struct AppIter {
    names: Vec<String>,
    pos: usize,
}

impl AppIter {
    /// Walk the members of `set` admitted by `filter`, in `order`.
    pub fn new(set: &BTreeMap<String, Application>, order: &[String], filter: PriorityFilter) -> Self {
        let names = order
            .iter()
            .filter(|name| set.get(*name).is_some_and(|app| filter.admits(app)))
            .cloned()
            .collect();
        Self { names, pos: 0 }
    }

    /// The app the cursor points at, without moving.
    pub fn current(&self) -> Option<&str> {
        self.names.get(self.pos).map(String::as_str)
    }

    pub fn advance(&mut self) {
        if self.pos < self.names.len() {
            self.pos += 1;
        }
    }

    pub fn is_drained(&self) -> bool {
        self.pos >= self.names.len()
    }

    pub fn remaining(&self) -> &[String] {
        &self.names[self.pos.min(self.names.len())..]
    }
}

impl Iterator for AppIter {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let name = self.current().map(str::to_string);
        self.advance();
        name
    }
}
