// Route filter: the selectable route list and the current selection.
// The list is built once from the first poll that observed routes; after that
// only the labels change as route names arrive.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{RouteCatalog, compare_route_ids, route_label};
use crate::error::{Result, TransitError};
use crate::models::{ALL_ROUTES, FilterState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug)]
pub struct FilterController {
    options: Vec<RouteOption>,
    selected: FilterState,
    initialized: bool,
    default_route: String,
}

impl FilterController {
    pub fn new(default_route: impl Into<String>) -> Self {
        FilterController {
            options: Vec::new(),
            selected: FilterState::All,
            initialized: false,
            default_route: default_route.into(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn options(&self) -> &[RouteOption] {
        &self.options
    }

    pub fn current(&self) -> &FilterState {
        &self.selected
    }

    /// Builds the route list. Returns `Ok(true)` when the list was built,
    /// `Ok(false)` when it already exists for the same routes, and an error
    /// when a rebuild is attempted with a different route set.
    pub fn build_once(&mut self, observed: &HashSet<String>, catalog: &RouteCatalog) -> Result<bool> {
        if self.initialized {
            let built: HashSet<&str> = self.route_values().collect();
            let same = built.len() == observed.len()
                && observed.iter().all(|r| built.contains(r.as_str()));
            if same {
                return Ok(false);
            }
            return Err(TransitError::DropdownAlreadyBuilt {
                built: built.len(),
                observed: observed.len(),
            });
        }

        let mut routes: Vec<&String> = observed.iter().collect();
        routes.sort_by(|a, b| compare_route_ids(a, b));

        self.options.clear();
        self.options.push(RouteOption {
            value: ALL_ROUTES.to_string(),
            label: "All Routes".to_string(),
        });
        self.options.extend(routes.into_iter().map(|route| RouteOption {
            value: route.clone(),
            label: route_label(route, catalog.get(route)),
        }));

        if observed.contains(&self.default_route) {
            self.selected = FilterState::Route(self.default_route.clone());
        }
        self.initialized = true;

        info!(
            "📋 Route list built: {} routes, selected '{}'",
            self.options.len() - 1,
            self.selected
        );
        Ok(true)
    }

    /// Rewrites the label of an existing entry. Returns whether one matched.
    pub fn patch_label(&mut self, route_id: &str, catalog: &RouteCatalog) -> bool {
        match self.options.iter_mut().skip(1).find(|o| o.value == route_id) {
            Some(option) => {
                option.label = route_label(route_id, catalog.get(route_id));
                true
            }
            None => false,
        }
    }

    /// Changes the selection. The value must be "all" or a listed route.
    pub fn select(&mut self, value: &str) -> Result<&FilterState> {
        let known = value == ALL_ROUTES || self.route_values().any(|r| r == value);
        if !known {
            warn!("⚠️  Ignoring selection of unknown route '{}'", value);
            return Err(TransitError::UnknownRoute(value.to_string()));
        }
        self.selected = FilterState::from_value(value);
        Ok(&self.selected)
    }

    fn route_values(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter(|o| o.value != ALL_ROUTES)
            .map(|o| o.value.as_str())
    }
}
