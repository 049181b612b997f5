use std::collections::HashMap;

use axum::http::Method;

use super::pattern::{normalize_path, RoutePattern};

#[derive(Debug)]
pub struct Route<H> {
    pub method: Method,
    pub pattern: RoutePattern,
    pub handler: H,
}

#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub handler: &'a H,
    pub params: HashMap<String, String>,
}

/// Ordered route list with an exact-match index for placeholder-free paths.
#[derive(Debug)]
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
    exact: HashMap<(Method, String), usize>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self { routes: Vec::new(), exact: HashMap::new() }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: Method, pattern: &str, handler: H) -> Self {
        let pattern = RoutePattern::compile(pattern);
        if !pattern.has_params() {
            // First declaration wins, as in the ordered scan
            self.exact
                .entry((method.clone(), pattern.as_str().to_string()))
                .or_insert(self.routes.len());
        }
        self.routes.push(Route { method, pattern, handler });
        self
    }

    pub fn get(self, pattern: &str, handler: H) -> Self {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: H) -> Self {
        self.route(Method::POST, pattern, handler)
    }

    /// Exact lookup first, then placeholder patterns in declaration order.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_, H>> {
        let method = if method == Method::HEAD { &Method::GET } else { method };
        let path = normalize_path(path);

        if let Some(&index) = self.exact.get(&(method.clone(), path.to_string())) {
            return Some(RouteMatch { handler: &self.routes[index].handler, params: HashMap::new() });
        }

        self.routes
            .iter()
            .filter(|route| route.method == *method && route.pattern.has_params())
            .find_map(|route| {
                route
                    .pattern
                    .matches(path)
                    .map(|params| RouteMatch { handler: &route.handler, params })
            })
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route<H>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
