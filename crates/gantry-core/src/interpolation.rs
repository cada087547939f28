//! `${{ ... }}` expression interpolation for step configuration.

use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("interpolation pattern is valid")
});

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Workflow and job environment
    pub variables: IndexMap<String, String>,
    /// Matrix values for the current instance
    pub matrix: IndexMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_matrix(mut self, matrix: IndexMap<String, String>) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_variables(mut self, variables: IndexMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` - direct variable lookup
    /// - `${{ env.VAR }}` - variable, falling back to the process environment
    /// - `${{ matrix.key }}` - matrix value
    ///
    /// Unknown references resolve to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        if !input.contains("${{") {
            return input.to_string();
        }

        EXPRESSION
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .into_owned()
    }

    /// Interpolate every value of a map, keeping keys untouched.
    pub fn interpolate_map(&self, input: &IndexMap<String, String>) -> IndexMap<String, String> {
        input
            .iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        self.variables.get(expr).cloned().unwrap_or_default()
    }
}
