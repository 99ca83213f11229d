use std::collections::HashMap;

use crate::backend::Value;

use super::NodeError;

/// A prepared-statement request: SQL text plus named bind variables
///
/// Bind variables are named `v1..vN` and sent positionally in that order.
#[derive(Debug, Clone, Default)]
pub struct Statement {
    sql: String,
    bind_vars: HashMap<String, Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bind_vars: HashMap::new(),
        }
    }

    /// Bind `args` as `v1..vN`
    pub fn with_args<I, V>(sql: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut stmt = Self::new(sql);
        for (i, arg) in args.into_iter().enumerate() {
            stmt.bind(format!("v{}", i + 1), arg);
        }
        stmt
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.bind_vars.insert(name.into(), value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind_vars(&self) -> &HashMap<String, Value> {
        &self.bind_vars
    }

    /// Bind variables in `v1..vN` order, where N is the number bound
    pub fn positional_args(&self) -> Result<Vec<Value>, NodeError> {
        (1..=self.bind_vars.len())
            .map(|i| {
                let name = format!("v{}", i);
                self.bind_vars
                    .get(&name)
                    .cloned()
                    .ok_or(NodeError::MissingBindVar(name))
            })
            .collect()
    }
}
