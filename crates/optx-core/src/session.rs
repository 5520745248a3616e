//! # Session and Type Context
//!
//! Both values are pass-through context. The estimation core forwards them to
//! collaborators (the filter selectivity estimator in particular) without
//! interpreting them, except for `Values` sizing, which consults the declared
//! width of fixed-width types.

use crate::expr::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-query context: identity plus free-form session properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub query_id: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Session {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            properties: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    BigInt,
    Double,
    Date,
    Varchar,
}

impl DataType {
    /// Width in bytes of a non-null value, `None` for variable-width types.
    pub fn fixed_width(&self) -> Option<f64> {
        match self {
            DataType::Boolean => Some(1.0),
            DataType::BigInt | DataType::Double => Some(8.0),
            DataType::Date => Some(4.0),
            DataType::Varchar => None,
        }
    }
}

/// Symbol → type mapping for the plan being estimated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeProvider(HashMap<Symbol, DataType>);

impl TypeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: impl Into<Symbol>, data_type: DataType) -> Self {
        self.0.insert(symbol.into(), data_type);
        self
    }

    pub fn get(&self, symbol: &Symbol) -> Option<DataType> {
        self.0.get(symbol).copied()
    }
}

impl FromIterator<(Symbol, DataType)> for TypeProvider {
    fn from_iter<I: IntoIterator<Item = (Symbol, DataType)>>(iter: I) -> Self {
        TypeProvider(iter.into_iter().collect())
    }
}
