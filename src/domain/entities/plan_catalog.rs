use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanCatalogError {
    #[error("invalid plan catalog entry '{0}', expected plan=price_id")]
    MalformedEntry(String),

    #[error("price '{0}' is mapped to more than one plan")]
    DuplicatePrice(String),
}

/// Maps application plan codes to processor price ids.
///
/// Loaded from configuration as `pro=price_123,team=price_456`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanCatalog {
    by_price: HashMap<String, String>,
}

impl PlanCatalog {
    pub fn parse(raw: &str) -> Result<Self, PlanCatalogError> {
        let mut by_price = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (plan, price) = entry
                .split_once('=')
                .map(|(p, id)| (p.trim(), id.trim()))
                .filter(|(p, id)| !p.is_empty() && !id.is_empty())
                .ok_or_else(|| PlanCatalogError::MalformedEntry(entry.to_string()))?;

            if by_price.insert(price.to_string(), plan.to_string()).is_some() {
                return Err(PlanCatalogError::DuplicatePrice(price.to_string()));
            }
        }

        Ok(Self { by_price })
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            by_price: pairs
                .into_iter()
                .map(|(plan, price)| (price.to_string(), plan.to_string()))
                .collect(),
        }
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<&str> {
        self.by_price.get(price_id).map(String::as_str)
    }

    pub fn contains_price(&self, price_id: &str) -> bool {
        self.by_price.contains_key(price_id)
    }

    pub fn is_empty(&self) -> bool {
        self.by_price.is_empty()
    }
}
