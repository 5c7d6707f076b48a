use crate::usage::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Price per 1M tokens in USD.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_creation: f64,
}

/// Price table with user overrides, shared read-mostly across requests.
pub struct PriceStore {
    prices: RwLock<HashMap<String, ModelPrice>>,
}

impl PriceStore {
    pub fn new(overrides: &HashMap<String, ModelPrice>) -> Self {
        let mut prices = built_in_prices();
        for (model, price) in overrides {
            prices.insert(model.clone(), price.clone());
        }
        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Replace overrides (called on config hot-reload).
    pub fn update_prices(&self, overrides: &HashMap<String, ModelPrice>) {
        let mut prices = built_in_prices();
        for (model, price) in overrides {
            prices.insert(model.clone(), price.clone());
        }
        if let Ok(mut p) = self.prices.write() {
            *p = prices;
        }
    }

    /// Cost of a request in micro-dollars. Returns None when the model
    /// has no price entry.
    pub fn cost_micros(&self, model: &str, usage: &Usage) -> Option<i64> {
        let prices = self.prices.read().ok()?;

        // Exact match first, then without a provider prefix.
        let price = prices.get(model).or_else(|| {
            let stripped = model.split('/').next_back().unwrap_or(model);
            prices.get(stripped)
        })?;

        let cache_read = usage.cache_read_tokens.unwrap_or(0);
        let cache_creation = usage.cache_creation_tokens.unwrap_or(0);
        // Cached reads are billed at the cache rate, not the input rate.
        let fresh_input = usage.input_tokens.unwrap_or(0).saturating_sub(cache_read);

        let usd = (fresh_input as f64 / 1e6) * price.input
            + (usage.output_tokens.unwrap_or(0) as f64 / 1e6) * price.output
            + (cache_read as f64 / 1e6) * price.cache_read
            + (cache_creation as f64 / 1e6) * price.cache_creation;

        Some((usd * 1e6).round() as i64)
    }
}

fn price(input: f64, output: f64, cache_read: f64, cache_creation: f64) -> ModelPrice {
    ModelPrice {
        input,
        output,
        cache_read,
        cache_creation,
    }
}

/// Built-in defaults for common models; the config can override any entry.
fn built_in_prices() -> HashMap<String, ModelPrice> {
    let mut m = HashMap::new();
    m.insert("gpt-4o".into(), price(2.5, 10.0, 1.25, 0.0));
    m.insert("gpt-4o-mini".into(), price(0.15, 0.6, 0.075, 0.0));
    m.insert("gpt-4.1".into(), price(2.0, 8.0, 0.5, 0.0));
    m.insert("o3".into(), price(2.0, 8.0, 0.5, 0.0));
    m.insert("claude-sonnet-4-20250514".into(), price(3.0, 15.0, 0.3, 3.75));
    m.insert("claude-opus-4-20250514".into(), price(15.0, 75.0, 1.5, 18.75));
    m.insert("claude-haiku-3-5-20241022".into(), price(0.8, 4.0, 0.08, 1.0));
    m.insert("gemini-2.5-pro".into(), price(1.25, 10.0, 0.31, 0.0));
    m.insert("gemini-2.5-flash".into(), price(0.3, 2.5, 0.075, 0.0));
    m.insert("gemini-2.0-flash".into(), price(0.1, 0.4, 0.025, 0.0));
    m
}
