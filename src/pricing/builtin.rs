//! Built-in price table seeded at startup.

use std::collections::HashMap;

use super::ModelPricing;

const GPT5: ModelPricing = ModelPricing::with_cached(1.25, 10.0, 0.125);
const GPT5_MINI: ModelPricing = ModelPricing::with_cached(0.25, 2.0, 0.025);
const GPT52: ModelPricing = ModelPricing::with_cached(1.75, 14.0, 0.175);
const SONNET: ModelPricing = ModelPricing::with_cached(3.0, 15.0, 0.3);
const HAIKU: ModelPricing = ModelPricing::with_cached(0.8, 4.0, 0.08);
const OPUS: ModelPricing = ModelPricing::with_cached(5.0, 25.0, 0.5);

const DEFAULTS: &[(&str, ModelPricing)] = &[
    ("gpt-5", GPT5),
    ("gpt-5-codex", GPT5),
    ("gpt-5.1", GPT5),
    ("gpt-5.1-codex", GPT5),
    ("gpt-5.1-codex-max", GPT5),
    ("gpt-5-codex-mini", GPT5_MINI),
    ("gpt-5.1-codex-mini", GPT5_MINI),
    ("gpt-5.2", GPT52),
    ("gpt-5.2-codex", GPT52),
    ("gemini-2.5-pro", ModelPricing::new(1.25, 10.0)),
    ("gemini-2.5-flash", ModelPricing::new(0.15, 0.6)),
    ("gemini-2.5-flash-lite", ModelPricing::new(0.075, 0.3)),
    ("gemini-3-pro-preview", ModelPricing::new(3.0, 15.0)),
    ("gemini-3-flash-preview", ModelPricing::new(0.5, 3.0)),
    ("gemini-3-pro-image-preview", ModelPricing::new(3.0, 15.0)),
    ("kiro-claude-sonnet-4", SONNET),
    ("kiro-claude-sonnet-4-agentic", SONNET),
    ("kiro-claude-sonnet-4-5", SONNET),
    ("kiro-claude-sonnet-4-5-agentic", SONNET),
    ("kiro-claude-haiku-4-5", HAIKU),
    ("kiro-claude-haiku-4-5-agentic", HAIKU),
    ("kiro-claude-opus-4-5", OPUS),
    ("kiro-claude-opus-4-5-agentic", OPUS),
    ("gemini-claude-sonnet-4-5", ModelPricing::new(3.0, 15.0)),
    ("gemini-claude-sonnet-4-5-thinking", ModelPricing::new(3.0, 15.0)),
    ("gemini-claude-opus-4-5-thinking", ModelPricing::new(5.0, 25.0)),
    ("gpt-oss-120b-medium", ModelPricing::new(1.0, 5.0)),
];

/// The built-in price table, keyed by exact model identifier.
pub fn default_model_pricing() -> HashMap<String, ModelPricing> {
    DEFAULTS
        .iter()
        .map(|(model, pricing)| ((*model).to_string(), *pricing))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_models() {
        assert_eq!(default_model_pricing().len(), DEFAULTS.len());
    }

    #[test]
    fn test_prices_are_positive() {
        for (model, pricing) in default_model_pricing() {
            assert!(pricing.input_price_per_million > 0.0, "{}", model);
            assert!(pricing.output_price_per_million > 0.0, "{}", model);
        }
    }
}
