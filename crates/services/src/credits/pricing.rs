use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decimal places kept for stored credit amounts
pub const STORAGE_SCALE: u32 = 6;
/// Decimal places shown to users
pub const DISPLAY_SCALE: u32 = 2;

/// Round an amount for storage (half away from zero at 6 places)
pub fn round_for_storage(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(STORAGE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a balance for display (always up at 2 places)
pub fn round_for_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::ToPositiveInfinity)
}

/// Token counts reported by the model provider for one exchange
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Credits charged per token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRate {
    pub input: Decimal,
    pub output: Decimal,
}

impl ModelRate {
    pub const fn new(input: Decimal, output: Decimal) -> Self {
        Self { input, output }
    }
}

/// Per-model rate table with a fallback for unknown models
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRates {
    rates: HashMap<String, ModelRate>,
    default_rate: ModelRate,
}

impl ModelRates {
    pub fn new(rates: HashMap<String, ModelRate>, default_rate: ModelRate) -> Self {
        Self {
            rates,
            default_rate,
        }
    }

    /// Build a table from string rates (as found in configuration); invalid entries are rejected
    pub fn from_strings<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
        default_rate: (&str, &str),
    ) -> anyhow::Result<Self> {
        let parse = |value: &str| -> anyhow::Result<Decimal> {
            let rate: Decimal = value
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid credit rate '{}': {}", value, e))?;
            if rate.is_sign_negative() {
                anyhow::bail!("Credit rate must not be negative: {}", value);
            }
            Ok(rate)
        };

        let mut rates = HashMap::new();
        for (model, input, output) in entries {
            rates.insert(model.to_string(), ModelRate::new(parse(input)?, parse(output)?));
        }
        let default_rate = ModelRate::new(parse(default_rate.0)?, parse(default_rate.1)?);
        Ok(Self::new(rates, default_rate))
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        match self.rates.get(model) {
            Some(rate) => *rate,
            None => {
                tracing::debug!("No credit rate for model={}, using default", model);
                self.default_rate
            }
        }
    }

    /// `prompt_tokens * input + completion_tokens * output`, rounded for storage
    pub fn credits_for(&self, model: &str, usage: TokenUsage) -> Decimal {
        let rate = self.rate_for(model);
        let cost = Decimal::from(usage.prompt_tokens) * rate.input
            + Decimal::from(usage.completion_tokens) * rate.output;
        round_for_storage(cost)
    }
}

impl Default for ModelRates {
    fn default() -> Self {
        let rates = [
            ("gpt-4o", ModelRate::new(dec!(0.00025), dec!(0.001))),
            ("gpt-4o-mini", ModelRate::new(dec!(0.000015), dec!(0.00006))),
            ("claude-3-5-sonnet", ModelRate::new(dec!(0.0003), dec!(0.0015))),
        ]
        .into_iter()
        .map(|(model, rate)| (model.to_string(), rate))
        .collect();

        Self::new(rates, ModelRate::new(dec!(0.0003), dec!(0.0015)))
    }
}
