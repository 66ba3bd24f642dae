use crate::config::DispatchConfig;
use crate::models::dispatch::PricingBreakdown;

/// Platform markup rules. Speed charges are quoted next to the total and
/// never folded into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingPolicy {
    pub surcharge_per_litre: f64,
    pub speed_charge_ratio: f64,
}

impl PricingPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            surcharge_per_litre: config.surcharge_per_litre,
            speed_charge_ratio: config.speed_charge_ratio,
        }
    }

    /// Speed order: `(rate + surcharge) * quantity`.
    pub fn speed_quote(&self, rate: f64, quantity: f64) -> PricingBreakdown {
        PricingBreakdown {
            rate,
            surcharge_per_litre: self.surcharge_per_litre,
            quantity,
            total_amount: round2((rate + self.surcharge_per_litre) * quantity),
            speed_charges: (rate * self.speed_charge_ratio).floor(),
        }
    }

    /// Standard booking: the station's rate, no platform markup.
    pub fn standard_total(&self, rate: f64, quantity: f64) -> f64 {
        round2(rate * quantity)
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{round2, PricingPolicy};

    #[test]
    fn speed_total_adds_surcharge_per_litre() {
        let quote = PricingPolicy::default().speed_quote(100.0, 5.0);

        assert_eq!(quote.total_amount, 600.0);
        assert_eq!(quote.surcharge_per_litre, 20.0);
    }

    #[test]
    fn speed_charges_are_floored_and_kept_out_of_total() {
        let quote = PricingPolicy::default().speed_quote(102.7, 2.0);

        assert_eq!(quote.speed_charges, 20.0);
        assert_eq!(quote.total_amount, 245.4);
    }

    #[test]
    fn standard_total_has_no_markup() {
        assert_eq!(PricingPolicy::default().standard_total(95.5, 4.0), 382.0);
    }

    #[test]
    fn round2_trims_float_noise() {
        assert_eq!(round2(0.1 + 0.2), 0.3);
        assert_eq!(round2(3.004_999), 3.0);
        assert_eq!(round2(1.236), 1.24);
    }
}
