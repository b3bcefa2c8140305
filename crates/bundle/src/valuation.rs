//! Finished-good valuation from realized component costs.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockbundle_core::ValueObject;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValuationError {
    /// Zero or negative finished quantity: there is nothing to divide the
    /// component cost over.
    #[error("finished quantity must be positive to value a bundle (got {0})")]
    NonPositiveQuantity(Decimal),
}

/// Per-unit cost of the finished good.
///
/// `unit_cost` is signed; `inbound_unit_cost` is what gets written on the
/// incoming line and `override_total` is what gets forced as the movement
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    unit_cost: Decimal,
    finished_quantity: Decimal,
}

impl ValueObject for Valuation {}

impl Valuation {
    /// Reject quantities that cannot be divided into.
    pub fn check_quantity(finished_quantity: Decimal) -> Result<(), ValuationError> {
        if finished_quantity <= Decimal::ZERO {
            return Err(ValuationError::NonPositiveQuantity(finished_quantity));
        }
        Ok(())
    }

    /// `Σ(quantity_done × unit_cost) / finished_quantity` over the consumed
    /// lines, given as `(quantity_done, unit_cost)` pairs.
    pub fn from_consumption<I>(consumed: I, finished_quantity: Decimal) -> Result<Self, ValuationError>
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
    {
        Self::check_quantity(finished_quantity)?;
        let total: Decimal = consumed.into_iter().map(|(qty, cost)| qty * cost).sum();
        Ok(Self {
            unit_cost: total / finished_quantity,
            finished_quantity,
        })
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn finished_quantity(&self) -> Decimal {
        self.finished_quantity
    }

    pub fn inbound_unit_cost(&self) -> Decimal {
        self.unit_cost.abs()
    }

    pub fn override_total(&self) -> Decimal {
        self.unit_cost * self.finished_quantity
    }
}
