use serde::{Deserialize, Serialize};

use crate::models::FinanceError;

/// A gross consultation price split into the clinic's commission and the
/// professional's share. The two parts always add back up to the gross.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountSplit {
    pub gross_amount: f64,
    pub clinic_amount: f64,
    pub professional_amount: f64,
}

pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn split_amount(gross_amount: f64, commission_percentage: f64) -> Result<AmountSplit, FinanceError> {
    if !gross_amount.is_finite() || gross_amount < 0.0 {
        return Err(FinanceError::InvalidAmount(format!(
            "gross amount must be zero or positive, got {}",
            gross_amount
        )));
    }
    if !(0.0..=100.0).contains(&commission_percentage) {
        return Err(FinanceError::ValidationError(format!(
            "commission percentage must be between 0 and 100, got {}",
            commission_percentage
        )));
    }

    let gross_amount = round_currency(gross_amount);
    let clinic_amount = round_currency(gross_amount * commission_percentage / 100.0);
    // Remainder goes to the professional so rounding never loses a cent.
    let professional_amount = round_currency(gross_amount - clinic_amount);

    Ok(AmountSplit {
        gross_amount,
        clinic_amount,
        professional_amount,
    })
}
