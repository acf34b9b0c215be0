//! Invoice arithmetic. All amounts are integers in the smallest currency unit.

use crate::{db::models::vouchers::VoucherKind, errors::Error};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

/// Price breakdown snapshotted onto a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Course price before vouchers (the course's discounted price when it has one)
    pub course_price: i64,
    pub discount_amount: i64,
    pub subtotal: i64,
    pub tax_amount: i64,
    /// What the buyer pays
    pub amount: i64,
}

/// A voucher as it applies to pricing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedVoucher {
    pub kind: VoucherKind,
    pub discount_percent: i32,
}

/// `floor(price * percent / 100)`
pub fn discount_amount(price: i64, percent: i32) -> i64 {
    let percent = i128::from(percent.clamp(0, 100));
    (i128::from(price) * percent / 100) as i64
}

/// `round_half_up(subtotal * rate)`
pub fn tax_amount(subtotal: i64, tax_rate: Decimal) -> Result<i64, Error> {
    (Decimal::from(subtotal) * tax_rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| Error::Internal {
            operation: format!("compute tax on {subtotal}"),
        })
}

pub fn quote(course_price: i64, voucher: Option<AppliedVoucher>, tax_rate: Decimal) -> Result<Quote, Error> {
    let discount_amount = voucher.map_or(0, |v| discount_amount(course_price, v.discount_percent));
    let subtotal = course_price - discount_amount;
    let tax_amount = tax_amount(subtotal, tax_rate)?;

    Ok(Quote {
        course_price,
        discount_amount,
        subtotal,
        tax_amount,
        amount: subtotal + tax_amount,
    })
}

/// What the instructor earns from a sale. Instructor vouchers come out of the instructor's
/// share; platform vouchers are absorbed by the platform. Tax is never credited.
pub fn creditable_amount(course_price: i64, discount_amount: i64, voucher_kind: Option<VoucherKind>) -> i64 {
    match voucher_kind {
        Some(VoucherKind::Instructor) => course_price - discount_amount,
        Some(VoucherKind::Platform) | None => course_price,
    }
}
