// src/money.rs
//
// Pure unit-pricing functions (C2). All arithmetic runs over
// `rust_decimal::Decimal` so repeated deposits/withdrawals across many
// tranches never accumulate binary-float drift.
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Price assigned when the fund has zero circulating units.
pub const SEED_PRICE: Decimal = dec!(10000);

/// Dust threshold below which a tranche's unit balance is treated as zero.
pub const DUST_UNITS: Decimal = dec!(0.000000001);

/// Storage precision for unit counts (decimal(20,8)).
pub const UNITS_SCALE: u32 = 8;

/// Storage precision for prices (decimal(20,6)).
pub const PRICE_SCALE: u32 = 6;

/// `total_nav / total_units`, rounded to 6 decimals for storage, or the
/// seed price when no units are yet in circulation (spec.md §4.2).
pub fn price_per_unit(total_nav: Decimal, total_units: Decimal) -> Decimal {
    if total_units.is_zero() {
        return SEED_PRICE;
    }
    (total_nav / total_units).round_dp(PRICE_SCALE)
}

/// `cash / price`, unrounded in memory; callers round to `UNITS_SCALE` only
/// when persisting (spec.md §4.2).
pub fn units_for_cash(cash: Decimal, price: Decimal) -> Decimal {
    cash / price
}

/// Round a unit count to the storage precision.
pub fn round_units(units: Decimal) -> Decimal {
    units.round_dp(UNITS_SCALE)
}

/// Whether a tranche's remaining units are at or below the dust threshold
/// and the tranche should be retired (spec.md §4.3.2 step 3).
pub fn is_dust(units: Decimal) -> bool {
    units <= DUST_UNITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_price_when_no_units() {
        assert_eq!(price_per_unit(dec!(0), dec!(0)), SEED_PRICE);
    }

    #[test]
    fn price_rounds_to_six_decimals() {
        // 35,000,000 / 2538.461538 ≈ 13787.878790... -> rounds to 6dp
        let p = price_per_unit(dec!(35000000), dec!(2538.461538));
        assert_eq!(p, dec!(13787.878790));
    }

    #[test]
    fn units_for_cash_is_unrounded() {
        let u = units_for_cash(dec!(20000000), dec!(13000));
        assert_eq!(round_units(u), dec!(1538.46153846));
    }

    #[test]
    fn dust_threshold() {
        assert!(is_dust(dec!(0)));
        assert!(is_dust(DUST_UNITS));
        assert!(!is_dust(dec!(0.0000001)));
    }
}
