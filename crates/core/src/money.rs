//! Monetary amounts tagged with a currency.
//!
//! There is deliberately no conversion between currencies anywhere in the system:
//! every arithmetic or ordering operation requires both sides to share a currency
//! and fails with [`DomainError::CurrencyMismatch`] otherwise.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Supported billing currencies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Gbp];

    /// ISO 4217 code.
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// Number of decimal places in the minor unit.
    pub fn minor_units(self) -> u32 {
        match self {
            Currency::Usd | Currency::Eur | Currency::Gbp => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(DomainError::validation(format!("unsupported currency '{other}'"))),
        }
    }
}

/// Immutable non-negative amount in a single currency.
///
/// Amounts are stored at the currency's minor-unit scale (`100` becomes `100.00`),
/// and values with finer precision are rejected rather than rounded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawMoney")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct RawMoney {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<RawMoney> for Money {
    type Error = DomainError;

    fn try_from(raw: RawMoney) -> Result<Self, Self::Error> {
        Money::new(raw.amount, raw.currency)
    }
}

impl ValueObject for Money {}

impl Money {
    /// Construct a money value; negative amounts fail with `InvalidAmount`.
    ///
    /// Deliberately stricter than non-negativity alone: an amount finer than the
    /// currency's minor unit (e.g. `0.001 USD`) is rejected rather than rounded.
    pub fn new(amount: Decimal, currency: Currency) -> DomainResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::invalid_amount(format!(
                "money amount cannot be negative ({amount} {currency})"
            )));
        }

        let scale = currency.minor_units();
        if amount.normalize().scale() > scale {
            return Err(DomainError::invalid_amount(format!(
                "{currency} amounts carry at most {scale} decimal places (got {amount})"
            )));
        }

        let mut amount = amount.abs();
        amount.rescale(scale);
        Ok(Self { amount, currency })
    }

    pub fn zero(currency: Currency) -> Self {
        let mut amount = Decimal::ZERO;
        amount.rescale(currency.minor_units());
        Self { amount, currency }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Fails with `CurrencyMismatch` unless `other` shares this currency.
    pub fn ensure_same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::invalid_amount("money addition overflow"))?;
        Money::new(sum, self.currency)
    }

    /// Subtract `other`; a negative result fails with `InvalidAmount`.
    pub fn checked_sub(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        Money::new(self.amount - other.amount, self.currency)
    }

    pub fn try_cmp(&self, other: &Money) -> DomainResult<Ordering> {
        self.ensure_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    pub fn lt(&self, other: &Money) -> DomainResult<bool> {
        Ok(self.try_cmp(other)? == Ordering::Less)
    }

    pub fn le(&self, other: &Money) -> DomainResult<bool> {
        Ok(self.try_cmp(other)? != Ordering::Greater)
    }

    /// Sum a sequence of amounts that must all be in `currency`.
    pub fn sum<'a, I>(currency: Currency, items: I) -> DomainResult<Money>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        items
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, Currency::Usd).unwrap()
    }

    #[test]
    fn negative_amount_is_rejected() {
        let err = Money::new(dec!(-0.01), Currency::Usd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn amounts_are_stored_at_minor_unit_scale() {
        let m = usd(dec!(100));
        assert_eq!(m.amount().to_string(), "100.00");
        assert_eq!(m.to_string(), "100.00 USD");
    }

    #[test]
    fn sub_cent_precision_is_rejected() {
        let err = Money::new(dec!(1.005), Currency::Gbp).unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
        // Trailing zeros are not extra precision.
        assert!(Money::new(dec!(1.500), Currency::Gbp).is_ok());
    }

    #[test]
    fn arithmetic_across_currencies_fails() {
        let a = usd(dec!(10));
        let b = Money::new(dec!(10), Currency::Eur).unwrap();

        for err in [
            a.checked_add(&b).unwrap_err(),
            a.checked_sub(&b).unwrap_err(),
            a.lt(&b).unwrap_err(),
            a.le(&b).unwrap_err(),
        ] {
            assert_eq!(
                err,
                DomainError::CurrencyMismatch {
                    expected: Currency::Usd,
                    found: Currency::Eur
                }
            );
        }
    }

    #[test]
    fn subtraction_below_zero_fails() {
        let err = usd(dec!(40)).checked_sub(&usd(dec!(60))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn comparisons_within_currency() {
        let a = usd(dec!(40));
        let b = usd(dec!(60));
        assert!(a.lt(&b).unwrap());
        assert!(a.le(&a).unwrap());
        assert!(!b.le(&a).unwrap());
    }

    #[test]
    fn serde_round_trip_validates() {
        let m = usd(dec!(12.5));
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json, serde_json::json!({"amount": "12.50", "currency": "USD"}));

        let bad = serde_json::json!({"amount": "-1.00", "currency": "USD"});
        assert!(serde_json::from_value::<Money>(bad).is_err());
    }

    #[test]
    fn currency_parses_case_insensitively() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!(" GBP ".parse::<Currency>().unwrap(), Currency::Gbp);
        assert!("JPY".parse::<Currency>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: (a + b) - b == a for any non-negative cent amounts.
        #[test]
        fn add_then_sub_restores_original(a in 0i64..10_000_000, b in 0i64..10_000_000) {
            let a = usd(Decimal::new(a, 2));
            let b = usd(Decimal::new(b, 2));
            let restored = a.checked_add(&b).unwrap().checked_sub(&b).unwrap();
            prop_assert_eq!(restored, a);
        }
    }
}
