use std::{fmt, marker::PhantomData};

pub trait Currency {
    fn symbol() -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usd;

impl Currency for Usd {
    fn symbol() -> &'static str {
        "USD"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cad;

impl Currency for Cad {
    fn symbol() -> &'static str {
        "CAD"
    }
}

/// A real-valued amount tagged with its currency at the type level.
pub struct Dense<C: Currency> {
    amount: f64,
    _currency: PhantomData<C>,
}

impl<C: Currency> Dense<C> {
    pub fn new(amount: f64) -> Self {
        Self {
            amount,
            _currency: PhantomData,
        }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// Convert at `rate` units of `T` per unit of `C`.
    pub fn convert<T: Currency>(self, rate: f64) -> Dense<T> {
        Dense::new(self.amount * rate)
    }
}

impl<C: Currency> Clone for Dense<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Currency> Copy for Dense<C> {}

impl<C: Currency> PartialEq for Dense<C> {
    fn eq(&self, other: &Self) -> bool {
        self.amount == other.amount
    }
}

impl<C: Currency> fmt::Display for Dense<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.amount, C::symbol())
    }
}

impl<C: Currency> fmt::Debug for Dense<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dense {{ amount: {}, currency: {} }}",
            self.amount,
            C::symbol()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_to_cad() {
        let usd: Dense<Usd> = Dense::new(1_000.0);
        let cad: Dense<Cad> = usd.convert(1.35);
        assert_eq!(cad.amount(), 1_350.0);
        assert_eq!(format!("{}", cad), "1350.00 CAD");
    }

    #[test]
    fn test_dense_display() {
        let money: Dense<Usd> = Dense::new(10.0);
        assert_eq!(format!("{}", money), "10.00 USD");
        assert_eq!(format!("{:?}", money), "Dense { amount: 10, currency: USD }");
    }

    #[test]
    fn test_conversion_round_trips_through_inverse_rate() {
        let cad: Dense<Cad> = Dense::<Usd>::new(200.0).convert(1.25);
        let usd: Dense<Usd> = cad.convert(1.0 / 1.25);
        assert!((usd.amount() - 200.0).abs() < 1e-9);
    }
}
