//! Safe division
//!
//! Every ratio metric goes through these helpers. A zero, missing or NaN
//! denominator produces 0 instead of an error, `inf` or `NaN`, so derived
//! columns stay summable and sortable.

use polars::prelude::*;

/// Scalar division that yields 0 for a zero or NaN denominator.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || denominator.is_nan() || numerator.is_nan() {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Same as [`safe_divide`], treating a missing operand as a zero result.
pub fn safe_divide_opt(numerator: Option<f64>, denominator: Option<f64>) -> f64 {
    match (numerator, denominator) {
        (Some(n), Some(d)) => safe_divide(n, d),
        _ => 0.0,
    }
}

/// Element-wise safe division over aligned slices.
///
/// The output has the length of the shorter input.
pub fn safe_divide_slice(numerators: &[f64], denominators: &[f64]) -> Vec<f64> {
    numerators
        .iter()
        .zip(denominators)
        .map(|(n, d)| safe_divide(*n, *d))
        .collect()
}

/// Column form of [`safe_divide`] for use inside lazy frames.
pub fn safe_divide_expr(numerator: Expr, denominator: Expr) -> Expr {
    let usable = denominator
        .clone()
        .is_not_null()
        .and(denominator.clone().neq(lit(0.0)))
        .and(denominator.clone().is_not_nan())
        .and(numerator.clone().is_not_nan());

    when(usable)
        .then(numerator / denominator)
        .otherwise(lit(0.0))
        .fill_null(lit(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_denominator_yields_zero() {
        for x in [0.0, 1.0, -5.0, 1e12] {
            assert_eq!(safe_divide(x, 0.0), 0.0);
        }
        assert_eq!(safe_divide(3.0, f64::NAN), 0.0);
    }

    #[test]
    fn test_nonzero_denominator_divides() {
        assert_eq!(safe_divide(10.0, 4.0), 2.5);
        assert_eq!(safe_divide(0.0, 7.0), 0.0);
    }

    #[test]
    fn test_missing_operands() {
        assert_eq!(safe_divide_opt(None, Some(2.0)), 0.0);
        assert_eq!(safe_divide_opt(Some(2.0), None), 0.0);
        assert_eq!(safe_divide_opt(Some(9.0), Some(3.0)), 3.0);
    }

    #[test]
    fn test_slice_form() {
        assert_eq!(
            safe_divide_slice(&[100.0, 200.0], &[10.0, 0.0]),
            vec![10.0, 0.0]
        );
    }

    #[test]
    fn test_expr_form_matches_scalar() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let df = df! [
            "num" => [100.0, 200.0, 5.0, f64::NAN],
            "den" => [Some(10.0), Some(0.0), None, Some(4.0)]
        ]?;

        let out = df
            .lazy()
            .select([safe_divide_expr(col("num"), col("den")).alias("ratio")])
            .collect()?;

        let ratio: Vec<Option<f64>> = out.column("ratio")?.f64()?.into_iter().collect();
        assert_eq!(ratio, vec![Some(10.0), Some(0.0), Some(0.0), Some(0.0)]);
        assert_eq!(safe_divide(f64::NAN, 4.0), 0.0);
        Ok(())
    }
}
