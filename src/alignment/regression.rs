use crate::error::AlignmentError;
use crate::types::AffineCoefficients;

/// Ordinary least squares line through `(x, y)`.
///
/// Inputs are shifted by `x[0]` before solving; pulse times are typically
/// epoch milliseconds and the raw sums lose precision otherwise.
pub fn least_squares(x: &[f64], y: &[f64]) -> Result<AffineCoefficients, AlignmentError> {
    check_paired(x, y, "fit least squares line")?;
    let x0 = x[0];
    let n = x.len() as f64;
    let mean_x = x.iter().map(|&v| v - x0).sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (sxx, sxy) = x
        .iter()
        .zip(y)
        .fold((0.0, 0.0), |(sxx, sxy), (&xi, &yi)| {
            let dx = xi - x0 - mean_x;
            (sxx + dx * dx, sxy + dx * (yi - mean_y))
        });
    if sxx == 0.0 {
        return Err(AlignmentError::insufficient(
            "fit least squares line",
            "all x values are identical",
        ));
    }

    let slope = sxy / sxx;
    let shifted_intercept = mean_y - slope * mean_x;
    Ok(AffineCoefficients::new(slope, shifted_intercept - x0 * slope))
}

/// Theil-Sen estimator: median of all pairwise slopes, intercept through the
/// medians. A handful of mis-timestamped rows barely move it.
pub fn theil_sen(x: &[f64], y: &[f64]) -> Result<AffineCoefficients, AlignmentError> {
    check_paired(x, y, "fit robust line")?;
    let mut slopes = Vec::with_capacity(x.len() * (x.len() - 1) / 2);
    for i in 0..x.len() {
        for j in (i + 1)..x.len() {
            let dx = x[j] - x[i];
            if dx != 0.0 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }
    let slope = median(&mut slopes).ok_or_else(|| {
        AlignmentError::insufficient("fit robust line", "all x values are identical")
    })?;

    let mut xs = x.to_vec();
    let mut ys = y.to_vec();
    let (Some(med_x), Some(med_y)) = (median(&mut xs), median(&mut ys)) else {
        return Err(AlignmentError::insufficient("fit robust line", "no points"));
    };
    Ok(AffineCoefficients::new(slope, med_y - slope * med_x))
}

/// `y - fit(x)` for each pair.
pub fn residuals(x: &[f64], y: &[f64], coefficients: &AffineCoefficients) -> Vec<f64> {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| yi - coefficients.apply(xi))
        .collect()
}

pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn check_paired(x: &[f64], y: &[f64], context: &'static str) -> Result<(), AlignmentError> {
    if x.len() != y.len() {
        return Err(AlignmentError::invalid_input(format!(
            "{context}: {} x values but {} y values",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(AlignmentError::insufficient(
            context,
            format!("need at least 2 points, got {}", x.len()),
        ));
    }
    Ok(())
}
