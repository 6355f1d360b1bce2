use itertools::izip;
use num_traits::Float;

/// Compute the median of `values`, ignoring any which are not finite
///
/// Returns `None` when no finite values remain. For an even number of values the median is the
/// mean of the two central elements.
///
/// # Examples
///
/// ```
/// use chamber_flux::math::median;
///
/// assert_eq!(median(&[3., f64::NAN, 1., 2.]), Some(2.));
/// assert_eq!(median(&[4., 1., 3., 2.]), Some(2.5));
/// assert_eq!(median::<f64>(&[f64::NAN]), None);
/// ```
pub fn median<T: Float>(values: &[T]) -> Option<T> {
    let mut finite = values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .collect::<Vec<_>>();
    if finite.is_empty() {
        return None;
    }

    // No NaN survives the filter above, so the comparison is total
    finite.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = finite.len() / 2;
    if finite.len() % 2 == 1 {
        Some(finite[mid])
    } else {
        let two = T::one() + T::one();
        Some((finite[mid - 1] + finite[mid]) / two)
    }
}

/// Select the pairs of `(x, y)` where both are finite and `x` lies in the half-open interval
/// `[lower, upper)`
///
/// The selected abscissae and ordinates are returned as separate vectors, in input order.
///
/// # Examples
///
/// ```
/// use chamber_flux::math::finite_pairs_in;
///
/// let x = [0., 1., 2., f64::NAN, 4.];
/// let y = [10., f64::NAN, 12., 13., 14.];
/// let (xs, ys) = finite_pairs_in(&x, &y, 0., 4.);
///
/// assert_eq!(xs, vec![0., 2.]);
/// assert_eq!(ys, vec![10., 12.]);
/// ```
pub fn finite_pairs_in<T: Float>(x: &[T], y: &[T], lower: T, upper: T) -> (Vec<T>, Vec<T>) {
    izip!(x, y)
        .filter(|(xi, yi)| xi.is_finite() && yi.is_finite() && **xi >= lower && **xi < upper)
        .map(|(xi, yi)| (*xi, *yi))
        .unzip()
}
