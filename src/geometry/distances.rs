use crate::core::streamline::Streamline;

/// Mean point-wise distance between two streamlines with equal point counts,
/// walking both in the same direction.
pub fn average_direct_distance(a: &Streamline, b: &Streamline) -> f64 {
    assert_eq!(
        a.len(),
        b.len(),
        "direct distance needs equally sampled streamlines"
    );
    let n = a.len();
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = a
        .points
        .iter()
        .zip(b.points.iter())
        .map(|(p, q)| (p - q).norm())
        .sum();
    sum / n as f64
}

/// Mean point-wise distance walking `b` in reverse.
pub fn average_flip_distance(a: &Streamline, b: &Streamline) -> f64 {
    assert_eq!(
        a.len(),
        b.len(),
        "flip distance needs equally sampled streamlines"
    );
    let n = a.len();
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = a
        .points
        .iter()
        .zip(b.points.iter().rev())
        .map(|(p, q)| (p - q).norm())
        .sum();
    sum / n as f64
}

/// Minimum average direct-flip distance: the orientation-insensitive
/// streamline metric used throughout clustering and cleaning.
pub fn mdf(a: &Streamline, b: &Streamline) -> f64 {
    average_direct_distance(a, b).min(average_flip_distance(a, b))
}
