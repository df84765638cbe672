use nalgebra::{Matrix4, Point3};

/// Ordered sequence of 3-D points describing one reconstructed fiber pathway.
///
/// A streamline is immutable once built; every operation that changes
/// geometry returns a fresh `Streamline`.
#[derive(Debug, Clone, PartialEq)]
pub struct Streamline {
    pub points: Vec<Point3<f64>>,
}

impl Streamline {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    /// Builds a streamline from raw coordinate triples.
    pub fn from_coords(coords: &[[f64; 3]]) -> Self {
        Self {
            points: coords.iter().map(|c| Point3::new(c[0], c[1], c[2])).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_point(&self) -> Option<&Point3<f64>> {
        self.points.first()
    }

    pub fn last_point(&self) -> Option<&Point3<f64>> {
        self.points.last()
    }

    /// Total polyline length, the sum of all segment norms.
    pub fn arc_length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .sum()
    }

    /// Resamples to exactly `n` points, equally spaced along the arc.
    ///
    /// Endpoints are preserved. A degenerate streamline (fewer than two
    /// points, or zero total length) repeats its first point.
    pub fn resample(&self, n: usize) -> Streamline {
        assert!(n >= 2, "resampling needs at least two target points");

        if self.points.len() < 2 {
            let p = self.points.first().copied().unwrap_or(Point3::origin());
            return Streamline::new(vec![p; n]);
        }

        let total = self.arc_length();
        if total <= f64::EPSILON {
            return Streamline::new(vec![self.points[0]; n]);
        }

        // Cumulative arc length at each input point.
        let mut cumulative = Vec::with_capacity(self.points.len());
        cumulative.push(0.0);
        for w in self.points.windows(2) {
            let last = *cumulative.last().unwrap();
            cumulative.push(last + (w[1] - w[0]).norm());
        }

        let mut resampled = Vec::with_capacity(n);
        let mut seg = 0usize;
        for i in 0..n {
            let target = total * (i as f64) / ((n - 1) as f64);
            while seg + 2 < self.points.len() && cumulative[seg + 1] < target {
                seg += 1;
            }
            let seg_len = cumulative[seg + 1] - cumulative[seg];
            let t = if seg_len <= f64::EPSILON {
                0.0
            } else {
                ((target - cumulative[seg]) / seg_len).clamp(0.0, 1.0)
            };
            let a = &self.points[seg];
            let b = &self.points[seg + 1];
            resampled.push(a + (b - a) * t);
        }
        Streamline::new(resampled)
    }

    /// Returns a copy with every point pushed through a homogeneous affine.
    pub fn transformed(&self, affine: &Matrix4<f64>) -> Streamline {
        Streamline::new(self.points.iter().map(|p| affine.transform_point(p)).collect())
    }

    /// Returns a copy with the point order reversed.
    pub fn reversed(&self) -> Streamline {
        let mut points = self.points.clone();
        points.reverse();
        Streamline::new(points)
    }

    /// Whether the path has points strictly on both sides of the sagittal
    /// plane at `mid_x`. Points exactly on the plane count for neither side.
    pub fn crosses_midline(&self, mid_x: f64) -> bool {
        let left = self.points.iter().any(|p| p.x < mid_x);
        let right = self.points.iter().any(|p| p.x > mid_x);
        left && right
    }
}

/// Ordered collection of streamlines, optionally carrying a parallel index
/// mapping back to the enumeration the collection was drawn from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamlineSet {
    pub streamlines: Vec<Streamline>,
    pub indices: Option<Vec<usize>>,
}

impl StreamlineSet {
    pub fn from_streamlines(streamlines: Vec<Streamline>) -> Self {
        Self {
            streamlines,
            indices: None,
        }
    }

    /// Attaches an index mapping; both sequences must be aligned.
    pub fn with_indices(streamlines: Vec<Streamline>, indices: Vec<usize>) -> Self {
        assert_eq!(
            streamlines.len(),
            indices.len(),
            "index mapping must align with the streamline list"
        );
        Self {
            streamlines,
            indices: Some(indices),
        }
    }

    pub fn len(&self) -> usize {
        self.streamlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamlines.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Streamline> {
        self.streamlines.iter()
    }

    /// Index of streamline `pos` in the original enumeration.
    pub fn original_index(&self, pos: usize) -> usize {
        match &self.indices {
            Some(idx) => idx[pos],
            None => pos,
        }
    }

    /// Subset by position, composing any existing index mapping so the new
    /// set still refers back to the original enumeration.
    pub fn select(&self, positions: &[usize]) -> StreamlineSet {
        let streamlines = positions
            .iter()
            .map(|&i| self.streamlines[i].clone())
            .collect();
        let indices = positions.iter().map(|&i| self.original_index(i)).collect();
        StreamlineSet::with_indices(streamlines, indices)
    }
}
