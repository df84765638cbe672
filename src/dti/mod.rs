use anyhow::{bail, Result};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Array4};

/// Per-voxel tensor parameter count: three eigenvalues followed by the
/// three eigenvectors, stored one vector after another.
pub const N_PARAMS: usize = 12;

/// Scalar maps derived from a fitted tensor parameter volume.
#[derive(Debug, Clone)]
pub struct ScalarMaps {
    /// Fractional anisotropy, in [0, 1].
    pub fa: Array3<f64>,
    /// Mean diffusivity.
    pub md: Array3<f64>,
    /// Axial diffusivity, the principal eigenvalue.
    pub ad: Array3<f64>,
    /// Radial diffusivity, the mean of the two minor eigenvalues.
    pub rd: Array3<f64>,
}

fn check_params_shape(params: &Array4<f64>) -> Result<(usize, usize, usize)> {
    let s = params.shape();
    if s[3] != N_PARAMS {
        bail!(
            "tensor parameter volume must carry {} values per voxel, got {}",
            N_PARAMS,
            s[3]
        );
    }
    Ok((s[0], s[1], s[2]))
}

/// Derives FA, MD, AD and RD from eigenvalues. Voxels with an all-zero
/// tensor (background) map to 0 everywhere, including FA.
pub fn scalar_maps(params: &Array4<f64>) -> Result<ScalarMaps> {
    let (nx, ny, nz) = check_params_shape(params)?;

    let mut fa = Array3::zeros((nx, ny, nz));
    let mut md = Array3::zeros((nx, ny, nz));
    let mut ad = Array3::zeros((nx, ny, nz));
    let mut rd = Array3::zeros((nx, ny, nz));

    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                let l1 = params[[x, y, z, 0]];
                let l2 = params[[x, y, z, 1]];
                let l3 = params[[x, y, z, 2]];

                let mean = (l1 + l2 + l3) / 3.0;
                md[[x, y, z]] = mean;
                ad[[x, y, z]] = l1;
                rd[[x, y, z]] = (l2 + l3) / 2.0;

                let sq_sum = l1 * l1 + l2 * l2 + l3 * l3;
                if sq_sum > 0.0 {
                    let dev = (l1 - mean).powi(2)
                        + (l2 - mean).powi(2)
                        + (l3 - mean).powi(2);
                    fa[[x, y, z]] = (1.5 * dev / sq_sum).sqrt();
                }
            }
        }
    }

    Ok(ScalarMaps { fa, md, ad, rd })
}

/// Acquisition scheme: one b-value and unit direction per volume.
#[derive(Debug, Clone)]
pub struct GradientTable {
    pub bvals: Vec<f64>,
    pub bvecs: Vec<Vector3<f64>>,
    pub b0_threshold: f64,
}

impl GradientTable {
    pub fn new(bvals: Vec<f64>, bvecs: Vec<Vector3<f64>>) -> Result<Self> {
        if bvals.len() != bvecs.len() {
            bail!(
                "gradient table mismatch: {} b-values but {} directions",
                bvals.len(),
                bvecs.len()
            );
        }
        Ok(Self {
            bvals,
            bvecs,
            b0_threshold: 50.0,
        })
    }

    pub fn len(&self) -> usize {
        self.bvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvals.is_empty()
    }

    pub fn is_b0(&self, volume: usize) -> bool {
        self.bvals[volume] <= self.b0_threshold
    }
}

/// Rebuilds the diffusion tensor of one voxel from its parameter slice.
fn tensor_from_params(params: &Array4<f64>, x: usize, y: usize, z: usize) -> Matrix3<f64> {
    let mut d = Matrix3::zeros();
    for i in 0..3 {
        let eval = params[[x, y, z, i]];
        let evec = Vector3::new(
            params[[x, y, z, 3 + 3 * i]],
            params[[x, y, z, 4 + 3 * i]],
            params[[x, y, z, 5 + 3 * i]],
        );
        d += eval * evec * evec.transpose();
    }
    d
}

/// Forward signal prediction, S(g, b) = S0 exp(-b gᵀ D g) per voxel and
/// gradient direction; b0 volumes predict S0 itself.
pub fn predict_signal(
    params: &Array4<f64>,
    gtab: &GradientTable,
    s0: f64,
) -> Result<Array4<f64>> {
    let (nx, ny, nz) = check_params_shape(params)?;
    if gtab.is_empty() {
        bail!("cannot predict from an empty gradient table");
    }

    let mut signal = Array4::zeros((nx, ny, nz, gtab.len()));
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                let d = tensor_from_params(params, x, y, z);
                for (v, (b, g)) in gtab.bvals.iter().zip(gtab.bvecs.iter()).enumerate() {
                    signal[[x, y, z, v]] = if gtab.is_b0(v) {
                        s0
                    } else {
                        s0 * (-b * (g.transpose() * d * g)[(0, 0)]).exp()
                    };
                }
            }
        }
    }
    Ok(signal)
}
