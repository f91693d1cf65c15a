//! Featurizers built from 3D coordinates: Coulomb matrices and the raw
//! `(Z, x, y, z)` input of Behler-Parrinello symmetry functions.
use crate::featurizer::{Datapoint, Featurizer};
use crate::Molecule;
use anyhow::{anyhow, bail, Result};
use ferrochem_core::Features;
use ndarray::{s, Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::borrow::Cow;

/// Ångström to Bohr.
const BOHR_PER_ANGSTROM: f64 = 1.0 / 0.529_177_210_92;

fn coords_of(mol: &Molecule) -> Result<&[[f64; 3]]> {
    mol.coords()
        .ok_or_else(|| anyhow!("molecule has no 3D coordinates"))
}

fn prepare<'a>(mol: Cow<'a, Molecule>, remove_hydrogens: bool) -> Result<Cow<'a, Molecule>> {
    if remove_hydrogens {
        Ok(Cow::Owned(mol.without_hydrogens()?))
    } else {
        Ok(mol)
    }
}

/// Unpadded Coulomb matrix of a molecule with coordinates in Ångström.
pub fn coulomb_matrix(mol: &Molecule) -> Result<Array2<f64>> {
    let coords = coords_of(mol)?;
    let z: Vec<f64> = mol.atoms().iter().map(|a| a.atomic_number as f64).collect();
    let n = z.len();
    let mut m = Array2::zeros((n, n));
    for i in 0..n {
        m[[i, i]] = 0.5 * z[i].powf(2.4);
        for j in (i + 1)..n {
            let d = (0..3)
                .map(|k| (coords[i][k] - coords[j][k]).powi(2))
                .sum::<f64>()
                .sqrt()
                * BOHR_PER_ANGSTROM;
            if d == 0.0 {
                bail!("atoms {} and {} share a position", i, j);
            }
            let v = z[i] * z[j] / d;
            m[[i, j]] = v;
            m[[j, i]] = v;
        }
    }
    Ok(m)
}

/// Box-Muller draw from `N(0, 1)`.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[derive(Debug, Clone)]
pub struct CoulombMatrix {
    pub max_atoms: usize,
    pub remove_hydrogens: bool,
    /// Emit `n_samples` matrices with rows permuted by noisy row norms.
    pub randomize: bool,
    /// Flatten to the upper triangle (diagonal included).
    pub upper_tri: bool,
    pub n_samples: usize,
    /// Standard deviation of the gaussian noise added to row norms when randomizing.
    pub noise_level: f64,
    pub seed: Option<u64>,
}

impl CoulombMatrix {
    pub fn new(max_atoms: usize) -> Self {
        Self {
            max_atoms,
            remove_hydrogens: false,
            randomize: false,
            upper_tri: false,
            n_samples: 1,
            noise_level: 1.0,
            seed: None,
        }
    }

    fn padded(&self, m: &Array2<f64>) -> Array2<f32> {
        let n = m.nrows();
        let mut out = Array2::zeros((self.max_atoms, self.max_atoms));
        out.slice_mut(s![..n, ..n]).assign(&m.mapv(|v| v as f32));
        out
    }

    fn upper(&self, m: &Array2<f32>) -> Array1<f32> {
        let n = m.nrows();
        let mut values = Vec::with_capacity(n * (n + 1) / 2);
        for i in 0..n {
            for j in i..n {
                values.push(m[[i, j]]);
            }
        }
        Array1::from(values)
    }

    /// Orders rows and columns by descending row norm after adding `N(0, noise_level^2)` noise.
    fn randomized(&self, m: &Array2<f64>, rng: &mut StdRng) -> Array2<f64> {
        let norms: Vec<f64> = m
            .axis_iter(Axis(0))
            .map(|row| row.dot(&row).sqrt() + self.noise_level * standard_normal(rng))
            .collect();
        let mut order: Vec<usize> = (0..norms.len()).collect();
        order.sort_by(|&a, &b| norms[b].total_cmp(&norms[a]));
        m.select(Axis(0), &order).select(Axis(1), &order)
    }
}

impl Featurizer for CoulombMatrix {
    fn name(&self) -> String {
        format!("CoulombMatrix_max_atoms{}", self.max_atoms)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        let mol = prepare(datapoint.molecule()?, self.remove_hydrogens)?;
        if mol.num_atoms() > self.max_atoms {
            bail!(
                "molecule has {} atoms, more than max_atoms = {}",
                mol.num_atoms(),
                self.max_atoms
            );
        }
        let m = coulomb_matrix(&mol)?;
        let matrices: Vec<Array2<f32>> = if self.randomize {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            (0..self.n_samples.max(1))
                .map(|_| self.padded(&self.randomized(&m, &mut rng)))
                .collect()
        } else {
            vec![self.padded(&m)]
        };

        let features = if self.upper_tri {
            let rows: Vec<Array1<f32>> = matrices.iter().map(|m| self.upper(m)).collect();
            let width = rows[0].len();
            let mut out = Array2::zeros((rows.len(), width));
            for (i, row) in rows.into_iter().enumerate() {
                out.row_mut(i).assign(&row);
            }
            out.into_dyn()
        } else {
            let mut out = Array3::zeros((matrices.len(), self.max_atoms, self.max_atoms));
            for (i, m) in matrices.into_iter().enumerate() {
                out.index_axis_mut(Axis(0), i).assign(&m);
            }
            out.into_dyn()
        };
        Ok(Features::Array(features))
    }
}

#[derive(Debug, Clone)]
pub struct CoulombMatrixEig {
    pub max_atoms: usize,
    pub remove_hydrogens: bool,
}

impl CoulombMatrixEig {
    pub fn new(max_atoms: usize) -> Self {
        Self {
            max_atoms,
            remove_hydrogens: false,
        }
    }
}

impl Featurizer for CoulombMatrixEig {
    fn name(&self) -> String {
        format!("CoulombMatrixEig_max_atoms{}", self.max_atoms)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        let mol = prepare(datapoint.molecule()?, self.remove_hydrogens)?;
        if mol.num_atoms() > self.max_atoms {
            bail!(
                "molecule has {} atoms, more than max_atoms = {}",
                mol.num_atoms(),
                self.max_atoms
            );
        }
        let mut eig = symmetric_eigenvalues(&coulomb_matrix(&mol)?);
        eig.sort_by(|a, b| b.abs().total_cmp(&a.abs()));
        let mut out = Array1::zeros(self.max_atoms);
        for (i, v) in eig.into_iter().enumerate() {
            out[i] = v as f32;
        }
        Ok(Features::Array(out.into_dyn()))
    }
}

/// Eigenvalues of a symmetric matrix by cyclic Jacobi rotations.
pub fn symmetric_eigenvalues(m: &Array2<f64>) -> Vec<f64> {
    let n = m.nrows();
    let mut a = m.clone();
    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]].powi(2))
            .sum();
        if off < 1e-18 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
            }
        }
    }
    (0..n).map(|i| a[[i, i]]).collect()
}

#[derive(Debug, Clone)]
pub struct BPSymmetryFunctionInput {
    pub max_atoms: usize,
}

impl BPSymmetryFunctionInput {
    pub fn new(max_atoms: usize) -> Self {
        Self { max_atoms }
    }
}

impl Featurizer for BPSymmetryFunctionInput {
    fn name(&self) -> String {
        format!("BPSymmetryFunctionInput_max_atoms{}", self.max_atoms)
    }

    fn featurize_one(&self, datapoint: &Datapoint) -> Result<Features> {
        let mol = datapoint.molecule()?;
        let coords = coords_of(&mol)?;
        if mol.num_atoms() > self.max_atoms {
            bail!(
                "molecule has {} atoms, more than max_atoms = {}",
                mol.num_atoms(),
                self.max_atoms
            );
        }
        let mut out = Array2::zeros((self.max_atoms, 4));
        for (i, (atom, xyz)) in mol.atoms().iter().zip(coords).enumerate() {
            out[[i, 0]] = atom.atomic_number as f32;
            for k in 0..3 {
                out[[i, k + 1]] = xyz[k] as f32;
            }
        }
        Ok(Features::Array(out.into_dyn()))
    }
}
