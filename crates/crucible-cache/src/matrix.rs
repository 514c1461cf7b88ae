/// Tracked-version bound: the PAC model only tracks `major`/`minor` values
/// in `0..=3`, matching the upstream implementation; versions outside that
/// range are clamped into the last tracked bucket rather than rejected.
pub const MAX_MAJOR_VERSION: u32 = 3;
pub const MAX_MINOR_VERSION: u32 = 3;

/// A `(major, minor)` pair identifying a component's version at one pipeline
/// position, as tracked by the PAC model (coarser than a full
/// [`crucible_types::SemanticVersion`] — the model only ever sees `api`/`inc`
/// collapsed onto these two axes).
pub type Version = (u32, u32);

fn clamp(version: Version) -> Version {
    (version.0.min(MAX_MAJOR_VERSION), version.1.min(MAX_MINOR_VERSION))
}

/// All versions tracked by the model, `(0,0)..=(MAX_MAJOR_VERSION,
/// MAX_MINOR_VERSION)`, in row-major order.
pub fn all_tracked_versions() -> Vec<Version> {
    let mut out = Vec::with_capacity(((MAX_MAJOR_VERSION + 1) * (MAX_MINOR_VERSION + 1)) as usize);
    for m in 0..=MAX_MAJOR_VERSION {
        for n in 0..=MAX_MINOR_VERSION {
            out.push((m, n));
        }
    }
    out
}

/// The Version-Score Matrix for one pipeline position: a probability
/// distribution over tracked `(major, minor)` pairs (spec §4.F).
///
/// Starts uniform and is nudged by [`VersionScoreMatrix::scale_entry`] /
/// [`VersionScoreMatrix::scale_batch`], both of which preserve the grand sum
/// of 1 (up to floating-point error).
#[derive(Debug, Clone)]
pub struct VersionScoreMatrix {
    cells: Vec<Vec<f64>>,
}

impl VersionScoreMatrix {
    pub fn uniform() -> Self {
        let rows = (MAX_MAJOR_VERSION + 1) as usize;
        let cols = (MAX_MINOR_VERSION + 1) as usize;
        let uniform = 1.0 / (rows * cols) as f64;
        Self { cells: vec![vec![uniform; cols]; rows] }
    }

    pub fn get(&self, version: Version) -> f64 {
        let (m, n) = clamp(version);
        self.cells[m as usize][n as usize]
    }

    /// `VSM ← (1−α)·VSM + α·E_{m,n}`, the indicator matrix for `version`.
    pub fn scale_entry(&mut self, alpha: f64, version: Version) {
        let (m, n) = clamp(version);
        for (i, row) in self.cells.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let indicator = if i == m as usize && j == n as usize { 1.0 } else { 0.0 };
                *cell = (1.0 - alpha) * *cell + alpha * indicator;
            }
        }
    }

    /// `VSM ← (1−α)·VSM + α·(1/|V|)·Σ_{(m,n)∈V} E_{m,n}`. A no-op if
    /// `versions` is empty.
    pub fn scale_batch(&mut self, alpha: f64, versions: &[Version]) {
        if versions.is_empty() {
            return;
        }
        let weight = 1.0 / versions.len() as f64;
        let clamped: Vec<Version> = versions.iter().copied().map(clamp).collect();
        for (i, row) in self.cells.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                let mass = clamped.iter().filter(|&&(m, n)| m as usize == i && n as usize == j).count() as f64 * weight;
                *cell = (1.0 - alpha) * *cell + alpha * mass;
            }
        }
    }

    pub fn sum(&self) -> f64 {
        self.cells.iter().flatten().sum()
    }

    /// An ascending-score ordering of every tracked version, ties broken by
    /// `(major, minor)` for determinism.
    pub fn ascending_order(&self) -> Vec<Version> {
        let mut entries: Vec<(Version, f64)> = Vec::new();
        for (i, row) in self.cells.iter().enumerate() {
            for (j, &score) in row.iter().enumerate() {
                entries.push(((i as u32, j as u32), score));
            }
        }
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("scores are finite").then_with(|| a.0.cmp(&b.0)));
        entries.into_iter().map(|(v, _)| v).collect()
    }
}
