use tracing::debug;

use crate::MiningError;

/// Batch row indices of one mined triplet.
///
/// Rows `2m` and `2m + 1` of the embedding batch hold the anchor and positive of pair `m`,
/// so `anchor` is always even and `positive`/`negative` are always odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triplet {
    pub anchor: usize,
    pub positive: usize,
    pub negative: usize,
}

impl From<Triplet> for (usize, usize, usize) {
    fn from(t: Triplet) -> Self {
        (t.anchor, t.positive, t.negative)
    }
}

/// Greedy hardest-negative mining over paired embeddings.
///
/// For `k` in `0..T`, row `i = k % M` of `S = A·Bᵀ` picks its most similar column that is
/// neither the diagonal nor a column it already picked. Exclusions live only for the
/// duration of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardNegativeSampler {
    triplet_num: usize,
}

impl HardNegativeSampler {
    pub fn new(triplet_num: usize) -> Result<Self, MiningError> {
        if triplet_num == 0 {
            return Err(MiningError::InvalidInput(
                "triplet_num must be > 0".to_string(),
            ));
        }
        Ok(Self { triplet_num })
    }

    pub fn triplet_num(&self) -> usize {
        self.triplet_num
    }

    /// Row-major `M×M` matrix with `S[i][j] = anchors_i · positives_j`.
    pub fn similarity(
        anchors: &[f32],
        positives: &[f32],
        dim: usize,
    ) -> Result<Vec<f32>, MiningError> {
        if dim == 0 {
            return Err(MiningError::InvalidInput("dim must be > 0".to_string()));
        }
        if anchors.len() != positives.len() || anchors.len() % dim != 0 {
            return Err(MiningError::InvalidInput(format!(
                "anchors ({}) and positives ({}) must both be M rows of {dim}",
                anchors.len(),
                positives.len()
            )));
        }
        let m = anchors.len() / dim;
        let mut sim = Vec::with_capacity(m * m);
        for a in anchors.chunks_exact(dim) {
            for b in positives.chunks_exact(dim) {
                sim.push(a.iter().zip(b).map(|(x, y)| x * y).sum());
            }
        }
        Ok(sim)
    }

    /// Mines from separate anchor and positive matrices, `M` rows of `dim` each.
    pub fn mine(
        &self,
        anchors: &[f32],
        positives: &[f32],
        dim: usize,
    ) -> Result<Vec<Triplet>, MiningError> {
        let sim = Self::similarity(anchors, positives, dim)?;
        let m = anchors.len() / dim;
        self.mine_from_similarity(sim, m)
    }

    /// Mines from a `2M × dim` batch where rows `2m` / `2m + 1` form pair `m`.
    pub fn mine_interleaved(&self, data: &[f32], dim: usize) -> Result<Vec<Triplet>, MiningError> {
        if dim == 0 || data.len() % (2 * dim) != 0 {
            return Err(MiningError::InvalidInput(format!(
                "{} values do not form anchor/positive row pairs of {dim}",
                data.len()
            )));
        }
        let mut anchors = Vec::with_capacity(data.len() / 2);
        let mut positives = Vec::with_capacity(data.len() / 2);
        for pair in data.chunks_exact(2 * dim) {
            anchors.extend_from_slice(&pair[..dim]);
            positives.extend_from_slice(&pair[dim..]);
        }
        self.mine(&anchors, &positives, dim)
    }

    /// Runs the greedy selection on a precomputed row-major `m×m` similarity matrix.
    pub fn mine_from_similarity(
        &self,
        mut sim: Vec<f32>,
        m: usize,
    ) -> Result<Vec<Triplet>, MiningError> {
        if m < 2 {
            return Err(MiningError::InvalidInput(format!(
                "need at least 2 pairs to mine negatives, got {m}"
            )));
        }
        if sim.len() != m * m {
            return Err(MiningError::InvalidInput(format!(
                "similarity has {} entries, expected {m}x{m}",
                sim.len()
            )));
        }
        let t = self.triplet_num;
        if t >= m * (m - 1) {
            return Err(MiningError::InvalidInput(format!(
                "triplet_num {t} must be < M*(M-1) = {}",
                m * (m - 1)
            )));
        }

        let mut triplets = Vec::with_capacity(t);
        for k in 0..t {
            let i = k % m;
            let row = &mut sim[i * m..(i + 1) * m];
            if k < m {
                row[i] = f32::NEG_INFINITY;
            }
            let j = argmax(row).ok_or_else(|| {
                MiningError::InvalidInput(format!("row {i} has no negative left to pick"))
            })?;
            row[j] = f32::NEG_INFINITY;
            triplets.push(Triplet {
                anchor: 2 * i,
                positive: 2 * i + 1,
                negative: 2 * j + 1,
            });
        }

        debug!(
            target: "imgfeed",
            event = "triplets_mined",
            pairs = m as u64,
            triplets = t as u64,
            "hard negatives mined"
        );
        Ok(triplets)
    }
}

/// First index of the largest entry, skipping excluded (`-inf`) and NaN entries.
fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (j, &v) in row.iter().enumerate() {
        if v == f32::NEG_INFINITY || v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((j, v)),
        }
    }
    best.map(|(j, _)| j)
}
