use crate::MiningError;

const MIN_NORM: f32 = 1e-12;

/// Scales every `dim`-wide row of `data` to unit L2 norm in place.
///
/// Rows whose norm is below `1e-12` are left untouched.
pub fn l2_normalize_rows(data: &mut [f32], dim: usize) -> Result<(), MiningError> {
    if dim == 0 || data.len() % dim != 0 {
        return Err(MiningError::InvalidInput(format!(
            "{} values do not split into rows of {dim}",
            data.len()
        )));
    }
    for row in data.chunks_exact_mut(dim) {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm >= MIN_NORM {
            for v in row.iter_mut() {
                *v /= norm;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_get_unit_norm() -> Result<(), MiningError> {
        let mut data = vec![3.0, 4.0, 0.0, 0.0, 0.0, 2.0];
        l2_normalize_rows(&mut data, 2)?;
        assert!((data[0] - 0.6).abs() < 1e-6);
        assert!((data[1] - 0.8).abs() < 1e-6);
        assert_eq!(&data[2..4], &[0.0, 0.0]);
        assert_eq!(&data[4..6], &[0.0, 1.0]);
        Ok(())
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut data = vec![1.0; 5];
        assert!(l2_normalize_rows(&mut data, 2).is_err());
        assert!(l2_normalize_rows(&mut data, 0).is_err());
    }
}
