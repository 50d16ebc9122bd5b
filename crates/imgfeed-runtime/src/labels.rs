use std::path::Path;

use crate::PipelineError;

// Header counts come from the file; reservations are capped and the vectors grow as rows parse.
const MAX_RESERVE_ROWS: usize = 1 << 20;
const MAX_RESERVE_VALUES: usize = 1 << 22;

fn invalid(msg: impl Into<String>) -> PipelineError {
    PipelineError::InvalidInput(msg.into())
}

/// Per-image integer label vectors.
///
/// Text layout: a header `line_count label_len`, then `line_count` rows of
/// `identifier value_1 ... value_{label_len}`, all whitespace separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    ids: Vec<String>,
    label_len: usize,
    values: Vec<i32>,
}

impl LabelTable {
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let mut tokens = text.split_whitespace();
        let line_count: usize = tokens
            .next()
            .ok_or_else(|| invalid("empty label file"))?
            .parse()
            .map_err(|e| invalid(format!("bad label line count: {e}")))?;
        let label_len: usize = tokens
            .next()
            .ok_or_else(|| invalid("label header missing label_len"))?
            .parse()
            .map_err(|e| invalid(format!("bad label_len: {e}")))?;
        if line_count == 0 || label_len == 0 {
            return Err(invalid(format!(
                "label header must be positive (line_count={line_count}, label_len={label_len})"
            )));
        }

        let rows_hint = line_count.min(MAX_RESERVE_ROWS);
        let mut ids = Vec::with_capacity(rows_hint);
        let mut values =
            Vec::with_capacity(rows_hint.saturating_mul(label_len).min(MAX_RESERVE_VALUES));
        for row in 0..line_count {
            let id = tokens
                .next()
                .ok_or_else(|| invalid(format!("label row {row}: missing identifier")))?;
            ids.push(id.to_string());
            for k in 0..label_len {
                let v: i32 = tokens
                    .next()
                    .ok_or_else(|| invalid(format!("label row {row}: missing value {k}")))?
                    .parse()
                    .map_err(|e| invalid(format!("label row {row}: bad value {k}: {e}")))?;
                values.push(v);
            }
        }
        Ok(Self {
            ids,
            label_len,
            values,
        })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn label_len(&self) -> usize {
        self.label_len
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self, row: usize) -> &[i32] {
        &self.values[row * self.label_len..(row + 1) * self.label_len]
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, usize, Vec<i32>) {
        (self.ids, self.label_len, self.values)
    }
}

/// `(query, similar, dissimilar)` name tuples, one per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripletList {
    triplets: Vec<[String; 3]>,
}

impl TripletList {
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() % 3 != 0 {
            return Err(invalid(format!(
                "triplet list has {} names, not a multiple of 3",
                tokens.len()
            )));
        }
        let triplets = tokens
            .chunks_exact(3)
            .map(|t| [t[0].to_string(), t[1].to_string(), t[2].to_string()])
            .collect();
        Ok(Self { triplets })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    pub fn get(&self, i: usize) -> &[String; 3] {
        &self.triplets[i]
    }

    pub(crate) fn into_inner(self) -> Vec<[String; 3]> {
        self.triplets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_table_parses_rows() -> anyhow::Result<()> {
        let table = LabelTable::parse("2 3\na.jpg 1 2 3\nb.jpg -4 5 6\n")?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.label_len(), 3);
        assert_eq!(table.ids(), &["a.jpg".to_string(), "b.jpg".to_string()]);
        assert_eq!(table.labels(1), &[-4, 5, 6]);
        Ok(())
    }

    #[test]
    fn label_table_rejects_short_row() {
        let err = LabelTable::parse("2 2\na.jpg 1 2\nb.jpg 3\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn label_table_rejects_zero_header() {
        assert!(LabelTable::parse("0 1\n").is_err());
        assert!(LabelTable::parse("1 0\na.jpg\n").is_err());
    }

    #[test]
    fn huge_label_len_is_invalid_input() {
        let err = LabelTable::parse("2 4611686018427387904\na 1\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        let err = LabelTable::parse(&format!("{} 3\na 1 2 3\n", usize::MAX)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn triplet_list_parses_and_rejects_partial_rows() -> anyhow::Result<()> {
        let list = TripletList::parse("q1 s1 d1\nq2 s2 d2\n")?;
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(1)[2], "d2");
        assert!(TripletList::parse("q1 s1\n").is_err());
        Ok(())
    }
}
