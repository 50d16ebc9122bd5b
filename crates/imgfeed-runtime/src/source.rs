use imgfeed_store::NamedBlobCache;

use crate::labels::{LabelTable, TripletList};
use crate::PipelineError;

/// What one prefetch step walks over.
///
/// A logical record contributes `items_per_record()` named cache items, written into that
/// many contiguous regions of the batch, plus an optional label vector split into heads of
/// `label_lens()` widths.
pub trait BatchSource: Send + Sync + 'static {
    /// Number of logical records; the cursor wraps modulo this.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn items_per_record(&self) -> usize;

    /// Widths of the label heads; empty when the source carries no labels.
    fn label_lens(&self) -> &[usize];

    fn label_width(&self) -> usize {
        self.label_lens().iter().sum()
    }

    /// Cache names of record `index`, in region order. Length is `items_per_record()`.
    fn item_names(&self, index: usize) -> &[String];

    /// Concatenated label values of record `index`. Length is `label_width()`.
    fn labels(&self, index: usize) -> &[i32];
}

/// One image per record with at most one scalar label.
#[derive(Debug, Clone)]
pub struct SingleLabelSource {
    names: Vec<String>,
    labels: Vec<i32>,
    label_lens: Vec<usize>,
}

impl SingleLabelSource {
    pub fn unlabeled(names: Vec<String>) -> Self {
        Self {
            names,
            labels: Vec::new(),
            label_lens: Vec::new(),
        }
    }

    /// Every image of a loaded cache, in record order.
    pub fn from_cache(cache: &NamedBlobCache) -> Self {
        Self::unlabeled(cache.names().to_vec())
    }

    pub fn from_label_table(table: LabelTable) -> Result<Self, PipelineError> {
        if table.label_len() != 1 {
            return Err(PipelineError::InvalidInput(format!(
                "single-label source needs label_len 1, label file has {}",
                table.label_len()
            )));
        }
        let (names, _len, labels) = table.into_parts();
        Ok(Self {
            names,
            labels,
            label_lens: vec![1],
        })
    }
}

impl BatchSource for SingleLabelSource {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn items_per_record(&self) -> usize {
        1
    }

    fn label_lens(&self) -> &[usize] {
        &self.label_lens
    }

    fn item_names(&self, index: usize) -> &[String] {
        std::slice::from_ref(&self.names[index])
    }

    fn labels(&self, index: usize) -> &[i32] {
        if self.label_lens.is_empty() {
            &[]
        } else {
            std::slice::from_ref(&self.labels[index])
        }
    }
}

/// One image per record with a label vector decomposed into several heads.
#[derive(Debug, Clone)]
pub struct MultiLabelSource {
    names: Vec<String>,
    label_len: usize,
    values: Vec<i32>,
    label_lens: Vec<usize>,
}

impl MultiLabelSource {
    /// `label_len_vec` must be non-empty, all positive, and sum to the file's `label_len`.
    pub fn new(table: LabelTable, label_len_vec: Vec<usize>) -> Result<Self, PipelineError> {
        if label_len_vec.is_empty() || label_len_vec.contains(&0) {
            return Err(PipelineError::InvalidInput(format!(
                "label_len_vec must be non-empty and positive, got {label_len_vec:?}"
            )));
        }
        let specified: usize = label_len_vec.iter().sum();
        if specified != table.label_len() {
            return Err(PipelineError::InvalidInput(format!(
                "label_len_vec sums to {specified}, label file has label_len {}",
                table.label_len()
            )));
        }
        let (names, label_len, values) = table.into_parts();
        Ok(Self {
            names,
            label_len,
            values,
            label_lens: label_len_vec,
        })
    }
}

impl BatchSource for MultiLabelSource {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn items_per_record(&self) -> usize {
        1
    }

    fn label_lens(&self) -> &[usize] {
        &self.label_lens
    }

    fn item_names(&self, index: usize) -> &[String] {
        std::slice::from_ref(&self.names[index])
    }

    fn labels(&self, index: usize) -> &[i32] {
        &self.values[index * self.label_len..(index + 1) * self.label_len]
    }
}

/// Three images per record: query, similar, dissimilar. No labels.
#[derive(Debug, Clone)]
pub struct TripletSource {
    triplets: Vec<[String; 3]>,
}

impl TripletSource {
    pub fn new(list: TripletList) -> Self {
        Self {
            triplets: list.into_inner(),
        }
    }
}

impl BatchSource for TripletSource {
    fn len(&self) -> usize {
        self.triplets.len()
    }

    fn items_per_record(&self) -> usize {
        3
    }

    fn label_lens(&self) -> &[usize] {
        &[]
    }

    fn item_names(&self, index: usize) -> &[String] {
        &self.triplets[index]
    }

    fn labels(&self, _index: usize) -> &[i32] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_label_heads_must_cover_label_len() -> anyhow::Result<()> {
        let table = LabelTable::parse("1 3\na.jpg 1 2 3\n")?;
        assert!(MultiLabelSource::new(table.clone(), vec![1, 1]).is_err());
        assert!(MultiLabelSource::new(table.clone(), vec![3, 0]).is_err());
        let src = MultiLabelSource::new(table, vec![1, 2])?;
        assert_eq!(src.label_width(), 3);
        assert_eq!(src.labels(0), &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn single_label_requires_scalar_labels() -> anyhow::Result<()> {
        let table = LabelTable::parse("1 2\na.jpg 1 2\n")?;
        assert!(SingleLabelSource::from_label_table(table).is_err());

        let src = SingleLabelSource::from_label_table(LabelTable::parse("2 1\na 7\nb 9\n")?)?;
        assert_eq!(src.item_names(1), &["b".to_string()]);
        assert_eq!(src.labels(1), &[9]);
        Ok(())
    }

    #[test]
    fn triplet_source_yields_three_names() -> anyhow::Result<()> {
        let src = TripletSource::new(TripletList::parse("q s d\n")?);
        assert_eq!(src.items_per_record(), 3);
        assert_eq!(src.item_names(0).len(), 3);
        assert_eq!(src.label_width(), 0);
        Ok(())
    }
}
