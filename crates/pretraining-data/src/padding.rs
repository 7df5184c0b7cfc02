use crate::errors::{Error, Result};

/// Right-pads every row to the longest row length with `padding`.
///
/// Rows already at full length are copied unchanged. An empty input has no
/// maximum length and is rejected.
pub fn pad_dataset<T: Clone>(rows: &[Vec<T>], padding: T) -> Result<Vec<Vec<T>>> {
    let max_len = rows.iter().map(Vec::len).max().ok_or(Error::EmptyDataset)?;
    Ok(rows
        .iter()
        .map(|row| {
            let mut padded = Vec::with_capacity(max_len);
            padded.extend_from_slice(row);
            padded.resize(max_len, padding.clone());
            padded
        })
        .collect())
}

pub fn pad_dataset_default<T: Clone + Default>(rows: &[Vec<T>]) -> Result<Vec<Vec<T>>> {
    pad_dataset(rows, T::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_longest_row() {
        let rows = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        let padded = pad_dataset_default(&rows).unwrap();
        assert_eq!(padded, vec![vec![1, 2, 0], vec![3, 0, 0], vec![4, 5, 6]]);
    }

    #[test]
    fn custom_fill_value() {
        let rows = vec![vec![7u32], vec![]];
        assert_eq!(pad_dataset(&rows, 99).unwrap(), vec![vec![7], vec![99]]);
    }

    #[test]
    fn uniform_rows_are_unchanged() {
        let rows = vec![vec![1, 2], vec![3, 4]];
        let padded = pad_dataset(&rows, -1).unwrap();
        assert_eq!(padded, rows);
    }

    #[test]
    fn prefix_is_preserved_and_suffix_is_fill() {
        let rows: Vec<Vec<i64>> = (0..6).map(|n| (1..=n).collect()).collect();
        let padded = pad_dataset(&rows, -7).unwrap();
        for (original, row) in rows.iter().zip(&padded) {
            assert_eq!(row.len(), 5);
            assert_eq!(&row[..original.len()], original.as_slice());
            assert!(row[original.len()..].iter().all(|&v| v == -7));
        }
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let rows: Vec<Vec<u32>> = Vec::new();
        assert!(matches!(pad_dataset_default(&rows), Err(Error::EmptyDataset)));
    }
}
