use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// One row of a per-pattern log-likelihood table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub pattern: usize,
    pub partition: usize,
    pub weight: f64,
    pub log_likelihood: f64,
}

#[derive(Debug, Error)]
pub enum SiteTableError {
    #[error("CSV error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Table has {found} columns of values for {expected} patterns")]
    LengthMismatch { expected: usize, found: usize },
}

/// Zips per-pattern values with their partitions and weights.
pub fn site_records(
    partitions: &[usize],
    weights: &[f64],
    log_likelihoods: &[f64],
) -> Result<Vec<SiteRecord>, SiteTableError> {
    for found in [partitions.len(), weights.len()] {
        if found != log_likelihoods.len() {
            return Err(SiteTableError::LengthMismatch {
                expected: log_likelihoods.len(),
                found,
            });
        }
    }
    Ok(partitions
        .iter()
        .zip(weights)
        .zip(log_likelihoods)
        .enumerate()
        .map(|(pattern, ((&partition, &weight), &log_likelihood))| SiteRecord {
            pattern,
            partition,
            weight,
            log_likelihood,
        })
        .collect())
}

pub fn write_site_table(path: &Path, records: &[SiteRecord]) -> Result<(), SiteTableError> {
    let csv_error = |source: csv::Error| SiteTableError::Csv {
        path: path.to_string_lossy().to_string(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    for record in records {
        writer.serialize(record).map_err(csv_error)?;
    }
    writer
        .flush()
        .map_err(|e| csv_error(csv::Error::from(e)))?;
    Ok(())
}

pub fn read_site_table(path: &Path) -> Result<Vec<SiteRecord>, SiteTableError> {
    let csv_error = |source: csv::Error| SiteTableError::Csv {
        path: path.to_string_lossy().to_string(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    reader
        .deserialize::<SiteRecord>()
        .map(|row| row.map_err(csv_error))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn site_records_reject_misaligned_columns() {
        let result = site_records(&[0, 0], &[1.0], &[-1.0, -2.0]);
        assert!(matches!(
            result,
            Err(SiteTableError::LengthMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn written_table_has_header_and_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sites.csv");
        let records = site_records(&[0, 1], &[3.0, 1.0], &[-1.5, -2.25]).unwrap();
        write_site_table(&path, &records).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("pattern,partition,weight,log_likelihood\n"));
        assert_eq!(read_site_table(&path).unwrap(), records);
    }

    #[test]
    fn missing_file_reports_its_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        let err = read_site_table(&path).unwrap_err();
        assert!(err.to_string().contains("absent.csv"));
    }
}
