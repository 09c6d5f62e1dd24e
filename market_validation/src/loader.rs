//! Loading recorded runs
//!
//! The analysis routines never touch the filesystem. A [`RunLoader`] hands them
//! parsed, validated records or a typed error: `MissingInput` when a required file
//! is absent, `SchemaMismatch` naming the field and file when its contents do not
//! match the expected columns.
//!
//! Directory layout read by [`DirectoryLoader`]:
//!
//! ```text
//! <experiment>/
//!   run_0/
//!     market_timeseries.csv      required
//!     insurer_snapshots.csv      optional (or entity_snapshots.csv)
//!     summary.json               optional
//!   run_1/
//!   ...
//! ```

use crate::aggregate::parse_param_key;
use crate::error::{AnalysisError, Result};
use crate::{EntitySnapshot, MarketTimeSeriesRecord, RunData, RunSummary};
use csv::StringRecord;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TIMESERIES_FILE: &str = "market_timeseries.csv";
pub const SNAPSHOT_FILES: [&str; 2] = ["insurer_snapshots.csv", "entity_snapshots.csv"];
pub const SUMMARY_FILE: &str = "summary.json";

/// Required time-series columns; any one name in a group satisfies it
const TIMESERIES_COLUMNS: &[&[&str]] = &[
    &["year"],
    &["loss_ratio", "avg_loss_ratio"],
    &[
        "num_solvent_entities",
        "num_solvent_syndicates",
        "num_solvent_insurers",
    ],
];

const SNAPSHOT_COLUMNS: &[&[&str]] = &[
    &["year"],
    &["entity_id", "insurer_id", "syndicate_id"],
    &["capital"],
    &["is_solvent"],
    &["loss_ratio"],
    &["num_customers"],
    &["price"],
    &["market_share"],
];

/// Source of parsed run data
pub trait RunLoader: Sync {
    fn load(&self, run_id: &str) -> Result<RunData>;
}

/// Reads runs from `<root>/<run_id>/`
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectoryLoader {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }
}

impl RunLoader for DirectoryLoader {
    fn load(&self, run_id: &str) -> Result<RunData> {
        let dir = self.run_dir(run_id);

        let series = read_timeseries(&dir.join(TIMESERIES_FILE))?;

        let snapshots = match SNAPSHOT_FILES.iter().map(|f| dir.join(f)).find(|p| p.exists()) {
            Some(path) => Some(read_snapshots(&path)?),
            None => {
                debug!(run = run_id, "no entity snapshots recorded");
                None
            }
        };

        let summary_path = dir.join(SUMMARY_FILE);
        let summary = if summary_path.exists() {
            Some(read_summary(&summary_path)?)
        } else {
            debug!(run = run_id, "no run summary recorded");
            None
        };

        Ok(RunData {
            series,
            snapshots,
            summary,
        })
    }
}

/// Market time series with strictly increasing years and finite, non-negative
/// loss ratios
pub fn read_timeseries(path: &Path) -> Result<Vec<MarketTimeSeriesRecord>> {
    let series: Vec<MarketTimeSeriesRecord> = read_csv(path, TIMESERIES_COLUMNS)?;

    if let Some(bad) = series
        .iter()
        .find(|r| !(r.loss_ratio.is_finite() && r.loss_ratio >= 0.0))
    {
        return Err(AnalysisError::SchemaMismatch {
            source_file: path.display().to_string(),
            field: "loss_ratio".to_string(),
            detail: format!(
                "must be finite and non-negative, got {} in year {}",
                bad.loss_ratio, bad.year
            ),
        });
    }

    if let Some(pair) = series.windows(2).find(|w| w[1].year <= w[0].year) {
        return Err(AnalysisError::SchemaMismatch {
            source_file: path.display().to_string(),
            field: "year".to_string(),
            detail: format!(
                "is not strictly increasing ({} followed by {})",
                pair[0].year, pair[1].year
            ),
        });
    }

    Ok(series)
}

pub fn read_snapshots(path: &Path) -> Result<Vec<EntitySnapshot>> {
    read_csv(path, SNAPSHOT_COLUMNS)
}

pub fn read_summary(path: &Path) -> Result<RunSummary> {
    if !path.exists() {
        return Err(AnalysisError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| AnalysisError::SchemaMismatch {
        source_file: path.display().to_string(),
        field: "summary".to_string(),
        detail: e.to_string(),
    })
}

fn read_csv<T: DeserializeOwned>(path: &Path, required: &[&[&str]]) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(AnalysisError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    check_headers(path, &headers, required)?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.map_err(|e| row_error(path, &headers, e))?);
    }
    Ok(rows)
}

fn check_headers(path: &Path, headers: &StringRecord, required: &[&[&str]]) -> Result<()> {
    for names in required {
        if !names.iter().any(|name| headers.iter().any(|h| h.trim() == *name)) {
            return Err(AnalysisError::SchemaMismatch {
                source_file: path.display().to_string(),
                field: names[0].to_string(),
                detail: "is missing".to_string(),
            });
        }
    }
    Ok(())
}

fn row_error(path: &Path, headers: &StringRecord, err: csv::Error) -> AnalysisError {
    if let csv::ErrorKind::Deserialize { err: de, .. } = err.kind() {
        let field = de
            .field()
            .and_then(|i| headers.get(i as usize))
            .unwrap_or("<row>");
        return AnalysisError::SchemaMismatch {
            source_file: path.display().to_string(),
            field: field.to_string(),
            detail: de.kind().to_string(),
        };
    }
    AnalysisError::Csv(err)
}

/// `run_*` subdirectories, in replication order
///
/// Numeric suffixes come first and sort numerically (`run_2` before `run_10`);
/// any other `run_*` names follow in lexical order.
pub fn discover_runs<P: AsRef<Path>>(root: P) -> Result<Vec<String>> {
    let mut runs: Vec<String> = subdirectories(root.as_ref())?
        .into_iter()
        .filter(|name| name.starts_with("run_"))
        .collect();
    runs.sort_by_key(|name| {
        let index = name["run_".len()..].parse::<u64>().ok();
        (index.is_none(), index, name.clone())
    });
    Ok(runs)
}

/// A swept parameter value and the directory holding its runs
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    pub param_name: String,
    pub param_value: f64,
    pub path: PathBuf,
}

/// `<param>_<value>` subdirectories, ascending by value
pub fn discover_sweep<P: AsRef<Path>>(root: P) -> Result<Vec<SweepPoint>> {
    let root = root.as_ref();
    let mut points: Vec<SweepPoint> = subdirectories(root)?
        .into_iter()
        .filter(|name| !name.starts_with("run_"))
        .filter_map(|name| {
            parse_param_key(&name).map(|(param_name, param_value)| SweepPoint {
                param_name,
                param_value,
                path: root.join(&name),
            })
        })
        .collect();
    points.sort_by(|a, b| a.param_value.total_cmp(&b.param_value));
    Ok(points)
}

fn subdirectories(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(AnalysisError::MissingInput {
            path: root.to_path_buf(),
        });
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SERIES_CSV: &str = "year,loss_ratio,avg_premium,num_solvent_entities\n\
                              0,1.0,100.0,10\n\
                              1,1.1,101.0,10\n\
                              2,0.9,99.0,9\n";

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_load_minimal_run() {
        let tmp = TempDir::new().unwrap();
        let run = tmp.path().join("run_0");
        fs::create_dir(&run).unwrap();
        write(&run, TIMESERIES_FILE, SERIES_CSV);

        let data = DirectoryLoader::new(tmp.path()).load("run_0").unwrap();

        assert_eq!(data.series.len(), 3);
        assert_eq!(data.series[2].num_solvent_entities, 9);
        assert_eq!(data.series[1].total_claims, 0.0);
        assert!(data.snapshots.is_none());
        assert!(data.summary.is_none());
    }

    #[test]
    fn test_load_with_aliases() {
        let tmp = TempDir::new().unwrap();
        let run = tmp.path().join("run_0");
        fs::create_dir(&run).unwrap();
        write(
            &run,
            TIMESERIES_FILE,
            "year,avg_loss_ratio,num_solvent_syndicates,num_insolvent_syndicates,cat_event_occurred\n\
             0,0.8,5,0,0\n\
             1,2.4,4,1,1\n",
        );
        write(
            &run,
            "insurer_snapshots.csv",
            "year,insurer_id,capital,market_share,price,markup,loss_ratio,num_customers,is_solvent\n\
             1,0,100.0,0.5,10.0,0.1,0.9,5,true\n\
             1,1,-5.0,0.0,10.0,0.1,3.0,0,false\n",
        );
        write(
            &run,
            SUMMARY_FILE,
            r#"{"metadata": {"config": {"leverage_ratio": 2.5}, "seed": 1, "num_years": 2}}"#,
        );

        let data = DirectoryLoader::new(tmp.path()).load("run_0").unwrap();

        assert_eq!(data.series[1].loss_ratio, 2.4);
        assert_eq!(data.series[1].num_insolvent_entities, 1);
        assert!(data.series[1].cat_event_occurred);
        let snaps = data.snapshots.as_ref().unwrap();
        assert_eq!(snaps[1].entity_id, 1);
        assert!(!snaps[1].is_solvent);
        assert_eq!(data.leverage_ratio(), Some(2.5));
    }

    #[test]
    fn test_missing_timeseries() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("run_3")).unwrap();

        let err = DirectoryLoader::new(tmp.path()).load("run_3").unwrap_err();

        match err {
            AnalysisError::MissingInput { path } => assert!(path.ends_with(TIMESERIES_FILE)),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_column_names_field_and_file() {
        let tmp = TempDir::new().unwrap();
        let run = tmp.path().join("run_0");
        fs::create_dir(&run).unwrap();
        write(&run, TIMESERIES_FILE, "year,num_solvent_entities\n0,10\n");

        let err = DirectoryLoader::new(tmp.path()).load("run_0").unwrap_err();

        match err {
            AnalysisError::SchemaMismatch {
                source_file, field, ..
            } => {
                assert_eq!(field, "loss_ratio");
                assert!(source_file.ends_with(TIMESERIES_FILE));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_wrong_type_names_field() {
        let tmp = TempDir::new().unwrap();
        let run = tmp.path().join("run_0");
        fs::create_dir(&run).unwrap();
        write(
            &run,
            TIMESERIES_FILE,
            "year,loss_ratio,num_solvent_entities\n0,high,10\n",
        );

        let err = DirectoryLoader::new(tmp.path()).load("run_0").unwrap_err();

        assert!(matches!(
            err,
            AnalysisError::SchemaMismatch { ref field, .. } if field == "loss_ratio"
        ));
    }

    #[test]
    fn test_years_must_increase() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TIMESERIES_FILE);
        fs::write(
            &path,
            "year,loss_ratio,num_solvent_entities\n0,1.0,10\n2,1.0,10\n2,1.0,10\n",
        )
        .unwrap();

        let err = read_timeseries(&path).unwrap_err();

        assert!(err.to_string().contains("'year'"));
    }

    #[test]
    fn test_non_finite_loss_ratio_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TIMESERIES_FILE);
        let mut csv = String::from("year,loss_ratio,num_solvent_entities\n");
        for year in 0..30 {
            let loss_ratio = if year == 7 { "NaN".to_string() } else { "1.0".to_string() };
            csv.push_str(&format!("{},{},10\n", year, loss_ratio));
        }
        fs::write(&path, csv).unwrap();

        let err = read_timeseries(&path).unwrap_err();

        assert!(matches!(
            err,
            AnalysisError::SchemaMismatch { ref field, ref detail, .. }
                if field == "loss_ratio" && detail.contains("year 7")
        ));

        for value in ["inf", "-0.5"] {
            fs::write(&path, format!("year,loss_ratio,num_solvent_entities\n0,{},10\n", value))
                .unwrap();
            assert!(read_timeseries(&path).is_err());
        }
    }

    #[test]
    fn test_malformed_summary() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SUMMARY_FILE);
        fs::write(&path, r#"{"cycle_metrics": {}}"#).unwrap();

        let err = read_summary(&path).unwrap_err();

        assert!(err.to_string().contains("metadata"));
    }

    #[test]
    fn test_discover_runs_in_numeric_order() {
        let tmp = TempDir::new().unwrap();
        for name in ["run_10", "run_2", "run_0", "run_backup", "plots"] {
            fs::create_dir(tmp.path().join(name)).unwrap();
        }
        fs::write(tmp.path().join("run_5"), "not a directory").unwrap();

        let runs = discover_runs(tmp.path()).unwrap();

        assert_eq!(runs, vec!["run_0", "run_2", "run_10", "run_backup"]);
    }

    #[test]
    fn test_discover_sweep() {
        let tmp = TempDir::new().unwrap();
        for name in ["smoothing_0.5", "smoothing_0.1", "run_0", "notes"] {
            fs::create_dir(tmp.path().join(name)).unwrap();
        }

        let points = discover_sweep(tmp.path()).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].param_name, "smoothing");
        assert_eq!(points[0].param_value, 0.1);
        assert!(points[1].path.ends_with("smoothing_0.5"));
    }

    #[test]
    fn test_discover_missing_root() {
        let err = discover_runs("/nonexistent/experiment").unwrap_err();
        assert!(matches!(err, AnalysisError::MissingInput { .. }));
    }
}
