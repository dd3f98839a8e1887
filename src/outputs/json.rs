//! JSON run report.
//!
//! # Output Structure
//!
//! Reports are grouped by the run's start date in Asia/Seoul:
//! ```text
//! report_dir/
//! └── 2024-05-02/
//!     ├── 083000.json
//!     └── 203000.json
//! ```

use chrono_tz::Asia::Seoul;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

use crate::pipeline::RunReport;

/// Path a report is written to under `report_dir`.
pub fn report_path(report: &RunReport, report_dir: &str) -> PathBuf {
    let local = report.started_at.with_timezone(&Seoul);
    PathBuf::from(report_dir)
        .join(local.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", local.format("%H%M%S")))
}

/// Write a [`RunReport`] as pretty JSON. Returns the written path.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir))]
pub async fn write_report(report: &RunReport, report_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report, report_dir);

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TickerReport;
    use chrono::{TimeZone, Utc};

    fn report() -> RunReport {
        let started = Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
        RunReport {
            started_at: started,
            finished_at: started,
            cancelled: false,
            tickers: vec![TickerReport {
                ticker: "TSLA".to_string(),
                discovered: 3,
                processed: 2,
                failed: 1,
                inserted: 2,
                ..TickerReport::default()
            }],
        }
    }

    #[test]
    fn test_report_path_uses_seoul_date() {
        let path = report_path(&report(), "/tmp/reports");
        assert_eq!(path, PathBuf::from("/tmp/reports/2024-05-02/083000.json"));
    }

    #[tokio::test]
    async fn test_write_report_round_trips_counts() {
        let dir = std::env::temp_dir().join(format!("stockmind-report-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().into_owned();
        let path = write_report(&report(), &dir_str).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["tickers"][0]["ticker"], "TSLA");
        assert_eq!(value["tickers"][0]["inserted"], 2);
        assert_eq!(value["cancelled"], false);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
