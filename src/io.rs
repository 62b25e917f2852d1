// Module for loading and writing the team-season tables. It fetches the csv (disk or http), validates headers, and handles missing data.
use std::fs::{self, File};
use std::time::Duration;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use log::{info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::PipelineError;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header of the column appended to the evaluation table.
pub const PREDICTION_HEADER: &str = "PREDICTED_WINS";

/// `INDEX` is optional and `TARGET_WINS` is only required for the training table.
const REQUIRED_COLUMNS: [(&str, &str); 15] = [
    ("TEAM_BATTING_H", "batting_h"),
    ("TEAM_BATTING_2B", "batting_2b"),
    ("TEAM_BATTING_3B", "batting_3b"),
    ("TEAM_BATTING_HR", "batting_hr"),
    ("TEAM_BATTING_BB", "batting_bb"),
    ("TEAM_BATTING_SO", "batting_so"),
    ("TEAM_BASERUN_SB", "baserun_sb"),
    ("TEAM_BASERUN_CS", "baserun_cs"),
    ("TEAM_BATTING_HBP", "batting_hbp"),
    ("TEAM_PITCHING_H", "pitching_h"),
    ("TEAM_PITCHING_HR", "pitching_hr"),
    ("TEAM_PITCHING_BB", "pitching_bb"),
    ("TEAM_PITCHING_SO", "pitching_so"),
    ("TEAM_FIELDING_E", "fielding_e"),
    ("TEAM_FIELDING_DP", "fielding_dp"),
];
const TARGET_COLUMN: (&str, &str) = ("TARGET_WINS", "wins");

mod na_float {
    use serde::{self, Deserialize, Deserializer};

    /// Empty cells, `NA` and `NaN` all mean "missing".
    pub fn parse(s: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan") {
            return Ok(None);
        }
        s.parse::<f64>().map(Some)
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One team-season row as it appears in the source table. `TEAM_BATTING_HBP` and
/// `TEAM_PITCHING_HR` must be present in the header but are never read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "INDEX", alias = "index", default, deserialize_with = "na_float::deserialize")]
    pub index: Option<f64>,
    #[serde(rename = "TARGET_WINS", alias = "wins", default, deserialize_with = "na_float::deserialize")]
    pub wins: Option<f64>,
    #[serde(rename = "TEAM_BATTING_H", alias = "batting_h", default, deserialize_with = "na_float::deserialize")]
    pub batting_h: Option<f64>,
    #[serde(rename = "TEAM_BATTING_2B", alias = "batting_2b", default, deserialize_with = "na_float::deserialize")]
    pub batting_2b: Option<f64>,
    #[serde(rename = "TEAM_BATTING_3B", alias = "batting_3b", default, deserialize_with = "na_float::deserialize")]
    pub batting_3b: Option<f64>,
    #[serde(rename = "TEAM_BATTING_HR", alias = "batting_hr", default, deserialize_with = "na_float::deserialize")]
    pub batting_hr: Option<f64>,
    #[serde(rename = "TEAM_BATTING_BB", alias = "batting_bb", default, deserialize_with = "na_float::deserialize")]
    pub batting_bb: Option<f64>,
    #[serde(rename = "TEAM_BATTING_SO", alias = "batting_so", default, deserialize_with = "na_float::deserialize")]
    pub batting_so: Option<f64>,
    #[serde(rename = "TEAM_BASERUN_SB", alias = "baserun_sb", default, deserialize_with = "na_float::deserialize")]
    pub baserun_sb: Option<f64>,
    #[serde(rename = "TEAM_BASERUN_CS", alias = "baserun_cs", default, deserialize_with = "na_float::deserialize")]
    pub baserun_cs: Option<f64>,
    #[serde(rename = "TEAM_PITCHING_H", alias = "pitching_h", default, deserialize_with = "na_float::deserialize")]
    pub pitching_h: Option<f64>,
    #[serde(rename = "TEAM_PITCHING_BB", alias = "pitching_bb", default, deserialize_with = "na_float::deserialize")]
    pub pitching_bb: Option<f64>,
    #[serde(rename = "TEAM_PITCHING_SO", alias = "pitching_so", default, deserialize_with = "na_float::deserialize")]
    pub pitching_so: Option<f64>,
    #[serde(rename = "TEAM_FIELDING_E", alias = "fielding_e", default, deserialize_with = "na_float::deserialize")]
    pub fielding_e: Option<f64>,
    #[serde(rename = "TEAM_FIELDING_DP", alias = "fielding_dp", default, deserialize_with = "na_float::deserialize")]
    pub fielding_dp: Option<f64>,
}

/// A parsed table. `records[i]` is the verbatim csv row behind `rows[i]`.
#[derive(Debug)]
pub struct RawTable {
    pub headers: StringRecord,
    pub records: Vec<StringRecord>,
    pub rows: Vec<RawRecord>,
}

/// Read a table from disk, or over http when `src` is a URL.
pub fn read_source(src: &str) -> Result<String, PipelineError> {
    if src.starts_with("http://") || src.starts_with("https://") {
        info!("Fetching {}", src);
        let http = |source| PipelineError::Http {
            url: src.to_string(),
            source,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(http)?;
        let body = client
            .get(src)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .map_err(http)?;
        Ok(body)
    } else {
        Ok(fs::read_to_string(src)?)
    }
}

pub fn load_table(src: &str, require_target: bool) -> Result<RawTable, PipelineError> {
    let text = read_source(src)?;
    let table = parse_table(&text, require_target)?;
    info!("Loaded {} rows from {}", table.rows.len(), src);
    Ok(table)
}

fn has_column(headers: &StringRecord, (name, alias): (&str, &str)) -> bool {
    headers.iter().any(|h| h == name || h == alias)
}

pub fn parse_table(text: &str, require_target: bool) -> Result<RawTable, PipelineError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b',')
        .flexible(true)
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    // Grab and own the header row
    let headers = rdr.headers()?.clone();
    let expected_len = headers.len();

    let mut required: Vec<(&str, &str)> = REQUIRED_COLUMNS.to_vec();
    if require_target {
        required.push(TARGET_COLUMN);
    }
    if let Some((name, _)) = required.into_iter().find(|&col| !has_column(&headers, col)) {
        return Err(PipelineError::MissingColumn(name.to_string()));
    }

    let mut records = Vec::new();
    let mut rows = Vec::new();
    for result in rdr.records() {
        let raw: StringRecord = result?;
        let line = raw.position().map(|p| p.line()).unwrap_or(0);

        // 1) Skip completely empty lines
        if raw.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        // 2) Training rows must be well formed; evaluation rows are kept so that
        //    every input row gets a prediction, with unreadable cells as missing.
        if raw.len() != expected_len {
            if require_target {
                warn!(
                    "Skipping line {}: expected {} fields, found {}",
                    line,
                    expected_len,
                    raw.len(),
                );
                continue;
            }
            warn!(
                "Line {}: expected {} fields, found {}; absent cells read as missing",
                line,
                expected_len,
                raw.len(),
            );
        }

        // 3) Attempt to deserialize
        match raw.deserialize::<RawRecord>(Some(&headers)) {
            Ok(rec) if raw.len() == expected_len => {
                records.push(raw);
                rows.push(rec);
            }
            Err(e) if require_target => {
                warn!("Skipping malformed record at line {}: {}", line, e)
            }
            _ => {
                let (record, rec) = salvage(&headers, &raw, line)?;
                records.push(record);
                rows.push(rec);
            }
        }
    }

    Ok(RawTable {
        headers,
        records,
        rows,
    })
}

/// Rebuild a malformed evaluation row cell by cell. The returned record is the
/// original row padded or cut to the header width; cells that do not parse as
/// numbers become missing in the returned `RawRecord`.
fn salvage(
    headers: &StringRecord,
    raw: &StringRecord,
    line: u64,
) -> Result<(StringRecord, RawRecord), PipelineError> {
    if raw.len() > headers.len() {
        warn!("Line {}: dropping {} trailing fields", line, raw.len() - headers.len());
    }
    let record: StringRecord = (0..headers.len())
        .map(|i| raw.get(i).unwrap_or(""))
        .collect();
    let cells: StringRecord = headers
        .iter()
        .zip(record.iter())
        .map(|(name, cell)| match na_float::parse(cell) {
            Ok(_) => cell,
            Err(_) => {
                warn!("Line {}: unreadable {} value {:?} read as missing", line, name, cell);
                ""
            }
        })
        .collect();
    let rec = cells.deserialize::<RawRecord>(Some(headers))?;
    Ok((record, rec))
}

/// Write the evaluation table verbatim with one appended column of predicted wins.
pub fn write_predictions(
    path: &str,
    table: &RawTable,
    predictions: &[f64],
) -> Result<(), PipelineError> {
    if predictions.len() != table.records.len() {
        return Err(PipelineError::insufficient(
            PREDICTION_HEADER,
            format!(
                "{} predictions for {} rows",
                predictions.len(),
                table.records.len()
            ),
        ));
    }

    let mut wtr = WriterBuilder::new().from_writer(File::create(path)?);
    let mut header = table.headers.clone();
    header.push_field(PREDICTION_HEADER);
    wtr.write_record(&header)?;

    for (record, pred) in table.records.iter().zip(predictions) {
        let mut out = record.clone();
        out.push_field(&format!("{}", pred.round() as i64));
        wtr.write_record(&out)?;
    }
    wtr.flush()?;
    info!("Wrote {} predictions to {}", predictions.len(), path);
    Ok(())
}
