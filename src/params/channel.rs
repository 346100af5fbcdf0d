use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{error, info};

use crate::params::ParamError;

/// Parameter keys that scale columns of the channel table rather than gridded variables
pub static CHANNEL_KEYS: [&str; 4] = ["Bw", "HLINK", "ChSSlp", "MannN"];

/// Template table read from the parameter source directory
pub static CHANNEL_TEMPLATE: &str = "CHANPARM.TBL.temp";
/// Table written into the job directory
pub static CHANNEL_TABLE: &str = "CHANPARM.TBL";

const HEADER_LINES: usize = 3;
const MAX_ROWS: usize = 10;

/// One data row: `(id, width, link-length, side-slope, manning-n)`
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChannelRow {
    id: i64,
    width: f64,
    link: f64,
    slope: f64,
    mann_n: f64,
}

impl ChannelRow {
    fn parse(line: &str) -> Result<ChannelRow, String> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            return Err(format!("expected 5 columns, found {}", fields.len()));
        }
        let float = |i: usize| {
            fields[i]
                .parse::<f64>()
                .map_err(|err| format!("column {} ({:?}): {}", i + 1, fields[i], err))
        };
        Ok(ChannelRow {
            id: fields[0]
                .parse::<i64>()
                .map_err(|err| format!("column 1 ({:?}): {}", fields[0], err))?,
            width: float(1)?,
            link: float(2)?,
            slope: float(3)?,
            mann_n: float(4)?,
        })
    }

    fn scaled(self, factors: &ChannelFactors) -> ChannelRow {
        ChannelRow {
            id: self.id,
            width: self.width * factors.bw,
            link: self.link * factors.hlink,
            slope: self.slope * factors.ch_sslp,
            mann_n: self.mann_n * factors.mann_n,
        }
    }

    fn render(&self) -> String {
        format!(
            "{},{:8.3},{:8.3},{:8.3},{:8.3}\n",
            self.id, self.width, self.link, self.slope, self.mann_n
        )
    }
}

/// Multipliers for the four float columns, 1.0 where a key is not set
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChannelFactors {
    bw: f64,
    hlink: f64,
    ch_sslp: f64,
    mann_n: f64,
}

impl ChannelFactors {
    fn from_params(params: &BTreeMap<String, f64>) -> ChannelFactors {
        let get = |key: &str| match params.get(key) {
            Some(value) => *value,
            None => {
                info!("Parameter {} not provided, using default value: 1.0", key);
                1.0
            }
        };
        ChannelFactors {
            bw: get("Bw"),
            hlink: get("HLINK"),
            ch_sslp: get("ChSSlp"),
            mann_n: get("MannN"),
        }
    }
}

/// Rewrite `CHANPARM.TBL.temp` from `input_dir` as `CHANPARM.TBL` in `output_dir`
///
/// The three header lines are copied verbatim. Up to ten data rows follow; the float columns
/// are multiplied by `Bw`, `HLINK`, `ChSSlp` and `MannN`. A shorter table is fine, including
/// one followed by blank lines up to the end of the file. A blank line with rows after it is
/// an error.
pub fn apply_channel_params(
    params: &BTreeMap<String, f64>,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<(), ParamError> {
    let input_path = input_dir.join(CHANNEL_TEMPLATE);
    let output_path = output_dir.join(CHANNEL_TABLE);
    let factors = ChannelFactors::from_params(params);
    info!("Reading {}", input_path.display());

    let table_error = |reason: String| {
        error!("Failed to adjust {}: {}", CHANNEL_TABLE, reason);
        ParamError::ChannelTable { path: input_path.clone(), reason }
    };

    let input = File::open(&input_path).map_err(|err| table_error(err.to_string()))?;
    let output = File::create(&output_path).map_err(|err| table_error(err.to_string()))?;
    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);

    for n in 0..HEADER_LINES {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|err| table_error(err.to_string()))?;
        if read == 0 {
            return Err(table_error(format!("header ends after {} lines", n)));
        }
        writer
            .write_all(line.as_bytes())
            .map_err(|err| table_error(err.to_string()))?;
    }

    let mut lines = reader.lines();

    for num in 1..=MAX_ROWS {
        let line = match lines.next() {
            Some(line) => line.map_err(|err| table_error(err.to_string()))?,
            None => break,
        };
        if line.trim().is_empty() {
            // only trailing blank lines may end the table early
            for rest in lines.by_ref() {
                let rest = rest.map_err(|err| table_error(err.to_string()))?;
                if !rest.trim().is_empty() {
                    return Err(table_error(format!("line {}: blank line inside the data rows", num)));
                }
            }
            break;
        }
        let row = ChannelRow::parse(&line).map_err(|reason| table_error(format!("line {}: {}", num, reason)))?;
        let data = row.scaled(&factors).render();
        info!("Adjusting line {}: {}", num, data.trim_end());
        writer
            .write_all(data.as_bytes())
            .map_err(|err| table_error(err.to_string()))?;
    }

    writer.flush().map_err(|err| table_error(err.to_string()))?;
    info!("Parameter {} adjusted successfully", CHANNEL_TABLE);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    static HEADER: &str = "Channel Parameters\n10,'Bw','HLINK','ChSSlp','MannN'\nORDER\n";

    fn write_template(dir: &Path, rows: &str) {
        fs::write(dir.join(CHANNEL_TEMPLATE), format!("{}{}", HEADER, rows)).unwrap();
    }

    fn params(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn row_is_scaled_and_formatted() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "1, 1.0, 1.0, 1.0, 1.0\n");

        apply_channel_params(&params(&[("Bw", 2.0), ("MannN", 0.5)]), dir.path(), dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join(CHANNEL_TABLE)).unwrap();
        let rows: Vec<&str> = out.lines().skip(3).collect();
        assert_eq!(rows, vec!["1,   2.000,   1.000,   1.000,   0.500"]);
        assert_eq!(rows[0].replace(' ', ""), "1,2.000,1.000,1.000,0.500");
    }

    #[test]
    fn header_is_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "1,1.0,1.0,1.0,1.0\n");
        apply_channel_params(&BTreeMap::new(), dir.path(), dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join(CHANNEL_TABLE)).unwrap();
        assert!(out.starts_with(HEADER));
    }

    #[test]
    fn only_ten_rows_are_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let rows: String = (1..=12).map(|i| format!("{},1.5,2.0,0.5,0.1\n", i)).collect();
        write_template(dir.path(), &rows);

        apply_channel_params(&params(&[("HLINK", 3.0)]), dir.path(), dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join(CHANNEL_TABLE)).unwrap();
        let data: Vec<&str> = out.lines().skip(3).collect();
        assert_eq!(data.len(), 10);
        assert_eq!(data[9], "10,   1.500,   6.000,   0.500,   0.100");
    }

    #[test]
    fn short_table_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "1,1.0,1.0,1.0,1.0\n2,1.0,1.0,1.0,1.0\n");
        apply_channel_params(&BTreeMap::new(), dir.path(), dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join(CHANNEL_TABLE)).unwrap();
        assert_eq!(out.lines().count(), 5);
    }

    #[test]
    fn trailing_blank_lines_end_the_table() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "1,1.0,1.0,1.0,1.0\n\n  \n\n");
        apply_channel_params(&params(&[("Bw", 3.0)]), dir.path(), dir.path()).unwrap();

        let out = fs::read_to_string(dir.path().join(CHANNEL_TABLE)).unwrap();
        let data: Vec<&str> = out.lines().skip(3).collect();
        assert_eq!(data, vec!["1,   3.000,   1.000,   1.000,   1.000"]);
    }

    #[test]
    fn blank_line_between_rows_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "1,1.0,1.0,1.0,1.0\n\n2,1.0,1.0,1.0,1.0\n");

        match apply_channel_params(&BTreeMap::new(), dir.path(), dir.path()) {
            Err(ParamError::ChannelTable { reason, .. }) => assert!(reason.starts_with("line 2:"), "{}", reason),
            other => panic!("expected ChannelTable, got {:?}", other),
        }
    }

    #[test]
    fn malformed_row_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "1,wide,1.0,1.0,1.0\n");
        assert!(matches!(
            apply_channel_params(&BTreeMap::new(), dir.path(), dir.path()),
            Err(ParamError::ChannelTable { .. })
        ));
    }

    #[test]
    fn missing_template_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            apply_channel_params(&BTreeMap::new(), dir.path(), dir.path()),
            Err(ParamError::ChannelTable { .. })
        ));
    }
}
