#[cfg(test)]
pub mod test_helpers {
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use ndarray::Array2;

    use crate::config::PipelineConfig;
    use crate::observations::{Observation, StationId};
    use crate::time_series::{TimeSeriesMatrix, TimestampGrid};

    pub fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    pub fn hour(h: i64) -> NaiveDateTime {
        t0() + Duration::hours(h)
    }

    pub fn obs(station: &str, h: i64, value: f64) -> Observation {
        Observation::new(station, hour(h), value)
    }

    /// Matrix starting at `t0()` with one column per entry of `columns`.
    pub fn matrix(columns: &[(&str, Vec<Option<f64>>)]) -> TimeSeriesMatrix {
        let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut values = Array2::from_elem((rows, columns.len()), None);
        for (c, (_, column)) in columns.iter().enumerate() {
            for (r, v) in column.iter().enumerate() {
                values[[r, c]] = *v;
            }
        }
        let stations = columns.iter().map(|(s, _)| StationId::new(*s)).collect();
        TimeSeriesMatrix::from_parts(
            TimestampGrid::hourly(t0(), hour(rows as i64 - 1)),
            stations,
            values,
        )
    }

    /// Single-station matrix holding `0, 1, ..., rows - 1`.
    pub fn ramp(rows: usize) -> TimeSeriesMatrix {
        matrix(&[("A", (0..rows).map(|i| Some(i as f64)).collect())])
    }

    /// `hours` hourly readings for each station, positive and varying.
    pub fn hourly_rows(stations: &[&str], hours: i64) -> Vec<Observation> {
        let mut rows = Vec::new();
        for (s, station) in stations.iter().enumerate() {
            for h in 0..hours {
                rows.push(obs(station, h, 1.0 + (h % 7) as f64 + 3.0 * s as f64));
            }
        }
        rows
    }

    pub fn config_yaml(body: &str) -> PipelineConfig {
        serde_yaml::from_str(body).unwrap()
    }
}
