//! Normalisation of raw gridded snow datasets: canonical dimension names,
//! ISO-8601 time coordinates, (time, northing, easting) axis order and a CRS.

use chrono::{DateTime, NaiveDateTime};

use crate::dataset::{CoordValues, Crs, Dataset, DatasetError, DatasetResult};

pub const TIME: &str = "time";
pub const NORTHING: &str = "northing";
pub const EASTING: &str = "easting";

/// Canonical axis order after reformatting.
pub const CANONICAL_ORDER: [&str; 3] = [TIME, NORTHING, EASTING];

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Converts one epoch value (seconds, rounded to the nearest second) to `YYYY-MM-DDTHH:MM:SS` UTC.
pub fn epoch_seconds_to_iso8601(secs: f64) -> DatasetResult<String> {
    if !secs.is_finite() {
        return Err(DatasetError::InvalidEpoch(secs));
    }
    let rounded = secs.round();
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return Err(DatasetError::InvalidEpoch(secs));
    }
    let dt = DateTime::from_timestamp(rounded as i64, 0).ok_or(DatasetError::InvalidEpoch(secs))?;
    Ok(dt.format(ISO_FORMAT).to_string())
}

/// Lazily converts epoch seconds to ISO-8601 strings, one element at a time.
pub fn epoch_to_iso8601<I>(values: I) -> impl Iterator<Item = DatasetResult<String>>
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().map(epoch_seconds_to_iso8601)
}

/// Parses a timestamp produced by [`epoch_seconds_to_iso8601`] (or any RFC 3339 string) back to epoch seconds.
pub fn iso8601_to_epoch(s: &str) -> DatasetResult<i64> {
    let s = s.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, ISO_FORMAT) {
        return Ok(naive.and_utc().timestamp());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .map_err(|_| DatasetError::InvalidTimestamp(s.to_string()))
}

/// Replaces the numeric epoch coordinate of `dim` with ISO-8601 strings.
///
/// A coordinate that is already textual is left as is.
pub fn decode_time(ds: &mut Dataset, dim: &str) -> DatasetResult<()> {
    let values = match ds.coord(dim) {
        Some(CoordValues::Numeric(v)) => v.clone(),
        Some(CoordValues::Text(_)) => return Ok(()),
        None if ds.has_dim(dim) => return Err(DatasetError::MissingCoordinate(dim.to_string())),
        None => return Err(DatasetError::UnknownDimension(dim.to_string())),
    };
    let iso = epoch_to_iso8601(values).collect::<DatasetResult<Vec<_>>>()?;
    ds.assign_coords(dim, CoordValues::Text(iso))
}

/// Ordered list of reformatting steps.
///
/// Steps run as: squeeze, rename, decode time, assign coordinates, transpose,
/// write CRS. Applying the same plan twice leaves the dataset as after the first run.
#[derive(Debug, Clone, Default)]
pub struct ReformatPlan {
    squeeze: Vec<(String, String)>,
    renames: Vec<(String, String)>,
    time_dim: Option<String>,
    coords: Vec<(String, CoordValues)>,
    order: Vec<String>,
    crs: Option<Crs>,
}

impl ReformatPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renames `x`/`y`/`t` to easting/northing/time, decodes epoch times and
    /// transposes to (time, northing, easting).
    pub fn canonical(x_dim: &str, y_dim: &str, time_dim: &str) -> Self {
        Self::new()
            .with_rename(x_dim, EASTING)
            .with_rename(y_dim, NORTHING)
            .with_rename(time_dim, TIME)
            .with_time_decoding(TIME)
            .with_order(&CANONICAL_ORDER)
    }

    /// Drops singleton `dim` from each of `vars`.
    pub fn with_squeeze(mut self, dim: &str, vars: &[&str]) -> Self {
        self.squeeze
            .extend(vars.iter().map(|v| (v.to_string(), dim.to_string())));
        self
    }

    pub fn with_rename(mut self, from: &str, to: &str) -> Self {
        self.renames.push((from.to_string(), to.to_string()));
        self
    }

    pub fn with_time_decoding(mut self, dim: &str) -> Self {
        self.time_dim = Some(dim.to_string());
        self
    }

    /// Coordinates are assigned after renaming, so `dim` is the new name.
    pub fn with_coords(mut self, dim: &str, values: CoordValues) -> Self {
        self.coords.push((dim.to_string(), values));
        self
    }

    pub fn with_order(mut self, order: &[&str]) -> Self {
        self.order = order.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn apply(&self, ds: &mut Dataset) -> DatasetResult<()> {
        for (var, dim) in &self.squeeze {
            ds.squeeze(var, dim)?;
        }

        ds.rename_dims(&self.renames)?;

        if let Some(dim) = &self.time_dim {
            decode_time(ds, dim)?;
        }

        for (dim, values) in &self.coords {
            ds.assign_coords(dim, values.clone())?;
        }

        if !self.order.is_empty() {
            let order: Vec<&str> = self
                .order
                .iter()
                .map(String::as_str)
                .filter(|d| ds.has_dim(d))
                .collect();
            ds.transpose(&order)?;
        }

        if let Some(crs) = &self.crs {
            ds.write_crs(crs.clone());
        }

        log::debug!("reformatted dataset:\n{}", ds);
        Ok(())
    }
}
