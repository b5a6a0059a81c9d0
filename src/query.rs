use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Default number of granules requested per CMR page (the CMR maximum).
pub const DEFAULT_PAGE_SIZE: u32 = 2000;

const CMR_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("bounding box must be min-lon,min-lat,max-lon,max-lat; got {0}")]
    BoundingBoxFormat(String),

    #[error("bounding box corners out of order: {0}")]
    BoundingBoxOrder(String),

    #[error("bounding box coordinate out of range: {0}")]
    BoundingBoxRange(String),

    #[error("search window size must be positive")]
    ZeroWindow,

    #[error("unknown window unit [{0}] (expected seconds, minutes, hours, days or weeks)")]
    WindowUnit(String),

    #[error("search window does not fit in the supported time range")]
    WindowOverflow,

    #[error("cannot parse timestamp [{0}] (expected RFC 3339, YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD)")]
    Timestamp(String),
}

/// Geographic extent ordered as (min-lon, min-lat, max-lon, max-lat).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, QueryError> {
        let shown = format!("{min_lon},{min_lat},{max_lon},{max_lat}");
        let lon_ok = |v: f64| v.is_finite() && (-180.0..=180.0).contains(&v);
        let lat_ok = |v: f64| v.is_finite() && (-90.0..=90.0).contains(&v);
        if !(lon_ok(min_lon) && lon_ok(max_lon) && lat_ok(min_lat) && lat_ok(max_lat)) {
            return Err(QueryError::BoundingBoxRange(shown));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(QueryError::BoundingBoxOrder(shown));
        }
        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

impl FromStr for BoundingBox {
    type Err = QueryError;

    /// Parses `min-lon,min-lat,max-lon,max-lat`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| QueryError::BoundingBoxFormat(s.to_string()))?;
        match parts.as_slice() {
            [w, s_, e, n] => Self::new(*w, *s_, *e, *n),
            _ => Err(QueryError::BoundingBoxFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl WindowUnit {
    fn seconds(self) -> i64 {
        match self {
            WindowUnit::Seconds => 1,
            WindowUnit::Minutes => 60,
            WindowUnit::Hours => 3_600,
            WindowUnit::Days => 86_400,
            WindowUnit::Weeks => 604_800,
        }
    }
}

impl FromStr for WindowUnit {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Ok(WindowUnit::Seconds),
            "m" | "min" | "minute" | "minutes" => Ok(WindowUnit::Minutes),
            "h" | "hour" | "hours" => Ok(WindowUnit::Hours),
            "d" | "day" | "days" => Ok(WindowUnit::Days),
            "w" | "week" | "weeks" => Ok(WindowUnit::Weeks),
            other => Err(QueryError::WindowUnit(other.to_string())),
        }
    }
}

/// Half-width of the temporal search range around the reference timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    size: NonZeroU32,
    unit: WindowUnit,
}

impl TimeWindow {
    pub fn new(size: u32, unit: WindowUnit) -> Result<Self, QueryError> {
        let size = NonZeroU32::new(size).ok_or(QueryError::ZeroWindow)?;
        Ok(Self { size, unit })
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn unit(&self) -> WindowUnit {
        self.unit
    }

    fn as_delta(&self) -> Option<TimeDelta> {
        TimeDelta::try_seconds(i64::from(self.size.get()) * self.unit.seconds())
    }
}

/// Parameters of a CMR granule search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    product: String,
    version: String,
    bbox: BoundingBox,
    timestamp: DateTime<Utc>,
    window: TimeWindow,
    extension: Option<String>,
    page_size: u32,
}

impl SearchQuery {
    pub fn new(
        product: impl Into<String>,
        version: impl Into<String>,
        bbox: BoundingBox,
        timestamp: DateTime<Utc>,
        window: TimeWindow,
    ) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
            bbox,
            timestamp,
            window,
            extension: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Keep only URLs ending with `extension` (e.g. `.hdf`, leading dot optional).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let ext = extension.into();
        let ext = ext.trim();
        self.extension = if ext.is_empty() {
            None
        } else if ext.starts_with('.') {
            Some(ext.to_string())
        } else {
            Some(format!(".{ext}"))
        };
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Start and end of the searched interval: `timestamp ± window`.
    pub fn temporal_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), QueryError> {
        let delta = self.window.as_delta().ok_or(QueryError::WindowOverflow)?;
        let start = self
            .timestamp
            .checked_sub_signed(delta)
            .ok_or(QueryError::WindowOverflow)?;
        let end = self
            .timestamp
            .checked_add_signed(delta)
            .ok_or(QueryError::WindowOverflow)?;
        Ok((start, end))
    }

    /// Query-string pairs for `search/granules.json`.
    pub fn to_params(&self) -> Result<Vec<(&'static str, String)>, QueryError> {
        let (start, end) = self.temporal_range()?;

        let mut params = vec![("short_name", self.product.clone())];
        for v in version_variants(&self.version) {
            params.push(("version", v));
        }
        params.push(("bounding_box", self.bbox.to_string()));
        params.push((
            "temporal",
            format!(
                "{},{}",
                start.format(CMR_TIME_FORMAT),
                end.format(CMR_TIME_FORMAT)
            ),
        ));
        params.push(("page_size", self.page_size.to_string()));
        params.push(("sort_key", "start_date".to_string()));
        Ok(params)
    }
}

/// CMR stores versions both zero-padded and bare, so `3` is sent as `003`, `03` and `3`.
pub(crate) fn version_variants(version: &str) -> Vec<String> {
    let version = version.trim();
    if version.is_empty() {
        return Vec::new();
    }
    if !version.chars().all(|c| c.is_ascii_digit()) {
        return vec![version.to_string()];
    }
    let bare = version.trim_start_matches('0');
    let bare = if bare.is_empty() { "0" } else { bare };

    let mut out: Vec<String> = Vec::new();
    for width in (bare.len()..=3).rev() {
        let v = format!("{:0>width$}", bare, width = width);
        if !out.contains(&v) {
            out.push(v);
        }
    }
    if !out.iter().any(|v| v == version) {
        out.insert(0, version.to_string());
    }
    out
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (read as UTC) or a bare date.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, QueryError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(QueryError::Timestamp(s.to_string()))
}
