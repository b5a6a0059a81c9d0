//! Locate, download and normalise snow datasets published through NASA Earthdata.
//!
//! The crate covers the three steps of a typical snow-data workflow:
//! search CMR for granules in a bounding box and time window, download them
//! with Earthdata Login credentials, then normalise the gridded result
//! (canonical dimension names, ISO-8601 times, (time, northing, easting)
//! order and a CRS).
//!
//! ## Quick start
//! - Searching needs no credentials.
//! - Downloading reads `EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD`, or the
//!   `machine urs.earthdata.nasa.gov` entry of `~/.netrc`.
//!
//! ```no_run
//! use anyhow::Result;
//! use snowdata::{BoundingBox, Client, SearchQuery, TimeWindow, WindowUnit, parse_timestamp};
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let query = SearchQuery::new(
//!         "AST_L1T",
//!         "003",
//!         BoundingBox::new(-108.3, 38.9, -107.7, 39.2)?,
//!         parse_timestamp("2020-02-08T18:00:00Z")?,
//!         TimeWindow::new(1, WindowUnit::Days)?,
//!     )
//!     .with_extension(".hdf");
//!
//!     let urls = client.search_to_file(&query, Path::new("aster_granules.txt"))?;
//!     client.download_all(&urls, Path::new("data/aster"))?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod client;
mod cmr;
mod config;
mod dataset;
mod error;
mod granules;
#[cfg(feature = "netcdf")]
mod netcdf_io;
mod query;
mod reformat;
mod util;

pub use client::{Client, ClientConfig, Credentials};
pub use config::{DEFAULT_CMR_URL, EARTHDATA_LOGIN_HOST, write_netrc_entry};
pub use dataset::{CoordValues, Crs, Dataset, DatasetError, DatasetResult, Variable};
pub use granules::{read_granule_list, write_granule_list};
#[cfg(feature = "netcdf")]
pub use netcdf_io::open_netcdf;
pub use query::{
    BoundingBox, DEFAULT_PAGE_SIZE, QueryError, SearchQuery, TimeWindow, WindowUnit,
    parse_timestamp,
};
pub use reformat::{
    CANONICAL_ORDER, EASTING, NORTHING, ReformatPlan, TIME, decode_time, epoch_seconds_to_iso8601,
    epoch_to_iso8601, iso8601_to_epoch,
};
