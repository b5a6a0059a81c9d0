//! `snowdata` command line: search CMR, download granules, reformat NetCDF mosaics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use snowdata::{
    BoundingBox, Client, SearchQuery, TimeWindow, WindowUnit, parse_timestamp, write_netrc_entry,
};

#[derive(Parser, Debug)]
#[command(name = "snowdata")]
#[command(about = "Search, download and reformat Earthdata snow datasets")]
struct Args {
    /// CMR base URL
    #[arg(long, env = "EARTHDATA_CMR_URL", global = true)]
    cmr_url: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find granules and write their download URLs to a list file
    Search {
        /// Product short name, e.g. AST_L1T
        #[arg(long)]
        product: String,

        /// Product version, e.g. 003
        #[arg(long)]
        version: String,

        /// min-lon,min-lat,max-lon,max-lat
        #[arg(long, allow_hyphen_values = true)]
        bbox: BoundingBox,

        /// Reference time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        time: String,

        /// Half-width of the search window
        #[arg(long, default_value = "1")]
        window: u32,

        /// Window unit: seconds, minutes, hours, days or weeks
        #[arg(long, default_value = "days")]
        unit: WindowUnit,

        /// Keep only URLs with this extension, e.g. .hdf
        #[arg(long)]
        extension: Option<String>,

        /// Output list file
        #[arg(long, short, default_value = "granules.txt")]
        output: PathBuf,
    },

    /// Download every URL of a list file with Earthdata Login credentials
    Download {
        /// URL list produced by `search`
        #[arg(long)]
        list: PathBuf,

        /// Target directory
        #[arg(long, default_value = "data")]
        dir: PathBuf,

        /// Earthdata username
        #[arg(long, env = "EARTHDATA_USERNAME")]
        username: Option<String>,

        /// Earthdata password
        #[arg(long, env = "EARTHDATA_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Maximum attempts per request
        #[arg(long, default_value = "5")]
        max_retries: usize,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Store Earthdata Login credentials in a netrc file
    Login {
        /// Earthdata username
        #[arg(long, env = "EARTHDATA_USERNAME")]
        username: String,

        /// Earthdata password
        #[arg(long, env = "EARTHDATA_PASSWORD", hide_env_values = true)]
        password: String,

        /// netrc file to update (default: ~/.netrc)
        #[arg(long)]
        netrc: Option<PathBuf>,
    },

    /// Normalise NetCDF mosaics to (time, northing, easting) with a CRS and print a summary
    #[cfg(feature = "netcdf")]
    Reformat {
        /// NetCDF files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Source name of the easting dimension
        #[arg(long, default_value = "x")]
        x_dim: String,

        /// Source name of the northing dimension
        #[arg(long, default_value = "y")]
        y_dim: String,

        /// Source name of the time dimension
        #[arg(long, default_value = "time")]
        time_dim: String,

        /// Singleton dimension to drop from every variable
        #[arg(long)]
        squeeze: Option<String>,

        /// CRS to attach
        #[arg(long, default_value = "EPSG:32612")]
        crs: snowdata::Crs,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Search {
            product,
            version,
            bbox,
            time,
            window,
            unit,
            extension,
            output,
        } => {
            let mut query = SearchQuery::new(
                product,
                version,
                bbox,
                parse_timestamp(&time)?,
                TimeWindow::new(window, unit)?,
            );
            if let Some(ext) = extension {
                query = query.with_extension(ext);
            }

            let client = Client::new(args.cmr_url, None, None)?;
            let urls = client.search_to_file(&query, &output)?;
            println!("{} URL(s) written to {}", urls.len(), output.display());
        }
        Command::Download {
            list,
            dir,
            username,
            password,
            max_retries,
            no_progress,
        } => {
            let client = Client::new(args.cmr_url, username, password)?
                .with_retry_max(max_retries)
                .with_progress(!no_progress);
            let files = client.download_list(&list, &dir)?;
            println!("{} file(s) in {}", files.len(), dir.display());
        }
        Command::Login {
            username,
            password,
            netrc,
        } => {
            let path = match netrc {
                Some(p) => p,
                None => dirs::home_dir()
                    .map(|h| h.join(".netrc"))
                    .context("cannot locate home directory; pass --netrc")?,
            };
            write_netrc_entry(&path, &username, &password)?;
            println!("credentials for {} saved to {}", username, path.display());
        }
        #[cfg(feature = "netcdf")]
        Command::Reformat {
            files,
            x_dim,
            y_dim,
            time_dim,
            squeeze,
            crs,
        } => {
            for path in files {
                let mut ds = snowdata::open_netcdf(&path)?;
                let mut plan = snowdata::ReformatPlan::canonical(&x_dim, &y_dim, &time_dim)
                    .with_crs(crs.clone());
                if let Some(dim) = &squeeze {
                    let vars: Vec<String> = ds
                        .variables()
                        .filter(|(_, v)| v.dims().iter().any(|d| d == dim))
                        .map(|(name, _)| name.to_string())
                        .collect();
                    let vars: Vec<&str> = vars.iter().map(String::as_str).collect();
                    plan = plan.with_squeeze(dim, &vars);
                }
                plan.apply(&mut ds)?;
                println!("{}\n{}\n", path.display(), ds);
            }
        }
    }

    Ok(())
}
