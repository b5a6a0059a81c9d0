use anyhow::Result;
use snowdata::{BoundingBox, Client, SearchQuery, TimeWindow, WindowUnit, parse_timestamp};
use std::path::Path;

fn main() -> Result<()> {
    // ASTER L1T scenes over Grand Mesa, Colorado, within a day of the
    // 2020-02-08 SnowEx overflight. Downloads need Earthdata credentials
    // via env vars or ~/.netrc.
    let client = Client::from_env()?;

    let query = SearchQuery::new(
        "AST_L1T",
        "003",
        BoundingBox::new(-108.3, 38.9, -107.7, 39.2)?,
        parse_timestamp("2020-02-08T18:00:00Z")?,
        TimeWindow::new(1, WindowUnit::Days)?,
    )
    .with_extension(".hdf");

    let urls = client.search_to_file(&query, Path::new("aster_granules.txt"))?;
    println!("found {} granule(s)", urls.len());

    if client.has_credentials() {
        client.download_all(&urls, Path::new("data/aster"))?;
    }
    Ok(())
}
