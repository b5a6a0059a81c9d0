use anyhow::{Context, Result, anyhow, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue, LOCATION, RANGE, USER_AGENT};
use reqwest::{StatusCode, Url, redirect};
use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::cmr::{GranuleFeed, Page, collect_pages, granule_urls};
use crate::config::{EARTHDATA_LOGIN_HOST, load_config};
use crate::error::{CmrErrorResponse, format_cmr_error};
use crate::granules::{read_granule_list, write_granule_list};
use crate::query::SearchQuery;
use crate::util::{backoff, guess_filename_from_url, retriable_status};

const SEARCH_AFTER_HEADER: &str = "CMR-Search-After";
const HITS_HEADER: &str = "CMR-Hits";
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base CMR URL, typically `https://cmr.earthdata.nasa.gov`.
    pub cmr_url: String,
    /// Earthdata Login credentials. Searching works without them; downloading does not.
    pub credentials: Option<Credentials>,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    cmr_url: String,
    credentials: Option<Credentials>,
    login_url: Url,

    timeout: Duration,
    retry_max: usize,
    sleep_max: Duration,
    progress: bool,

    http: HttpClient,
}

impl Client {
    /// Creates a client using environment variables and/or a netrc file.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit arguments
    /// - environment variables `EARTHDATA_CMR_URL` / `EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD`
    /// - the `urs.earthdata.nasa.gov` entry of a netrc file (`EARTHDATA_NETRC`, `./.netrc`, `~/.netrc`)
    pub fn new(
        cmr_url: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let cfg = load_config(cmr_url, username, password)?;
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("snowdata/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("snowdata")),
        );

        // Redirects are followed by hand so credentials never leave the login host.
        let http = HttpClient::builder()
            .default_headers(default_headers)
            .redirect(redirect::Policy::none())
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;

        let login_url = Url::parse(&format!("https://{}/", EARTHDATA_LOGIN_HOST))
            .context("invalid Earthdata Login URL")?;

        Ok(Self {
            cmr_url: cfg.cmr_url,
            credentials: cfg.credentials,
            login_url,
            timeout: Duration::from_secs(60),
            retry_max: 5,
            sleep_max: Duration::from_secs(30),
            progress: true,
            http,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max.max(1);
        self
    }

    pub fn with_sleep_max(mut self, sleep_max: Duration) -> Self {
        self.sleep_max = sleep_max;
        self
    }

    /// Overrides the Earthdata Login origin (e.g. `https://uat.urs.earthdata.nasa.gov`).
    ///
    /// Credentials are only sent to URLs with exactly this scheme, host and port.
    pub fn with_login_url(mut self, login_url: &str) -> Result<Self> {
        self.login_url = Url::parse(login_url)
            .with_context(|| format!("invalid Earthdata Login URL {}", login_url))?;
        Ok(self)
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cmr_url(&self) -> &str {
        &self.cmr_url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Returns the download URLs of every granule matching `query`, in CMR order.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        let params = query.to_params()?;
        let url = format!("{}/search/granules.json", self.cmr_url.trim_end_matches('/'));
        log::info!(
            "searching CMR for {} v{} in [{}] around {}",
            query.product(),
            query.version(),
            query.bbox(),
            query.timestamp()
        );

        let entries = collect_pages(|token| self.search_page(&url, &params, token))?;
        for entry in &entries {
            log::trace!("granule {}", entry.title.as_deref().unwrap_or("(untitled)"));
        }
        let urls = granule_urls(&entries, query.extension());
        log::info!(
            "{} granule(s) matched, {} download URL(s)",
            entries.len(),
            urls.len()
        );
        Ok(urls)
    }

    /// Runs [`Client::search`] and writes the URLs to `output`, one per line.
    pub fn search_to_file(&self, query: &SearchQuery, output: &Path) -> Result<Vec<String>> {
        let urls = self.search(query)?;
        write_granule_list(output, &urls)?;
        log::info!("wrote {} URL(s) to {}", urls.len(), output.display());
        Ok(urls)
    }

    fn search_page(
        &self,
        url: &str,
        params: &[(&'static str, String)],
        search_after: Option<&str>,
    ) -> Result<Page> {
        let resp = self.robust_request(|| {
            let mut req = self.http.get(url).query(params).timeout(self.timeout);
            if let Some(token) = search_after {
                req = req.header(SEARCH_AFTER_HEADER, token);
            }
            req.send()
        })?;

        let status = resp.status();
        let next = header_str(&resp, SEARCH_AFTER_HEADER);
        if let Some(hits) = header_str(&resp, HITS_HEADER) {
            log::debug!("CMR reports {} hit(s)", hits);
        }
        let text = resp.text().unwrap_or_default();

        if !status.is_success() {
            if let Ok(err_json) = serde_json::from_str::<CmrErrorResponse>(&text) {
                return Err(format_cmr_error(status, url, &err_json));
            }
            bail!(
                "API request failed: HTTP {} for url ({})\n{}",
                status,
                url,
                text
            );
        }

        let entries = GranuleFeed::parse(&text)
            .with_context(|| format!("unexpected response from {} (status={})", url, status))?
            .into_entries();
        Ok(Page {
            entries,
            search_after: next,
        })
    }

    /// Downloads every URL in the list file at `list` into `dir`.
    pub fn download_list(&self, list: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
        let urls = read_granule_list(list)?;
        self.download_all(&urls, dir)
    }

    /// Downloads `urls` into `dir` one after another, stopping at the first failure.
    ///
    /// URLs that share a file name are saved under numbered names
    /// (`scene.hdf`, `scene-2.hdf`, ...) in list order.
    pub fn download_all(&self, urls: &[String], dir: &Path) -> Result<Vec<PathBuf>> {
        let names = local_names(urls);
        let mut out = Vec::with_capacity(urls.len());
        for (i, (url, name)) in urls.iter().zip(names).enumerate() {
            log::info!("[{}/{}] {}", i + 1, urls.len(), url);
            out.push(
                self.download_to(url, &dir.join(name))
                    .with_context(|| format!("failed to download {}", url))?,
            );
        }
        Ok(out)
    }

    /// Downloads one granule into `dir`, named after the last segment of its URL.
    pub fn download(&self, url: &str, dir: &Path) -> Result<PathBuf> {
        let name = guess_filename_from_url(url).unwrap_or_else(|| "download".into());
        self.download_to(url, &dir.join(name))
    }

    /// Downloads `url` to `target`.
    ///
    /// Bytes land in `<target>.part` until the transfer completes. A
    /// `<target>.part.url` marker records the source, and a partial file is
    /// only resumed when the marker names `url`. An existing `target` is
    /// treated as already downloaded.
    pub fn download_to(&self, url: &str, target: &Path) -> Result<PathBuf> {
        let creds = self.credentials.as_ref().ok_or_else(|| {
            anyhow!(
                "Earthdata credentials are required for downloads (set EARTHDATA_USERNAME/EARTHDATA_PASSWORD or add `machine {}` to ~/.netrc)",
                EARTHDATA_LOGIN_HOST
            )
        })?;

        if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        if target.exists() {
            log::info!("{} already downloaded", target.display());
            return Ok(target.to_path_buf());
        }

        let (part, marker) = partial_paths(target);
        let mut downloaded = resumable_len(&part, &marker, url)?;
        std::fs::write(&marker, url)
            .with_context(|| format!("failed to write {}", marker.display()))?;

        let mut pb: Option<ProgressBar> = None;
        let mut tries = 0usize;
        'download_attempt: while tries < self.retry_max {
            let mut headers = HeaderMap::new();
            if downloaded > 0 {
                headers.insert(RANGE, HeaderValue::from_str(&format!("bytes={}-", downloaded))?);
            }

            let resp = self.get_with_login(url, &headers, creds)?;
            if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE && downloaded > 0 {
                if content_range_total(&resp) == Some(downloaded) {
                    log::info!("{} already complete", part.display());
                    return finish_partial(&part, &marker, target);
                }
                log::warn!(
                    "{} does not match the remote size; restarting",
                    part.display()
                );
                downloaded = 0;
                tries += 1;
                continue;
            }
            if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
                bail!(
                    "Earthdata Login refused the credentials for {} (HTTP {})",
                    creds.username,
                    resp.status().as_u16()
                );
            }
            let mut resp = resp.error_for_status().context("download request failed")?;

            let resumed = resp.status() == StatusCode::PARTIAL_CONTENT;
            if !resumed && downloaded > 0 {
                log::warn!("server ignored range request; restarting {}", target.display());
                downloaded = 0;
            }
            let total = resp.content_length().map(|n| n + downloaded);

            let bar = pb.get_or_insert_with(|| self.progress_bar());
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(downloaded);

            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .append(resumed)
                .truncate(!resumed)
                .open(&part)
                .with_context(|| format!("failed to open {}", part.display()))?;

            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match resp.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Err(e).context("download interrupted");
                        }
                        log::warn!("download interrupted ({}); resuming", e);
                        out.flush().ok();
                        downloaded = std::fs::metadata(&part)?.len();
                        thread::sleep(backoff(Duration::from_secs(tries as u64), self.sleep_max));
                        continue 'download_attempt;
                    }
                };

                out.write_all(&buf[..n])
                    .with_context(|| format!("failed to write {}", part.display()))?;
                downloaded += n as u64;
                bar.inc(n as u64);
            }

            out.flush()?;

            if total.is_none_or(|t| downloaded >= t) {
                bar.finish_and_clear();
                return finish_partial(&part, &marker, target);
            }

            tries += 1;
            downloaded = std::fs::metadata(&part)?.len();
            thread::sleep(backoff(Duration::from_secs(tries as u64), self.sleep_max));
        }

        bail!("download failed: {} byte(s) written to {}", downloaded, part.display())
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        )
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let pb = ProgressBar::new(0);
        pb.set_style(style);
        pb
    }

    /// GET that walks the Earthdata Login redirect chain, sending basic auth only to the login host.
    fn get_with_login(&self, url: &str, headers: &HeaderMap, creds: &Credentials) -> Result<Response> {
        let mut current = Url::parse(url).with_context(|| format!("invalid URL {}", url))?;

        for _ in 0..MAX_REDIRECTS {
            let resp = self.robust_request(|| {
                let mut req = self
                    .http
                    .get(current.clone())
                    .headers(headers.clone())
                    .timeout(self.timeout);
                if sends_credentials(&current, &self.login_url) {
                    req = req.basic_auth(&creds.username, Some(&creds.password));
                }
                req.send()
            })?;

            if !resp.status().is_redirection() {
                return Ok(resp);
            }

            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| anyhow!("redirect without Location header from {}", current))?;
            let next = current
                .join(location)
                .with_context(|| format!("invalid redirect target {}", location))?;
            log::debug!("redirected to {}", next.host_str().unwrap_or("?"));
            current = next;
        }

        bail!("too many redirects while fetching {}", url)
    }

    fn robust_request<F>(&self, mut f: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        let mut sleep = Duration::from_secs(1);
        loop {
            match f() {
                Ok(resp) => {
                    if retriable_status(resp.status().as_u16()) {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Ok(resp);
                        }
                        log::warn!("HTTP {} from {}; retrying", resp.status(), resp.url());
                        thread::sleep(sleep.min(self.sleep_max));
                        sleep = backoff(sleep, self.sleep_max);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    tries += 1;
                    if tries >= self.retry_max {
                        return Err(err).context("could not connect");
                    }
                    // timeouts / transient connection errors
                    log::warn!("request failed ({}); retrying", err);
                    thread::sleep(sleep.min(self.sleep_max));
                    sleep = backoff(sleep, self.sleep_max);
                }
            }
        }
    }
}

fn sends_credentials(url: &Url, login_url: &Url) -> bool {
    url.origin() == login_url.origin()
}

/// Local file names for `urls`; repeated names get a `-2`, `-3`, ... suffix before the extension.
fn local_names(urls: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    urls.iter()
        .map(|url| {
            let base = guess_filename_from_url(url).unwrap_or_else(|| "download".into());
            let mut name = base.clone();
            let mut n = 1;
            while !used.insert(name.clone()) {
                n += 1;
                name = match base.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, n, ext),
                    _ => format!("{}-{}", base, n),
                };
            }
            name
        })
        .collect()
}

fn partial_paths(target: &Path) -> (PathBuf, PathBuf) {
    let mut part = target.as_os_str().to_owned();
    part.push(".part");
    let mut marker = part.clone();
    marker.push(".url");
    (PathBuf::from(part), PathBuf::from(marker))
}

/// Length of the partial file if it was started from `url`; otherwise removes it and returns 0.
fn resumable_len(part: &Path, marker: &Path, url: &str) -> Result<u64> {
    if !part.exists() {
        return Ok(0);
    }
    let owner = std::fs::read_to_string(marker).unwrap_or_default();
    if owner.trim() == url {
        return Ok(std::fs::metadata(part)?.len());
    }
    log::warn!("discarding {} left by another download", part.display());
    std::fs::remove_file(part).with_context(|| format!("failed to remove {}", part.display()))?;
    Ok(0)
}

fn finish_partial(part: &Path, marker: &Path, target: &Path) -> Result<PathBuf> {
    std::fs::rename(part, target)
        .with_context(|| format!("failed to move {} to {}", part.display(), target.display()))?;
    if let Err(e) = std::fs::remove_file(marker) {
        log::debug!("could not remove {}: {}", marker.display(), e);
    }
    Ok(target.to_path_buf())
}

/// Complete size from `Content-Range: bytes */<size>` (or `bytes a-b/<size>`).
fn content_range_total(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn header_str(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BoundingBox, TimeWindow, WindowUnit, parse_timestamp};
    use std::io::{BufRead, BufReader};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};

    fn config(credentials: Option<Credentials>) -> ClientConfig {
        ClientConfig {
            cmr_url: "https://cmr.example.test/".into(),
            credentials,
        }
    }

    #[test]
    fn credentials_only_go_to_login_host_over_https() {
        let login = Client::with_config(config(None)).unwrap().login_url;
        assert!(sends_credentials(
            &Url::parse("https://urs.earthdata.nasa.gov/oauth/authorize?client_id=x").unwrap(),
            &login
        ));
        assert!(!sends_credentials(
            &Url::parse("http://urs.earthdata.nasa.gov/oauth/authorize").unwrap(),
            &login
        ));
        assert!(!sends_credentials(
            &Url::parse("https://urs.earthdata.nasa.gov:8443/oauth/authorize").unwrap(),
            &login
        ));
        assert!(!sends_credentials(
            &Url::parse("https://e4ftl01.cr.usgs.gov/ASTT/a.hdf").unwrap(),
            &login
        ));
    }

    #[test]
    fn repeated_file_names_get_numbered() {
        let urls: Vec<String> = [
            "https://host/a/scene.hdf",
            "https://host/b/scene.hdf",
            "https://host/c/scene-2.hdf",
            "https://host/d/scene.hdf?v=2",
            "https://host/e/README",
            "https://host/f/README",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            local_names(&urls),
            [
                "scene.hdf",
                "scene-2.hdf",
                "scene-2-2.hdf",
                "scene-3.hdf",
                "README",
                "README-2",
            ]
        );
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = Credentials {
            username: "snow".into(),
            password: "s3cret".into(),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("snow"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn download_without_credentials_fails_before_any_request() {
        let client = Client::with_config(config(None)).unwrap().with_progress(false);
        assert!(!client.has_credentials());

        let dir = tempfile::tempdir().unwrap();
        let err = client
            .download("https://e4ftl01.cr.usgs.gov/ASTT/a.hdf", dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("credentials are required"));
        assert!(!dir.path().join("a.hdf").exists());
    }

    #[test]
    fn builder_options_apply() {
        let client = Client::with_config(config(None))
            .unwrap()
            .with_retry_max(0)
            .with_timeout(Duration::from_secs(5))
            .with_sleep_max(Duration::from_secs(2));
        assert_eq!(client.retry_max, 1);
        assert_eq!(client.timeout, Duration::from_secs(5));
        assert_eq!(client.sleep_max, Duration::from_secs(2));
        assert_eq!(client.cmr_url(), "https://cmr.example.test/");
    }

    // Minimal HTTP/1.1 server: one request per connection, `Connection: close` replies.

    struct Request {
        target: String,
        headers: Vec<(String, String)>,
    }

    impl Request {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        }
    }

    type Seen = Arc<Mutex<Vec<Request>>>;

    fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    fn read_request(stream: &TcpStream) -> Option<Request> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let target = line.split_whitespace().nth(1)?.to_string();
        let mut headers = Vec::new();
        loop {
            let mut h = String::new();
            reader.read_line(&mut h).ok()?;
            let h = h.trim_end();
            if h.is_empty() {
                break;
            }
            if let Some((k, v)) = h.split_once(':') {
                headers.push((k.trim().to_ascii_lowercase(), v.trim().to_string()));
            }
        }
        Some(Request { target, headers })
    }

    /// Answers each connection with `handler(request, number of earlier requests)`.
    fn serve<F>(listener: TcpListener, handler: F) -> Seen
    where
        F: Fn(&Request, usize) -> Vec<u8> + Send + 'static,
    {
        let seen: Seen = Arc::default();
        let log = Arc::clone(&seen);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let Some(req) = read_request(&stream) else {
                    continue;
                };
                let n = log.lock().unwrap().len();
                let bytes = handler(&req, n);
                log.lock().unwrap().push(req);
                let _ = stream.write_all(&bytes);
            }
        });
        seen
    }

    fn reply(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
        if !headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        for (k, v) in headers {
            head.push_str(&format!("{}: {}\r\n", k, v));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(body);
        out
    }

    /// Serves `body`, honouring `Range: bytes=N-`.
    fn ranged(body: &[u8], req: &Request) -> Vec<u8> {
        let Some(range) = req.header("range") else {
            return reply("200 OK", &[], body);
        };
        let start: usize = range
            .trim_start_matches("bytes=")
            .trim_end_matches('-')
            .parse()
            .unwrap();
        if start >= body.len() {
            let total = format!("bytes */{}", body.len());
            return reply(
                "416 Range Not Satisfiable",
                &[("Content-Range", total.as_str())],
                b"",
            );
        }
        let range = format!("bytes {}-{}/{}", start, body.len() - 1, body.len());
        reply("206 Partial Content", &[("Content-Range", range.as_str())], &body[start..])
    }

    fn stub_client(base: &str) -> Client {
        Client::with_config(ClientConfig {
            cmr_url: base.into(),
            credentials: Some(Credentials {
                username: "snow".into(),
                password: "s3cret".into(),
            }),
        })
        .unwrap()
        .with_retry_max(3)
        .with_sleep_max(Duration::ZERO)
        .with_progress(false)
    }

    fn grand_mesa_query() -> SearchQuery {
        SearchQuery::new(
            "AST_L1T",
            "003",
            BoundingBox::new(-108.3, 38.9, -107.7, 39.2).unwrap(),
            parse_timestamp("2020-02-08T18:00:00Z").unwrap(),
            TimeWindow::new(1, WindowUnit::Days).unwrap(),
        )
    }

    fn feed_with(href: &str) -> Vec<u8> {
        format!(
            r#"{{"feed": {{"entry": [{{"links": [{{"href": "{}", "rel": "http://esipfed.org/ns/fedsearch/1.1/data#"}}]}}]}}}}"#,
            href
        )
        .into_bytes()
    }

    #[test]
    fn search_to_file_pages_with_search_after_header() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, _| match req.header("cmr-search-after") {
            None => reply(
                "200 OK",
                &[("CMR-Search-After", "tok-1"), ("CMR-Hits", "2")],
                &feed_with("https://host/a/one.hdf"),
            ),
            Some(_) => reply("200 OK", &[], &feed_with("https://host/b/two.hdf")),
        });

        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("granules.txt");
        let urls = stub_client(&base)
            .search_to_file(&grand_mesa_query(), &list)
            .unwrap();
        assert_eq!(urls, ["https://host/a/one.hdf", "https://host/b/two.hdf"]);
        assert_eq!(read_granule_list(&list).unwrap(), urls);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].target.starts_with("/search/granules.json?"));
        assert!(seen[0].target.contains("short_name=AST_L1T"));
        assert_eq!(seen[0].header("cmr-search-after"), None);
        assert_eq!(seen[1].header("cmr-search-after"), Some("tok-1"));
        assert!(seen.iter().all(|r| r.header("authorization").is_none()));
    }

    #[test]
    fn search_turns_cmr_error_body_into_message() {
        let (listener, base) = listen();
        serve(listener, |_, _| {
            reply(
                "400 Bad Request",
                &[("Content-Type", "application/json")],
                br#"{"errors": ["Parameter [short_nam] was not recognized."]}"#,
            )
        });

        let err = stub_client(&base).search(&grand_mesa_query()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 400"));
        assert!(msg.contains("Parameter [short_nam] was not recognized."));
    }

    #[test]
    fn search_fails_on_non_json_error_after_retries() {
        let (listener, base) = listen();
        let seen = serve(listener, |_, _| {
            reply("500 Internal Server Error", &[], b"<html>oops</html>")
        });

        let err = stub_client(&base).search(&grand_mesa_query()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("API request failed: HTTP 500"));
        assert!(msg.contains("<html>oops</html>"));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn download_all_keeps_granules_sharing_a_file_name() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, _| match req.target.as_str() {
            "/a/scene.hdf" => reply("200 OK", &[], b"FIRST-GRANULE"),
            "/b/scene.hdf" => reply("200 OK", &[], b"SECOND"),
            _ => reply("404 Not Found", &[], b""),
        });

        let dir = tempfile::tempdir().unwrap();
        let client = stub_client(&base);
        let urls = vec![
            format!("{}/a/scene.hdf", base),
            format!("{}/b/scene.hdf", base),
        ];
        let paths = client.download_all(&urls, dir.path()).unwrap();
        assert_eq!(
            paths,
            [dir.path().join("scene.hdf"), dir.path().join("scene-2.hdf")]
        );
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"FIRST-GRANULE");
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"SECOND");
        assert!(seen.lock().unwrap().iter().all(|r| r.header("range").is_none()));

        // A second run finds both files complete and leaves them alone.
        let again = client.download_all(&urls, dir.path()).unwrap();
        assert_eq!(again, paths);
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"FIRST-GRANULE");
    }

    #[test]
    fn download_resumes_its_own_partial_file() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, _| ranged(b"FIRST-GRANULE", req));

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/a/scene.hdf", base);
        let (part, marker) = partial_paths(&dir.path().join("scene.hdf"));
        std::fs::write(&part, b"FIRST-").unwrap();
        std::fs::write(&marker, &url).unwrap();

        let path = stub_client(&base).download(&url, dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FIRST-GRANULE");
        assert_eq!(seen.lock().unwrap()[0].header("range"), Some("bytes=6-"));
        assert!(!part.exists());
        assert!(!marker.exists());
    }

    #[test]
    fn download_discards_partial_file_of_another_url() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, _| ranged(b"FIRST-GRANULE", req));

        let dir = tempfile::tempdir().unwrap();
        let (part, marker) = partial_paths(&dir.path().join("scene.hdf"));
        std::fs::write(&part, b"SECOND").unwrap();
        std::fs::write(&marker, format!("{}/b/scene.hdf", base)).unwrap();

        let path = stub_client(&base)
            .download(&format!("{}/a/scene.hdf", base), dir.path())
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FIRST-GRANULE");
        assert_eq!(seen.lock().unwrap()[0].header("range"), None);
    }

    #[test]
    fn download_restarts_when_server_ignores_range() {
        let (listener, base) = listen();
        let seen = serve(listener, |_, _| reply("200 OK", &[], b"FIRST-GRANULE"));

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/a/scene.hdf", base);
        let (part, marker) = partial_paths(&dir.path().join("scene.hdf"));
        std::fs::write(&part, b"XXXX").unwrap();
        std::fs::write(&marker, &url).unwrap();

        let path = stub_client(&base).download(&url, dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FIRST-GRANULE");
        assert_eq!(seen.lock().unwrap()[0].header("range"), Some("bytes=4-"));
    }

    #[test]
    fn range_not_satisfiable_with_matching_size_is_complete() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, _| ranged(b"FIRST-GRANULE", req));

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/a/scene.hdf", base);
        let (part, marker) = partial_paths(&dir.path().join("scene.hdf"));
        std::fs::write(&part, b"FIRST-GRANULE").unwrap();
        std::fs::write(&marker, &url).unwrap();

        let path = stub_client(&base).download(&url, dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FIRST-GRANULE");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn range_not_satisfiable_with_other_size_restarts() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, _| ranged(b"FIRST-GRANULE", req));

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/a/scene.hdf", base);
        let (part, marker) = partial_paths(&dir.path().join("scene.hdf"));
        std::fs::write(&part, b"STALE-CONTENT-THAT-IS-LONGER").unwrap();
        std::fs::write(&marker, &url).unwrap();

        let path = stub_client(&base).download(&url, dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FIRST-GRANULE");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].header("range"), Some("bytes=28-"));
        assert_eq!(seen[1].header("range"), None);
    }

    #[test]
    fn short_body_is_resumed_on_retry() {
        let (listener, base) = listen();
        let seen = serve(listener, |req, n| {
            if n == 0 {
                reply("200 OK", &[("Content-Length", "13")], b"FIRST-")
            } else {
                ranged(b"FIRST-GRANULE", req)
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let path = stub_client(&base)
            .download(&format!("{}/a/scene.hdf", base), dir.path())
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FIRST-GRANULE");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn login_redirect_chain_sends_credentials_only_to_login_host() {
        let (data_listener, data_base) = listen();
        let (login_listener, login_base) = listen();

        let authorize = format!("{}/oauth/authorize?client_id=x", login_base);
        let data_seen = serve(data_listener, move |req, _| {
            if req.target.ends_with("code=ok") {
                reply("200 OK", &[], b"GRANULE")
            } else {
                reply("302 Found", &[("Location", authorize.as_str())], b"")
            }
        });
        let back = format!("{}/a/scene.hdf?code=ok", data_base);
        let login_seen = serve(login_listener, move |req, _| {
            // base64("snow:s3cret")
            if req.header("authorization") == Some("Basic c25vdzpzM2NyZXQ=") {
                reply("302 Found", &[("Location", back.as_str())], b"")
            } else {
                reply("401 Unauthorized", &[], b"")
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/a/scene.hdf", data_base);
        let client = stub_client(&data_base).with_login_url(&login_base).unwrap();
        let path = client.download(&url, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("scene.hdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"GRANULE");

        {
            let data_seen = data_seen.lock().unwrap();
            assert_eq!(data_seen.len(), 2);
            assert!(data_seen.iter().all(|r| r.header("authorization").is_none()));
            assert_eq!(login_seen.lock().unwrap().len(), 1);
        }

        let wrong = Client::with_config(ClientConfig {
            cmr_url: data_base.clone(),
            credentials: Some(Credentials {
                username: "snow".into(),
                password: "wrong".into(),
            }),
        })
        .unwrap()
        .with_retry_max(1)
        .with_progress(false)
        .with_login_url(&login_base)
        .unwrap();
        let other = tempfile::tempdir().unwrap();
        let err = wrong.download(&url, other.path()).unwrap_err();
        assert!(err.to_string().contains("refused the credentials for snow"));
        assert!(!other.path().join("scene.hdf").exists());
    }
}
