use anyhow::anyhow;
use reqwest::StatusCode;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct CmrErrorResponse {
    #[serde(default)]
    pub(crate) errors: Vec<String>,
}

pub(crate) fn format_cmr_error(status: StatusCode, url: &str, e: &CmrErrorResponse) -> anyhow::Error {
    let messages = if e.errors.is_empty() {
        "(no message)".to_string()
    } else {
        e.errors.join("\n- ")
    };

    if status == StatusCode::BAD_REQUEST {
        return anyhow!(
            "CMR rejected the granule query (HTTP 400).\n- Check the product short name and version\n- Check that the bounding box is min-lon,min-lat,max-lon,max-lat\n\nServer message:\n- {}\nrequest: {}",
            messages,
            url
        );
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return anyhow!(
            "Earthdata authentication failed (HTTP {}).\n- Check EARTHDATA_USERNAME / EARTHDATA_PASSWORD or the `machine urs.earthdata.nasa.gov` entry in ~/.netrc\n- Some collections require approving the data provider's application in your Earthdata profile\n\nServer message:\n- {}\nrequest: {}",
            status.as_u16(),
            messages,
            url
        );
    }

    anyhow!(
        "API request failed: HTTP {} for url ({})\n- {}",
        status.as_u16(),
        url,
        messages
    )
}
