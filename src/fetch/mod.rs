// src/fetch/mod.rs

use crate::error::LoaderError;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// The publication page for the current release.
pub const STATISTICS_PAGE_URL: &str =
    "https://www.gov.uk/government/statistics/english-indices-of-deprivation-2025";

/// Attachment hrefs on the page are relative `/media/...` paths served from
/// the assets host.
const ASSETS_BASE_URL: &str = "https://assets.publishing.service.gov.uk";

/// Extract spreadsheet attachment URLs from the statistics page HTML.
///
/// Keeps `.xlsx` links only; relative `/media/...` hrefs are joined onto the
/// assets host, absolute links pass through, anything else is dropped.
pub fn attachment_links(html: &str) -> Vec<Url> {
    let selector = Selector::parse("section.gem-c-attachment a.govuk-link")
        .expect("attachment selector should parse");

    Html::parse_document(html)
        .select(&selector)
        .filter_map(|elem| elem.value().attr("href"))
        .filter(|href| href.ends_with(".xlsx"))
        .filter_map(|href| {
            if href.starts_with("/media/") {
                Url::parse(ASSETS_BASE_URL).ok()?.join(href).ok()
            } else {
                Url::parse(href).ok()
            }
        })
        .collect()
}

/// Fetch the statistics page and return the first spreadsheet attachment.
pub fn resolve_download_url(client: &Client, page_url: &str) -> Result<Url, LoaderError> {
    debug!(url = page_url, "resolving download link");
    let html = client
        .get(page_url)
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.text())
        .map_err(|source| LoaderError::Network {
            url: page_url.to_string(),
            source,
        })?;

    attachment_links(&html)
        .into_iter()
        .next()
        .ok_or_else(|| LoaderError::NoAttachment {
            url: page_url.to_string(),
        })
}

/// Pick the download URL: an explicit override wins, otherwise the page is
/// scraped for its first spreadsheet attachment.
pub fn resolve(
    client: &Client,
    url_override: Option<&str>,
    page_url: &str,
) -> Result<Url, LoaderError> {
    match url_override {
        Some(raw) => Url::parse(raw).map_err(|source| LoaderError::InvalidUrl {
            url: raw.to_string(),
            source,
        }),
        None => resolve_download_url(client, page_url),
    }
}

/// True when `dest` already holds a non-empty file.
pub fn is_cached(dest: &Path) -> bool {
    fs::metadata(dest)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Download `url` to `dest`, creating parent directories as needed.
/// Guarantees a non-empty file on success.
pub fn download(client: &Client, url: &Url, dest: &Path) -> Result<PathBuf, LoaderError> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| LoaderError::FileSystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    debug!(%url, "downloading");
    let bytes = client
        .get(url.clone())
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.bytes())
        .map_err(|source| LoaderError::Network {
            url: url.to_string(),
            source,
        })?;

    if bytes.is_empty() {
        return Err(LoaderError::EmptyDownload {
            url: url.to_string(),
        });
    }

    // Written under a temp name first so an interrupted download never
    // satisfies the cache check.
    let part = dest.with_extension("part");
    fs::write(&part, &bytes).map_err(|source| LoaderError::FileSystem {
        path: part.clone(),
        source,
    })?;
    fs::rename(&part, dest).map_err(|source| LoaderError::FileSystem {
        path: dest.to_path_buf(),
        source,
    })?;

    info!(file = %dest.display(), bytes = bytes.len(), "downloaded");
    Ok(dest.to_path_buf())
}

/// Ensure the spreadsheet is present at `dest`, downloading it if missing.
///
/// Returns the local path and whether the cached copy was reused. On a cache
/// hit no network traffic happens at all, page resolution included.
pub fn fetch_spreadsheet(
    client: &Client,
    url_override: Option<&str>,
    page_url: &str,
    dest: &Path,
) -> Result<(PathBuf, bool), LoaderError> {
    if is_cached(dest) {
        debug!(file = %dest.display(), "cache hit, skipping download");
        return Ok((dest.to_path_buf(), true));
    }
    let url = resolve(client, url_override, page_url)?;
    let path = download(client, &url, dest)?;
    Ok((path, false))
}
