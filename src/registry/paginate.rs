//! Cursor-following pagination for registry listing APIs

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{Result, TransferError};
use crate::registry::catalog::Listing;
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::collections::HashSet;
use url::Url;

/// Upper bound on pages fetched for a single listing
pub const MAX_PAGES: usize = 1000;

/// One decoded page and the cursor to the next one
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Fetches pages with a fixed header set until the cursor runs out.
/// A failure on any page ends the listing with the items gathered so far.
pub struct Paginator<'a> {
    client: &'a Client,
    headers: HeaderMap,
    operation: String,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a Client, headers: HeaderMap, operation: impl Into<String>) -> Self {
        Self {
            client,
            headers,
            operation: operation.into(),
        }
    }

    pub async fn collect<T, F>(&self, first_url: &str, parse: F) -> Listing<T>
    where
        F: Fn(&HeaderMap, &[u8]) -> Result<Page<T>>,
    {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first_url.to_string());

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                return Listing::partial(
                    items,
                    TransferError::RemoteApi(format!(
                        "{}: next page points back to {}",
                        self.operation, url
                    )),
                );
            }
            if visited.len() > MAX_PAGES {
                return Listing::partial(
                    items,
                    TransferError::RemoteApi(format!(
                        "{}: more than {} pages",
                        self.operation, MAX_PAGES
                    )),
                );
            }

            tracing::debug!(url = %url, operation = %self.operation, "fetching page");
            match self.fetch(&url, &parse).await {
                Ok(page) => {
                    items.extend(page.items);
                    next = match page.next.map(|n| resolve(&url, &n)).transpose() {
                        Ok(next) => next,
                        Err(err) => return Listing::partial(items, err),
                    };
                }
                Err(err) => return Listing::partial(items, err),
            }
        }

        Listing::complete(items)
    }

    async fn fetch<T, F>(&self, url: &str, parse: &F) -> Result<Page<T>>
    where
        F: Fn(&HeaderMap, &[u8]) -> Result<Page<T>>,
    {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, &self.operation))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &text,
                &self.operation,
            ));
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, &self.operation))?;

        parse(&headers, &body)
    }
}

/// Cursor links may be relative to the page that carried them
fn resolve(current: &str, next: &str) -> Result<String> {
    let base = Url::parse(current)?;
    Ok(base.join(next)?.to_string())
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header
pub fn link_next(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    value.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim().replace(' ', "");
            param == "rel=\"next\"" || param == "rel=next"
        });
        if is_next && target.starts_with('<') && target.ends_with('>') {
            Some(target[1..target.len() - 1].to_string())
        } else {
            None
        }
    })
}
