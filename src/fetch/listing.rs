//! Marker-based pagination over store listings.

use std::future::Future;
use tracing::debug;

use super::store::{Container, Listed, ObjectStore, RemoteObject};
use crate::error::{Error, Result};

/// Largest page the store hands out per listing call.
pub const PAGE_LIMIT: usize = 10_000;

/// Upper bound on listing calls for one container.
pub const MAX_LIST_PAGES: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    pub page_limit: usize,
    pub max_pages: usize,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_limit: PAGE_LIMIT,
            max_pages: MAX_LIST_PAGES,
        }
    }
}

/// Drives `fetch_page` until a short page comes back.
///
/// A full page means more may follow, so the next request continues after
/// the last name seen. Fails when `max_pages` is exceeded or a full page
/// does not advance past the marker.
pub async fn paginate<T, F, Fut>(
    what: &str,
    options: ListingOptions,
    mut fetch_page: F,
) -> Result<Vec<T>>
where
    T: Listed,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut seed: Vec<T> = Vec::new();
    let mut marker: Option<String> = None;

    for page_no in 1..=options.max_pages {
        let page = fetch_page(marker.clone()).await?;
        let page_len = page.len();
        debug!(listing = what, page = page_no, entries = page_len, "Listing page received");
        seed.extend(page);

        if page_len < options.page_limit {
            return Ok(seed);
        }

        let last = seed.last().map(|entry| entry.name().to_string());
        if last.is_none() || last == marker {
            return Err(Error::Listing {
                container: what.to_string(),
                reason: format!("page {page_no} did not advance past marker {marker:?}"),
            });
        }
        marker = last;
    }

    Err(Error::Listing {
        container: what.to_string(),
        reason: format!("still receiving full pages after {} requests", options.max_pages),
    })
}

/// Lists every container on the account.
pub async fn list_all_containers<S: ObjectStore + ?Sized>(
    store: &S,
    options: ListingOptions,
) -> Result<Vec<Container>> {
    paginate("<account>", options, |marker| async move {
        store
            .list_containers(marker.as_deref(), options.page_limit)
            .await
    })
    .await
}

/// Lists every object in `container`.
pub async fn list_all_objects<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
    options: ListingOptions,
) -> Result<Vec<RemoteObject>> {
    paginate(container, options, |marker| async move {
        store
            .list_objects(container, marker.as_deref(), options.page_limit)
            .await
    })
    .await
}
