use std::future::Future;

use crate::error::RemoteError;
use crate::remote::Page;

/// Optional early stop for bounded scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCap {
    pub max_items: Option<usize>,
    pub max_pages: Option<usize>,
}

impl PageCap {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn items(max: usize) -> Self {
        Self {
            max_items: Some(max),
            max_pages: None,
        }
    }

    pub fn pages(max: usize) -> Self {
        Self {
            max_items: None,
            max_pages: Some(max),
        }
    }
}

/// Everything a paginated collection yielded, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub pages: usize,
    /// Items the server returned as null and that were dropped.
    pub holes: usize,
    /// True when the cap stopped the scan before the collection ran out.
    pub capped: bool,
}

/// Call `fetch` with each returned token until the collection is exhausted
/// or `cap` is reached.
pub async fn collect_pages<T, F, Fut>(mut fetch: F, cap: PageCap) -> Result<Collected<T>, RemoteError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, RemoteError>>,
{
    let mut collected = Collected {
        items: Vec::new(),
        pages: 0,
        holes: 0,
        capped: false,
    };
    let mut token: Option<String> = None;

    loop {
        let page = fetch(token.take()).await?;
        collected.pages += 1;

        for item in page.items {
            match item {
                Some(item) => collected.items.push(item),
                None => collected.holes += 1,
            }
        }

        let Some(next) = page.next_token.filter(|t| !t.is_empty()) else {
            break;
        };

        if let Some(max) = cap.max_items {
            if collected.items.len() >= max {
                collected.items.truncate(max);
                collected.capped = true;
                break;
            }
        }
        if let Some(max) = cap.max_pages {
            if collected.pages >= max {
                collected.capped = true;
                break;
            }
        }
        token = Some(next);
    }

    // The last page can overshoot the item cap even when no token follows.
    if let Some(max) = cap.max_items {
        if collected.items.len() > max {
            collected.items.truncate(max);
            collected.capped = true;
        }
    }

    if collected.holes > 0 {
        log::debug!("Dropped {} nulled item(s) across {} page(s)", collected.holes, collected.pages);
    }
    Ok(collected)
}
