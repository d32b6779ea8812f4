//! Paginated listing.

use crate::client::ResourceClient;
use futures_util::stream::{self, Stream};
use std::collections::VecDeque;
use tessera_core::{AccessResult, OpContext, RemoteObject};

/// Listing parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageParams {
    /// Index of the first item to return
    pub offset: usize,
    /// Items per request; capped at the descriptor's page size
    pub count: Option<usize>,
    /// Restrict documents to these fields (key and logical id are always added)
    pub fields: Vec<String>,
    /// Server-side filter expression, passed through verbatim
    pub filter: Option<String>,
}

impl PageParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Lazy page-by-page listing of one object type.
///
/// Finite and single-use: it stops after a short page or the first error,
/// and a new pager is needed to scan again.
#[derive(Debug)]
pub struct Pager {
    client: ResourceClient,
    params: PageParams,
    page_size: Option<usize>,
    next_offset: usize,
    done: bool,
}

impl Pager {
    pub(crate) fn new(client: ResourceClient, params: PageParams) -> Self {
        let limit = client.object().descriptor().page_size.limit();
        // A page size of zero would never advance the offset.
        let page_size = match (params.count.filter(|c| *c > 0), limit) {
            (Some(count), Some(max)) => Some(count.min(max)),
            (Some(count), None) => Some(count),
            (None, max) => max,
        };
        Self {
            next_offset: params.offset,
            client,
            params,
            page_size,
            done: false,
        }
    }

    /// Items requested per page, or `None` when one request returns all.
    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page; `None` once the listing is exhausted.
    pub async fn next_page(&mut self, ctx: &OpContext) -> Option<AccessResult<Vec<RemoteObject>>> {
        if self.done {
            return None;
        }
        let result = self
            .client
            .list_page(ctx, &self.params, self.next_offset, self.page_size)
            .await;
        match &result {
            Ok(items) => match self.page_size {
                Some(size) if items.len() >= size => self.next_offset += size,
                _ => self.done = true,
            },
            Err(_) => self.done = true,
        }
        Some(result)
    }

    /// Drain the remaining pages.
    pub async fn collect(mut self, ctx: &OpContext) -> AccessResult<Vec<RemoteObject>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page(ctx).await {
            all.extend(page?);
        }
        Ok(all)
    }

    /// Item-by-item stream over the remaining pages.
    pub fn into_stream(self, ctx: OpContext) -> impl Stream<Item = AccessResult<RemoteObject>> {
        stream::unfold(
            (self, VecDeque::new(), ctx),
            |(mut pager, mut buffered, ctx)| async move {
                loop {
                    if let Some(item) = buffered.pop_front() {
                        return Some((Ok(item), (pager, buffered, ctx)));
                    }
                    match pager.next_page(&ctx).await? {
                        Ok(page) => buffered.extend(page),
                        Err(e) => return Some((Err(e), (pager, buffered, ctx))),
                    }
                }
            },
        )
    }
}
