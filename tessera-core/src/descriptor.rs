//! Resource descriptor table.
//!
//! Static REST routing facts per object type. The builtin table is built
//! once on first use and never mutated; custom tables can be assembled with
//! [`DescriptorTable::from_descriptors`].

use crate::{AccessResult, ConfigError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

/// Maximum number of items the server returns per listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSize {
    Bounded(usize),
    /// The endpoint returns every item in one response
    Unbounded,
}

impl PageSize {
    /// Items per request, or `None` when one request returns everything.
    /// A zero bound is treated as unbounded.
    pub fn limit(&self) -> Option<usize> {
        match self {
            PageSize::Bounded(n) if *n > 0 => Some(*n),
            _ => None,
        }
    }
}

/// REST routing facts for one object type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub object_type: String,
    /// First path segment of the resource URL
    pub interface: String,
    /// Field holding the remote key in documents
    pub key_field: String,
    /// Field holding the caller's logical id in documents
    pub logical_id_field: String,
    pub page_size: PageSize,
    /// The client must mint the remote key before create
    pub client_generated_key: bool,
    /// Listing honours the `filter` query parameter
    pub server_filtering: bool,
}

impl ResourceDescriptor {
    pub fn new(
        object_type: impl Into<String>,
        interface: impl Into<String>,
        key_field: impl Into<String>,
        logical_id_field: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            interface: interface.into(),
            key_field: key_field.into(),
            logical_id_field: logical_id_field.into(),
            page_size: PageSize::Bounded(100),
            client_generated_key: false,
            server_filtering: false,
        }
    }

    pub fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_client_generated_key(mut self, enabled: bool) -> Self {
        self.client_generated_key = enabled;
        self
    }

    pub fn with_server_filtering(mut self, enabled: bool) -> Self {
        self.server_filtering = enabled;
        self
    }

    /// The logical id and the remote key live in the same document field.
    pub fn logical_id_is_key(&self) -> bool {
        self.key_field == self.logical_id_field
    }

    /// `interface/object_type`, relative to the endpoint base URL.
    pub fn collection_path(&self) -> String {
        format!("{}/{}", self.interface, self.object_type)
    }
}

static BUILTIN: Lazy<Vec<ResourceDescriptor>> = Lazy::new(|| {
    vec![
        ResourceDescriptor::new("user", "access", "id", "username").with_server_filtering(true),
        ResourceDescriptor::new("role", "access", "id", "name").with_server_filtering(true),
        ResourceDescriptor::new("saved_search", "config", "id", "title")
            .with_page_size(PageSize::Bounded(50))
            .with_server_filtering(true),
        ResourceDescriptor::new("alert_rule", "config", "id", "name")
            .with_page_size(PageSize::Bounded(50)),
        ResourceDescriptor::new("lookup_table", "config", "name", "name")
            .with_page_size(PageSize::Unbounded),
        ResourceDescriptor::new("kv_collection", "storage", "_key", "_key")
            .with_page_size(PageSize::Unbounded)
            .with_client_generated_key(true),
        ResourceDescriptor::new("kv_record", "storage", "_key", "record_id")
            .with_page_size(PageSize::Bounded(1000))
            .with_client_generated_key(true)
            .with_server_filtering(true),
    ]
});

/// Lookup table from object-type name to descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorTable {
    by_type: HashMap<String, Arc<ResourceDescriptor>>,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DescriptorTable {
    /// The fixed table of object types known to this crate.
    pub fn builtin() -> Self {
        Self::from_descriptors(BUILTIN.iter().cloned())
    }

    /// Table of caller-supplied descriptors. Later duplicates win.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ResourceDescriptor>) -> Self {
        let by_type = descriptors
            .into_iter()
            .map(|d| (d.object_type.clone(), Arc::new(d)))
            .collect();
        Self { by_type }
    }

    pub fn get(&self, object_type: &str) -> AccessResult<Arc<ResourceDescriptor>> {
        self.by_type.get(object_type).cloned().ok_or_else(|| {
            ConfigError::UnknownObjectType {
                object_type: object_type.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, object_type: &str) -> bool {
        self.by_type.contains_key(object_type)
    }

    /// Registered object types, sorted.
    pub fn object_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_type.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
