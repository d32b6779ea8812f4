//! The remote object: the unit the access layer manages.

use crate::identity::{document_hash, new_remote_key, CONTENT_HASH_FIELD};
use crate::{AccessResult, ConfigError, RequestError, ResourceDescriptor};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One resource instance as known to this process.
///
/// An object starts with a descriptor and zero or more identifiers and is
/// populated exactly once, either from a server response ([`populate`]) or
/// from a body about to be sent ([`populate_raw_json`]). Later changes go
/// through a clone.
///
/// [`populate`]: RemoteObject::populate
/// [`populate_raw_json`]: RemoteObject::populate_raw_json
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    descriptor: Arc<ResourceDescriptor>,
    rest_key: Option<String>,
    logical_id: Option<String>,
    raw: Option<Map<String, Value>>,
    fields: Vec<String>,
    content_hash: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Render a key-like JSON scalar as a string.
pub fn key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RemoteObject {
    pub fn new(
        descriptor: Arc<ResourceDescriptor>,
        rest_key: Option<String>,
        logical_id: Option<String>,
    ) -> Self {
        Self {
            descriptor,
            rest_key: non_empty(rest_key),
            logical_id: non_empty(logical_id),
            raw: None,
            fields: Vec::new(),
            content_hash: None,
        }
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.descriptor
    }

    pub fn object_type(&self) -> &str {
        &self.descriptor.object_type
    }

    pub fn rest_key(&self) -> Option<&str> {
        self.rest_key.as_deref()
    }

    pub fn logical_id(&self) -> Option<&str> {
        self.logical_id.as_deref()
    }

    pub fn raw(&self) -> Option<&Map<String, Value>> {
        self.raw.as_ref()
    }

    /// Sorted names of the fields present in the document.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Content hash stored with the document, if any.
    pub fn content_hash(&self) -> Option<&str> {
        self.content_hash.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.raw.as_ref().and_then(|raw| raw.get(name))
    }

    pub fn is_populated(&self) -> bool {
        self.raw.is_some()
    }

    /// Key if known, else logical id; for log and error context.
    pub fn display_id(&self) -> &str {
        self.rest_key()
            .or_else(|| self.logical_id())
            .unwrap_or("<unidentified>")
    }

    pub fn with_rest_key(mut self, rest_key: impl Into<String>) -> Self {
        self.rest_key = non_empty(Some(rest_key.into()));
        self
    }

    pub fn with_logical_id(mut self, logical_id: impl Into<String>) -> Self {
        self.logical_id = non_empty(Some(logical_id.into()));
        self
    }

    /// Identifiers only, without document content.
    pub fn identity(&self) -> Self {
        Self::new(
            Arc::clone(&self.descriptor),
            self.rest_key.clone(),
            self.logical_id.clone(),
        )
    }

    /// Decode a server response body into a new populated object.
    pub fn populate(&self, body: &[u8]) -> AccessResult<RemoteObject> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| RequestError::InvalidResponse {
                object_type: self.object_type().to_string(),
                reason: format!("body is not JSON: {}", e),
            })?;
        match value {
            Value::Object(doc) => self.populate_document(doc),
            other => Err(RequestError::InvalidResponse {
                object_type: self.object_type().to_string(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }
            .into()),
        }
    }

    /// Populate from an already-decoded server document.
    ///
    /// Both the key field and the logical-id field must be present.
    pub fn populate_document(&self, doc: Map<String, Value>) -> AccessResult<RemoteObject> {
        let d = &self.descriptor;
        let rest_key = doc.get(&d.key_field).and_then(key_from_value).ok_or_else(|| {
            RequestError::MissingField {
                object_type: d.object_type.clone(),
                key: self.display_id().to_string(),
                field: d.key_field.clone(),
            }
        })?;
        let logical_id = doc
            .get(&d.logical_id_field)
            .and_then(key_from_value)
            .ok_or_else(|| RequestError::MissingField {
                object_type: d.object_type.clone(),
                key: rest_key.clone(),
                field: d.logical_id_field.clone(),
            })?;

        let content_hash = doc
            .get(CONTENT_HASH_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut fields: Vec<String> = doc.keys().cloned().collect();
        fields.sort();

        Ok(RemoteObject {
            descriptor: Arc::clone(&self.descriptor),
            rest_key: Some(rest_key),
            logical_id: Some(logical_id),
            raw: Some(doc),
            fields,
            content_hash,
        })
    }

    /// Set the document to send, stamping it with its content hash.
    ///
    /// Mints a remote key first when the descriptor requires client-side
    /// keys and none is known yet. Known identifiers are written into their
    /// fields when the body leaves them out.
    pub fn populate_raw_json(&mut self, mut body: Map<String, Value>) -> AccessResult<()> {
        let d = Arc::clone(&self.descriptor);

        if d.client_generated_key {
            if self.rest_key.is_none() {
                self.rest_key = body
                    .get(&d.key_field)
                    .and_then(key_from_value)
                    .or_else(|| self.logical_id.clone().filter(|_| d.logical_id_is_key()));
            }
            let key = self.rest_key.get_or_insert_with(new_remote_key).clone();
            body.insert(d.key_field.clone(), Value::String(key));
        }

        if let Some(logical_id) = &self.logical_id {
            if !body.contains_key(&d.logical_id_field) {
                body.insert(d.logical_id_field.clone(), Value::String(logical_id.clone()));
            }
        } else {
            self.logical_id = body.get(&d.logical_id_field).and_then(key_from_value);
        }

        let hash = content_hash_of(&d, &body);
        body.insert(CONTENT_HASH_FIELD.to_string(), Value::String(hash.clone()));

        let mut fields: Vec<String> = body.keys().cloned().collect();
        fields.sort();
        self.fields = fields;
        self.content_hash = Some(hash);
        self.raw = Some(body);
        Ok(())
    }

    /// Serialized document for a request body.
    pub fn to_body(&self) -> AccessResult<Vec<u8>> {
        let raw = self.raw.as_ref().ok_or_else(|| ConfigError::MissingRequired {
            field: format!("{} request body", self.object_type()),
        })?;
        serde_json::to_vec(raw).map_err(|e| {
            ConfigError::InvalidValue {
                field: "body".to_string(),
                value: self.display_id().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// The stored hash equals a fresh hash of the document.
    pub fn verify_content_hash(&self) -> bool {
        match (&self.raw, &self.content_hash) {
            (Some(raw), Some(stored)) => content_hash_of(&self.descriptor, raw) == *stored,
            _ => false,
        }
    }
}

/// Document hash without the key field, which the server may assign.
fn content_hash_of(descriptor: &ResourceDescriptor, doc: &Map<String, Value>) -> String {
    if doc.contains_key(&descriptor.key_field) {
        let mut content = doc.clone();
        content.remove(&descriptor.key_field);
        document_hash(&content)
    } else {
        document_hash(doc)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
