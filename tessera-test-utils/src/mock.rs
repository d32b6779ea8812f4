//! In-memory REST server implementing [`Transport`].
//!
//! Collections are registered from resource descriptors and addressed as
//! `.../{interface}/{object_type}[/{key}]`, whatever prefix precedes them.
//! Listing honours `offset`, `count`, `fields` and `filter=field=value`
//! (results are ordered by key). Faults, lagging reads and latency can be
//! scripted per test.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tessera_core::{
    key_from_value, DescriptorTable, HttpRequest, HttpResponse, Method, ResourceDescriptor,
    Transport, TransportError,
};

/// A scripted failure for the next request of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this status without touching the store
    Status(u16),
    /// Fail before any status is produced
    Transport,
    /// Apply the request, then answer with this status
    AppliedThen(u16),
}

#[derive(Debug, Default)]
struct Collection {
    key_field: String,
    docs: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug, Default)]
struct MockState {
    collections: HashMap<String, Collection>,
    faults: HashMap<Method, VecDeque<Fault>>,
    calls: HashMap<Method, usize>,
    requests: Vec<(Method, String)>,
    /// Item path -> (reads left, document readers still see)
    stale: HashMap<String, (u32, Option<Map<String, Value>>)>,
    read_lag: u32,
    delete_lag: u32,
    next_id: u64,
}

/// Mock remote object store.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    latency: Mutex<Duration>,
}

enum Route {
    Collection(String),
    Item(String, String),
}

fn json_response(status: u16, value: &Value) -> HttpResponse {
    HttpResponse::new(status, serde_json::to_vec(value).unwrap_or_default())
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock with a collection for every descriptor in `table`.
    pub fn for_table(table: &DescriptorTable) -> Self {
        let mock = Self::new();
        for object_type in table.object_types() {
            if let Ok(descriptor) = table.get(object_type) {
                mock.register(&descriptor);
            }
        }
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // Test helper: a poisoned mock means a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, descriptor: &ResourceDescriptor) {
        self.lock()
            .collections
            .entry(descriptor.collection_path())
            .or_insert_with(|| Collection {
                key_field: descriptor.key_field.clone(),
                docs: BTreeMap::new(),
            });
    }

    /// Store `doc` directly, bypassing faults and counters.
    pub fn insert(&self, collection: &str, doc: Value) {
        let mut state = self.lock();
        let Some(coll) = state.collections.get_mut(collection) else {
            panic!("collection {} is not registered", collection);
        };
        let Value::Object(doc) = doc else {
            panic!("documents must be JSON objects");
        };
        let key = doc
            .get(&coll.key_field)
            .and_then(key_from_value)
            .unwrap_or_else(|| panic!("document lacks {}", coll.key_field));
        coll.docs.insert(key, doc);
    }

    /// The stored document, as the store itself sees it.
    pub fn document(&self, collection: &str, key: &str) -> Option<Map<String, Value>> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(key).cloned())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.docs.len())
    }

    /// Queue `fault` for the next `times` requests with `method`.
    pub fn fail_next(&self, method: Method, fault: Fault, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(method).or_default();
        for _ in 0..times {
            queue.push_back(fault.clone());
        }
    }

    /// After each PUT, item GETs return the previous document `reads` times.
    pub fn set_read_lag(&self, reads: u32) {
        self.lock().read_lag = reads;
    }

    /// After each DELETE, item GETs still return the document `reads` times.
    pub fn set_delete_lag(&self, reads: u32) {
        self.lock().delete_lag = reads;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Requests received with `method`, faults included.
    pub fn calls(&self, method: Method) -> usize {
        self.lock().calls.get(&method).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.lock().requests.clone()
    }

    fn route(state: &MockState, url: &Url) -> Option<Route> {
        let segments: Vec<String> = url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .map(decode_segment)
            .collect();
        let joined = |parts: &[String]| parts.join("/");
        for path in state.collections.keys() {
            let depth = path.split('/').count();
            if segments.len() >= depth && joined(&segments[segments.len() - depth..]) == *path {
                return Some(Route::Collection(path.clone()));
            }
            if segments.len() > depth {
                let parent = &segments[..segments.len() - 1];
                if joined(&parent[parent.len() - depth..]) == *path {
                    let key = segments.last().cloned().unwrap_or_default();
                    return Some(Route::Item(path.clone(), key));
                }
            }
        }
        None
    }

    fn handle(state: &mut MockState, request: &HttpRequest) -> HttpResponse {
        let Ok(url) = Url::parse(&request.url) else {
            return HttpResponse::new(400, "bad url");
        };
        let Some(route) = Self::route(state, &url) else {
            return HttpResponse::new(404, "no such collection");
        };
        let body: Option<Map<String, Value>> = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice::<Value>(b).ok())
            .and_then(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            });

        match (request.method, route) {
            (Method::Get, Route::Collection(path)) => Self::list(state, &path, &url),
            (Method::Get, Route::Item(path, key)) => {
                let item = format!("{}/{}", path, key);
                if let Some((left, seen)) = state.stale.get_mut(&item) {
                    if *left > 0 {
                        *left -= 1;
                        return match seen {
                            Some(doc) => json_response(200, &Value::Object(doc.clone())),
                            None => HttpResponse::empty(404),
                        };
                    }
                }
                match state.collections.get(&path).and_then(|c| c.docs.get(&key)) {
                    Some(doc) => json_response(200, &Value::Object(doc.clone())),
                    None => HttpResponse::new(404, "not found"),
                }
            }
            (Method::Post, Route::Collection(path)) => {
                let Some(mut doc) = body else {
                    return HttpResponse::new(400, "body must be a JSON object");
                };
                state.next_id += 1;
                let next_id = state.next_id;
                let Some(coll) = state.collections.get_mut(&path) else {
                    return HttpResponse::new(404, "no such collection");
                };
                let key = doc
                    .get(&coll.key_field)
                    .and_then(key_from_value)
                    .unwrap_or_else(|| next_id.to_string());
                if coll.docs.contains_key(&key) {
                    return HttpResponse::new(409, format!("{} already exists", key));
                }
                doc.insert(coll.key_field.clone(), Value::String(key.clone()));
                coll.docs.insert(key, doc.clone());
                json_response(201, &Value::Object(doc))
            }
            (Method::Put, Route::Item(path, key)) => {
                let Some(mut doc) = body else {
                    return HttpResponse::new(400, "body must be a JSON object");
                };
                let read_lag = state.read_lag;
                let Some(coll) = state.collections.get_mut(&path) else {
                    return HttpResponse::new(404, "no such collection");
                };
                let Some(previous) = coll.docs.get(&key).cloned() else {
                    return HttpResponse::new(404, "not found");
                };
                doc.insert(coll.key_field.clone(), Value::String(key.clone()));
                coll.docs.insert(key.clone(), doc.clone());
                if read_lag > 0 {
                    state
                        .stale
                        .insert(format!("{}/{}", path, key), (read_lag, Some(previous)));
                }
                json_response(200, &Value::Object(doc))
            }
            (Method::Delete, Route::Item(path, key)) => {
                let delete_lag = state.delete_lag;
                let Some(coll) = state.collections.get_mut(&path) else {
                    return HttpResponse::new(404, "no such collection");
                };
                let Some(previous) = coll.docs.remove(&key) else {
                    return HttpResponse::new(404, "not found");
                };
                if delete_lag > 0 {
                    state
                        .stale
                        .insert(format!("{}/{}", path, key), (delete_lag, Some(previous)));
                }
                HttpResponse::new(200, "")
            }
            _ => HttpResponse::new(405, "method not allowed"),
        }
    }

    fn list(state: &MockState, path: &str, url: &Url) -> HttpResponse {
        let Some(coll) = state.collections.get(path) else {
            return HttpResponse::new(404, "no such collection");
        };
        let mut offset = 0usize;
        let mut count: Option<usize> = None;
        let mut fields: Option<Vec<String>> = None;
        let mut filter: Option<(String, String)> = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "offset" => offset = value.parse().unwrap_or(0),
                "count" => count = value.parse().ok(),
                "fields" => fields = Some(value.split(',').map(str::to_string).collect()),
                "filter" => {
                    filter = value
                        .split_once('=')
                        .map(|(f, v)| (f.to_string(), v.to_string()))
                }
                _ => {}
            }
        }

        let page: Vec<Value> = coll
            .docs
            .values()
            .filter(|doc| match &filter {
                Some((field, wanted)) => {
                    doc.get(field).and_then(key_from_value).as_deref() == Some(wanted.as_str())
                }
                None => true,
            })
            .skip(offset)
            .take(count.unwrap_or(usize::MAX))
            .map(|doc| match &fields {
                Some(fields) => Value::Object(
                    doc.iter()
                        .filter(|(k, _)| fields.contains(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                ),
                None => Value::Object(doc.clone()),
            })
            .collect();
        json_response(200, &Value::Array(page))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        *state.calls.entry(request.method).or_default() += 1;
        state.requests.push((request.method, request.url.clone()));

        let fault = state
            .faults
            .get_mut(&request.method)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Status(status)) => Ok(HttpResponse::new(status, "injected fault")),
            Some(Fault::Transport) => Err(TransportError::new("injected transport failure")),
            Some(Fault::AppliedThen(status)) => {
                Self::handle(&mut state, &request);
                Ok(HttpResponse::new(status, "injected fault after apply"))
            }
            None => Ok(Self::handle(&mut state, &request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mock() -> MockTransport {
        MockTransport::for_table(&DescriptorTable::builtin())
    }

    async fn send(mock: &MockTransport, method: Method, url: &str, body: Option<Value>) -> HttpResponse {
        let mut request = HttpRequest::new(method, url);
        if let Some(body) = body {
            request = request.with_body(serde_json::to_vec(&body).expect("json"));
        }
        mock.send(request).await.expect("no transport fault")
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let mock = mock();
        let base = "https://m:1/svc/access/role";

        let created = send(&mock, Method::Post, base, Some(json!({"name": "ops"}))).await;
        assert_eq!(created.status, 201);
        let key = serde_json::from_slice::<Value>(&created.body).expect("json")["id"]
            .as_str()
            .expect("assigned key")
            .to_string();

        let url = format!("{}/{}", base, key);
        assert_eq!(send(&mock, Method::Get, &url, None).await.status, 200);
        assert_eq!(
            send(&mock, Method::Put, &url, Some(json!({"name": "ops2"}))).await.status,
            200
        );
        assert_eq!(mock.document("access/role", &key).expect("doc")["name"], "ops2");
        assert_eq!(send(&mock, Method::Delete, &url, None).await.status, 200);
        assert_eq!(send(&mock, Method::Get, &url, None).await.status, 404);
        assert_eq!(send(&mock, Method::Delete, &url, None).await.status, 404);
    }

    #[tokio::test]
    async fn test_listing_pages_and_filters() {
        let mock = mock();
        for i in 0..5 {
            mock.insert("access/role", json!({"id": format!("r{}", i), "name": format!("n{}", i % 2)}));
        }
        let page = send(&mock, Method::Get, "https://m:1/access/role?offset=1&count=2", None).await;
        let items: Vec<Value> = serde_json::from_slice(&page.body).expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], "r1");

        let filtered = send(&mock, Method::Get, "https://m:1/access/role?filter=name%3Dn1", None).await;
        let items: Vec<Value> = serde_json::from_slice(&filtered.body).expect("array");
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_faults_and_counters() {
        let mock = mock();
        mock.fail_next(Method::Get, Fault::Status(503), 1);
        let url = "https://m:1/access/role/x";
        assert_eq!(send(&mock, Method::Get, url, None).await.status, 503);
        assert_eq!(send(&mock, Method::Get, url, None).await.status, 404);
        assert_eq!(mock.calls(Method::Get), 2);

        mock.fail_next(Method::Post, Fault::AppliedThen(502), 1);
        let post = send(&mock, Method::Post, "https://m:1/access/role", Some(json!({"id": "a", "name": "a"}))).await;
        assert_eq!(post.status, 502);
        assert_eq!(mock.len("access/role"), 1);
    }

    #[tokio::test]
    async fn test_escaped_keys_are_routed() {
        let mock = mock();
        mock.insert("access/role", json!({"id": "a b/c", "name": "odd"}));
        let found = send(&mock, Method::Get, "https://m:1/access/role/a%20b%2Fc", None).await;
        assert_eq!(found.status, 200);
    }
}
