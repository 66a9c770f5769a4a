//! Shared fakes for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use d2_engine::{
    CategoryDimension, DeletionKey, DimensionResolver, Error, FetchQuery, FetchedPage,
    ImportConflict, ImportSummary, LocalStore, MemoryStore, Record, RemoteApi, ResourceType,
    Result, SyncState, Uid,
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Mutex;

pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
}

pub fn event(uid: &str, parent: Option<&str>, state: SyncState) -> Record {
    let mut record = Record::new_remote(
        uid,
        ResourceType::Event,
        parent.map(String::from),
        json!({"program": "lxAQ7Zs9VYR"}),
        ts(1),
    );
    record.state = state;
    record
}

pub fn remote_events(prefix: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| event(&format!("{prefix}-{i:04}"), None, SyncState::Synced))
        .collect()
}

type Combination = (Option<Uid>, Option<Uid>);

/// A scripted server.
///
/// Downloads serve fixed item lists per (org unit, program) combination;
/// uploads answer with a preset import summary; deletions fail for the uids
/// registered with [`MockApi::fail_delete`].
#[derive(Default)]
pub struct MockApi {
    datasets: Mutex<HashMap<Combination, Vec<Record>>>,
    failing: Mutex<HashMap<Combination, (usize, Error)>>,
    requests: Mutex<Vec<FetchQuery>>,
    submit_response: Mutex<Option<Result<ImportSummary>>>,
    submitted: Mutex<Vec<Record>>,
    on_submit: Mutex<Option<Box<dyn FnMut()>>>,
    delete_failures: Mutex<HashMap<Uid, Error>>,
    deleted: Mutex<Vec<DeletionKey>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, org_unit: Option<&str>, program: Option<&str>, items: Vec<Record>) {
        self.datasets
            .lock()
            .unwrap()
            .insert((org_unit.map(String::from), program.map(String::from)), items);
    }

    pub fn fail_fetch(&self, org_unit: Option<&str>, program: Option<&str>, error: Error) {
        self.fail_from_page(org_unit, program, 1, error);
    }

    /// Serve pages before `page` normally, then fail every request.
    pub fn fail_from_page(
        &self,
        org_unit: Option<&str>,
        program: Option<&str>,
        page: usize,
        error: Error,
    ) {
        self.failing
            .lock()
            .unwrap()
            .insert((org_unit.map(String::from), program.map(String::from)), (page, error));
    }

    pub fn respond(&self, response: Result<ImportSummary>) {
        *self.submit_response.lock().unwrap() = Some(response);
    }

    /// Run `hook` while the batch request is in flight.
    pub fn on_submit(&self, hook: impl FnMut() + 'static) {
        *self.on_submit.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn fail_delete(&self, uid: &str, error: Error) {
        self.delete_failures.lock().unwrap().insert(uid.to_string(), error);
    }

    pub fn requests(&self) -> Vec<FetchQuery> {
        self.requests.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<Record> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<DeletionKey> {
        self.deleted.lock().unwrap().clone()
    }
}

impl RemoteApi for MockApi {
    fn fetch_page(&self, query: &FetchQuery) -> Result<FetchedPage> {
        self.requests.lock().unwrap().push(query.clone());

        let key = (query.org_unit.clone(), query.program.clone());
        if let Some((from_page, err)) = self.failing.lock().unwrap().get(&key) {
            if query.page >= *from_page {
                return Err(err.clone());
            }
        }

        let datasets = self.datasets.lock().unwrap();
        let items = datasets.get(&key).map(Vec::as_slice).unwrap_or_default();
        let start = ((query.page - 1) * query.page_size).min(items.len());
        let end = (start + query.page_size).min(items.len());

        Ok(FetchedPage {
            items: items[start..end].to_vec(),
            is_last_page: end == items.len(),
        })
    }

    fn submit_batch(&self, _resource: ResourceType, items: &[Record]) -> Result<ImportSummary> {
        self.submitted.lock().unwrap().extend_from_slice(items);
        if let Some(hook) = self.on_submit.lock().unwrap().as_mut() {
            hook();
        }
        self.submit_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(Error::transport("no scripted response")))
    }

    fn delete_one(&self, key: &DeletionKey) -> Result<()> {
        if let Some(err) = self.delete_failures.lock().unwrap().get(&key.uid) {
            return Err(err.clone());
        }
        self.deleted.lock().unwrap().push(key.clone());
        Ok(())
    }
}

/// Resolves every attribute option combo to the default category combo.
pub struct DefaultResolver;

impl DimensionResolver for DefaultResolver {
    fn resolve(&self, _attribute_option_combo: &str) -> Result<CategoryDimension> {
        Ok(CategoryDimension {
            category_combo: "bjDvmb4bfuf".into(),
            category_options: vec!["xYerKDKCefk".into()],
        })
    }
}

/// A [`MemoryStore`] shared between the code under test and a test hook,
/// with switchable commit failures.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Rc<RefCell<MemoryStore>>,
    fail_commits: Rc<Cell<bool>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.set(fail);
    }

    pub fn state(&self, resource: ResourceType, uid: &str) -> Option<SyncState> {
        self.inner
            .borrow()
            .get_by_id(resource, uid)
            .unwrap()
            .map(|r| r.state)
    }

    pub fn count(&self, resource: ResourceType) -> usize {
        self.inner.borrow().count(resource)
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().in_transaction()
    }
}

impl LocalStore for SharedStore {
    fn begin(&mut self) -> Result<()> {
        self.inner.borrow_mut().begin()
    }

    fn commit(&mut self) -> Result<()> {
        if self.fail_commits.get() {
            self.inner.borrow_mut().rollback()?;
            return Err(Error::Storage("disk full".into()));
        }
        self.inner.borrow_mut().commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.borrow_mut().rollback()
    }

    fn upsert(&mut self, record: Record) -> Result<()> {
        self.inner.borrow_mut().upsert(record)
    }

    fn remove(&mut self, resource: ResourceType, uid: &str) -> Result<()> {
        self.inner.borrow_mut().remove(resource, uid)
    }

    fn get_by_id(&self, resource: ResourceType, uid: &str) -> Result<Option<Record>> {
        self.inner.borrow().get_by_id(resource, uid)
    }

    fn get_by_state(&self, resource: ResourceType, state: SyncState) -> Result<Vec<Record>> {
        self.inner.borrow().get_by_state(resource, state)
    }

    fn children(&self, resource: ResourceType, parent_uid: &str) -> Result<Vec<Record>> {
        self.inner.borrow().children(resource, parent_uid)
    }

    fn set_state(&mut self, resource: ResourceType, uid: &str, state: SyncState) -> Result<()> {
        self.inner.borrow_mut().set_state(resource, uid, state)
    }

    fn record_conflict(&mut self, conflict: ImportConflict) -> Result<()> {
        self.inner.borrow_mut().record_conflict(conflict)
    }

    fn conflicts(&self, uid: &str) -> Result<Vec<ImportConflict>> {
        self.inner.borrow().conflicts(uid)
    }

    fn clear_conflicts(&mut self, uid: &str) -> Result<()> {
        self.inner.borrow_mut().clear_conflicts(uid)
    }
}
