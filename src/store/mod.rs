// src/store/mod.rs - Document store capability and typed collections

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Opaque document identifier assigned by the store
pub type DocumentId = String;

/// Field every stored document carries its id under
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// One side of a comparison: a document field, a literal, or arithmetic over them
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(String),
    Value(Value),
    Add(Box<Operand>, Box<Operand>),
    Mul(Box<Operand>, Box<Operand>),
}

impl Operand {
    pub fn field(path: impl Into<String>) -> Self {
        Operand::Field(path.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Operand::Value(value.into())
    }

    pub fn add(self, other: Operand) -> Self {
        Operand::Add(Box::new(self), Box::new(other))
    }

    pub fn mul(self, other: Operand) -> Self {
        Operand::Mul(Box::new(self), Box::new(other))
    }

    fn resolve(&self, doc: &Value) -> Value {
        match self {
            Operand::Field(path) => get_path(doc, path).cloned().unwrap_or(Value::Null),
            Operand::Value(value) => value.clone(),
            Operand::Add(a, b) => arithmetic(&a.resolve(doc), &b.resolve(doc), |x, y| x + y, |x, y| x.checked_add(y)),
            Operand::Mul(a, b) => arithmetic(&a.resolve(doc), &b.resolve(doc), |x, y| x * y, |x, y| x.checked_mul(y)),
        }
    }
}

fn arithmetic(
    a: &Value,
    b: &Value,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Value::Number(result.into());
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Number::from_f64(float_op(x, y)).map(Value::Number).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Query predicate over JSON documents (equality, range and computed comparisons)
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Compare { lhs: Operand, op: CmpOp, rhs: Operand },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    fn field_cmp(field: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            lhs: Operand::field(field),
            op,
            rhs: Operand::value(value),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CmpOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CmpOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CmpOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CmpOp::Lte, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CmpOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field_cmp(field, CmpOp::Gte, value)
    }

    pub fn by_id(id: &str) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn compare(lhs: Operand, op: CmpOp, rhs: Operand) -> Self {
        Filter::Compare { lhs, op, rhs }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Compare { lhs, op, rhs } => compare(&lhs.resolve(doc), *op, &rhs.resolve(doc)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> bool {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    };

    match (op, ordering) {
        (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
        (CmpOp::Eq, None) => lhs == rhs,
        (CmpOp::Ne, Some(o)) => o != Ordering::Equal,
        (CmpOp::Ne, None) => lhs != rhs,
        // Range comparisons never match across types or against missing fields
        (_, None) => false,
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Lte, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Gte, Some(o)) => o != Ordering::Less,
    }
}

/// Field assignments and atomic numeric increments applied to one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Map<String, Value>,
    pub inc: Map<String, Value>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn inc(mut self, field: impl Into<String>, delta: impl Into<Value>) -> Self {
        self.inc.insert(field.into(), delta.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty()
    }

    /// Apply the update in place. `_id` is never overwritten.
    pub fn apply(&self, doc: &mut Value) {
        for (field, value) in &self.set {
            if field != ID_FIELD {
                set_path(doc, field, value.clone());
            }
        }
        for (field, delta) in &self.inc {
            let current = get_path(doc, field).cloned().unwrap_or(Value::Number(0.into()));
            let next = arithmetic(&current, delta, |x, y| x + y, |x, y| x.checked_add(y));
            set_path(doc, field, next);
        }
    }
}

/// Look up a dotted path (`rateLimitViolations.burst`) inside a document
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, key| current.get(key))
}

/// Assign a dotted path, creating intermediate objects as needed
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut keys = path.split('.').peekable();

    while let Some(key) = keys.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { return };

        if keys.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        current = map.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Persistent store capability consumed by the engine
///
/// Documents are JSON objects; the store assigns `_id`, `createdAt` and
/// `updatedAt`. Implementations must apply `Update::inc` atomically.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Confirm the backing store is reachable
    async fn ping(&self) -> StoreResult<()>;

    async fn insert(&self, collection: &str, doc: Value) -> StoreResult<DocumentId>;

    /// Insert only when no document matches `filter`; checked and written under one lock
    async fn insert_if_absent(&self, collection: &str, filter: &Filter, doc: Value) -> StoreResult<Option<DocumentId>>;

    async fn get_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>>;

    async fn get_many(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>>;

    /// Update the first matching document and return its post-image
    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<Option<Value>>;

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<usize>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<usize>;

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize>;
}

/// A decoded document together with its store id
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub id: DocumentId,
    pub doc: T,
}

/// Typed facade over one named collection
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn insert(&self, doc: &T) -> StoreResult<DocumentId> {
        self.store.insert(&self.name, serde_json::to_value(doc)?).await
    }

    pub async fn insert_if_absent(&self, filter: &Filter, doc: &T) -> StoreResult<Option<DocumentId>> {
        self.store.insert_if_absent(&self.name, filter, serde_json::to_value(doc)?).await
    }

    pub async fn get_one(&self, filter: &Filter) -> StoreResult<Option<Record<T>>> {
        self.store.get_one(&self.name, filter).await?.map(decode).transpose()
    }

    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Record<T>>> {
        self.get_one(&Filter::by_id(id)).await
    }

    pub async fn get_many(&self, filter: &Filter) -> StoreResult<Vec<Record<T>>> {
        self.store
            .get_many(&self.name, filter)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn update(&self, filter: &Filter, update: &Update) -> StoreResult<Option<Record<T>>> {
        self.store.update(&self.name, filter, update).await?.map(decode).transpose()
    }

    /// Atomically add `delta` to one numeric field of the first match
    pub async fn increment(&self, filter: &Filter, field: &str, delta: i64) -> StoreResult<Option<Record<T>>> {
        self.update(filter, &Update::new().inc(field, delta)).await
    }

    pub async fn update_many(&self, filter: &Filter, update: &Update) -> StoreResult<usize> {
        self.store.update_many(&self.name, filter, update).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(&self.name, id).await
    }

    pub async fn delete_many(&self, filter: &Filter) -> StoreResult<usize> {
        self.store.delete_many(&self.name, filter).await
    }

    pub async fn count(&self, filter: &Filter) -> StoreResult<usize> {
        self.store.count(&self.name, filter).await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> StoreResult<Record<T>> {
    let id = value
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let doc = serde_json::from_value(value)?;
    Ok(Record { id, doc })
}
