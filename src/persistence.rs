//! Persistence boundary: asynchronous label and schema requests.
//!
//! The core never blocks on the backend. Requests are submitted through
//! [`LabelBackend::submit`] and their completions are fed back later as
//! [`PersistResponse`]s, tagged with the sample they were issued for so a
//! late answer for a previous sample can be recognized and dropped.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fields::FieldResolver;
use crate::model::{AttributeValue, Attributes, FieldPath, FieldSchema, LabelId};
use crate::sample::{SampleDocument, SampleId};

/// Identifier of a submitted request.
pub type RequestId = u64;

/// Operation requested from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PersistOp {
    /// Persist a new label
    CreateLabel {
        field: FieldPath,
        id: LabelId,
        attributes: Attributes,
    },
    /// Apply changed keys to an existing label (`None` removes the key)
    UpdateLabel {
        field: FieldPath,
        id: LabelId,
        diff: BTreeMap<String, Option<AttributeValue>>,
    },
    /// Delete a label
    DeleteLabel { field: FieldPath, id: LabelId },
    /// Fetch every field schema
    ListFieldSchema,
    /// Create a field with the given schema
    CreateFieldSchema { field: FieldPath, schema: FieldSchema },
    /// Make a field available for annotation
    ActivateFieldSchema { field: FieldPath },
    /// Hide a field from annotation
    DeactivateFieldSchema { field: FieldPath },
}

impl PersistOp {
    /// Short description used in notifications.
    pub fn describe(&self) -> &'static str {
        match self {
            PersistOp::CreateLabel { .. } => "create label",
            PersistOp::UpdateLabel { .. } => "save label",
            PersistOp::DeleteLabel { .. } => "delete label",
            PersistOp::ListFieldSchema => "load field schemas",
            PersistOp::CreateFieldSchema { .. } => "create field",
            PersistOp::ActivateFieldSchema { .. } => "activate field",
            PersistOp::DeactivateFieldSchema { .. } => "deactivate field",
        }
    }
}

/// A request submitted to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistRequest {
    pub id: RequestId,
    pub sample: SampleId,
    pub op: PersistOp,
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PersistOk {
    /// Label create/update/delete or schema (de)activation succeeded
    Done,
    /// Field schemas, in answer to `ListFieldSchema`
    Schemas(Vec<(FieldPath, FieldSchema)>),
}

/// Structured failure returned by the backend.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendError {
    /// The backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The target does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Completion of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistResponse {
    pub request: RequestId,
    pub sample: SampleId,
    pub result: Result<PersistOk, BackendError>,
}

/// The remote persistence service.
pub trait LabelBackend {
    /// Submit a request. The completion is delivered later.
    fn submit(&mut self, request: PersistRequest);

    /// Completions that arrived since the last call.
    fn poll_responses(&mut self) -> Vec<PersistResponse>;
}

/// In-memory backend: stores labels per sample and answers in submission order.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    labels: HashMap<SampleId, BTreeMap<LabelId, (FieldPath, Attributes)>>,
    schemas: BTreeMap<FieldPath, FieldSchema>,
    submitted: Vec<PersistRequest>,
    responses: VecDeque<PersistResponse>,
    /// Number of upcoming requests to fail
    failures: usize,
    /// Hold responses until `release` is called
    hold: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a field schema.
    pub fn with_schema(mut self, field: &str, schema: FieldSchema) -> Self {
        self.schemas.insert(FieldPath::from(field), schema);
        self
    }

    /// Seed the labels of a sample document.
    pub fn with_sample(mut self, sample: &SampleDocument, resolver: &FieldResolver) -> Self {
        let labels = self.labels.entry(sample.id.clone()).or_default();
        for label in sample.labels(resolver) {
            labels.insert(label.id, (label.field, label.attributes));
        }
        self
    }

    /// Fail the next `count` requests with `Unavailable`.
    pub fn fail_next(&mut self, count: usize) {
        self.failures = count;
    }

    /// Keep responses queued until [`MemoryBackend::release`].
    pub fn hold_responses(&mut self, hold: bool) {
        self.hold = hold;
    }

    /// Release held responses.
    pub fn release(&mut self) {
        self.hold = false;
    }

    /// Every request submitted so far.
    pub fn submitted(&self) -> &[PersistRequest] {
        &self.submitted
    }

    /// Stored attributes of a label.
    pub fn stored(&self, sample: &SampleId, id: &LabelId) -> Option<&Attributes> {
        self.labels.get(sample)?.get(id).map(|(_, attributes)| attributes)
    }

    pub fn stored_count(&self, sample: &SampleId) -> usize {
        self.labels.get(sample).map_or(0, BTreeMap::len)
    }

    fn apply(&mut self, request: &PersistRequest) -> Result<PersistOk, BackendError> {
        let labels = self.labels.entry(request.sample.clone()).or_default();
        match &request.op {
            PersistOp::CreateLabel {
                field,
                id,
                attributes,
            } => {
                labels.insert(id.clone(), (field.clone(), attributes.clone()));
                Ok(PersistOk::Done)
            }
            PersistOp::UpdateLabel { id, diff, .. } => {
                let (_, attributes) = labels
                    .get_mut(id)
                    .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
                for (key, value) in diff {
                    match value {
                        Some(value) => attributes.insert(key.clone(), value.clone()),
                        None => attributes.remove(key),
                    };
                }
                Ok(PersistOk::Done)
            }
            PersistOp::DeleteLabel { id, .. } => labels
                .remove(id)
                .map(|_| PersistOk::Done)
                .ok_or_else(|| BackendError::NotFound(id.to_string())),
            PersistOp::ListFieldSchema => Ok(PersistOk::Schemas(
                self.schemas
                    .iter()
                    .map(|(path, schema)| (path.clone(), schema.clone()))
                    .collect(),
            )),
            PersistOp::CreateFieldSchema { field, schema } => {
                if self.schemas.contains_key(field) {
                    return Err(BackendError::Rejected(format!("field '{}' exists", field)));
                }
                self.schemas.insert(field.clone(), schema.clone());
                Ok(PersistOk::Done)
            }
            PersistOp::ActivateFieldSchema { field } | PersistOp::DeactivateFieldSchema { field } => {
                let active = matches!(request.op, PersistOp::ActivateFieldSchema { .. });
                let schema = self
                    .schemas
                    .get_mut(field)
                    .ok_or_else(|| BackendError::NotFound(field.to_string()))?;
                schema.active = active;
                Ok(PersistOk::Done)
            }
        }
    }
}

impl LabelBackend for MemoryBackend {
    fn submit(&mut self, request: PersistRequest) {
        log::trace!("Backend received #{} ({})", request.id, request.op.describe());
        let result = if self.failures > 0 {
            self.failures -= 1;
            Err(BackendError::Unavailable("injected failure".to_string()))
        } else {
            self.apply(&request)
        };
        self.responses.push_back(PersistResponse {
            request: request.id,
            sample: request.sample.clone(),
            result,
        });
        self.submitted.push(request);
    }

    fn poll_responses(&mut self) -> Vec<PersistResponse> {
        if self.hold {
            return Vec::new();
        }
        self.responses.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LabelType;

    fn request(id: RequestId, op: PersistOp) -> PersistRequest {
        PersistRequest {
            id,
            sample: SampleId::from("s1"),
            op,
        }
    }

    #[test]
    fn test_create_update_delete() {
        let mut backend = MemoryBackend::new();
        let label = LabelId::from("l1");
        let field = FieldPath::from("gt");

        backend.submit(request(
            1,
            PersistOp::CreateLabel {
                field: field.clone(),
                id: label.clone(),
                attributes: Attributes::from([("label".to_string(), AttributeValue::from("cat"))]),
            },
        ));
        backend.submit(request(
            2,
            PersistOp::UpdateLabel {
                field: field.clone(),
                id: label.clone(),
                diff: BTreeMap::from([("label".to_string(), Some(AttributeValue::from("dog")))]),
            },
        ));

        let sample = SampleId::from("s1");
        assert_eq!(
            backend.stored(&sample, &label).and_then(|a| a.get("label")),
            Some(&AttributeValue::from("dog"))
        );

        backend.submit(request(3, PersistOp::DeleteLabel { field, id: label.clone() }));
        assert_eq!(backend.stored_count(&sample), 0);

        let responses = backend.poll_responses();
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.result.is_ok()));
        assert!(backend.poll_responses().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let mut backend = MemoryBackend::new();
        backend.fail_next(1);
        backend.submit(request(1, PersistOp::ListFieldSchema));
        backend.submit(request(2, PersistOp::ListFieldSchema));

        let responses = backend.poll_responses();
        assert!(matches!(responses[0].result, Err(BackendError::Unavailable(_))));
        assert!(responses[1].result.is_ok());
    }

    #[test]
    fn test_held_responses() {
        let mut backend = MemoryBackend::new();
        backend.hold_responses(true);
        backend.submit(request(1, PersistOp::ListFieldSchema));
        assert!(backend.poll_responses().is_empty());
        backend.release();
        assert_eq!(backend.poll_responses().len(), 1);
    }

    #[test]
    fn test_schema_lifecycle() {
        let mut backend =
            MemoryBackend::new().with_schema("gt", FieldSchema::new(LabelType::Detection, &[]));
        let field = FieldPath::from("gt");

        backend.submit(request(1, PersistOp::DeactivateFieldSchema { field: field.clone() }));
        backend.submit(request(
            2,
            PersistOp::CreateFieldSchema {
                field: field.clone(),
                schema: FieldSchema::new(LabelType::Detection, &[]),
            },
        ));
        backend.submit(request(3, PersistOp::ListFieldSchema));

        let responses = backend.poll_responses();
        assert!(responses[0].result.is_ok());
        assert!(matches!(responses[1].result, Err(BackendError::Rejected(_))));
        match &responses[2].result {
            Ok(PersistOk::Schemas(schemas)) => {
                assert_eq!(schemas.len(), 1);
                assert!(!schemas[0].1.active);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
