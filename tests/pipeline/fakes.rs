// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Recording fakes for every pipeline capability
//!
//! All fakes append to one shared event log so tests can assert on ordering
//! across components (e.g. persist strictly before delete).

use async_trait::async_trait;
use fontdetective_worker::fetch::{FetchError, ImageFetcher};
use fontdetective_worker::job::{DetectorId, Region, ResultRecord};
use fontdetective_worker::queue::{
    LeaseHandle, MessageAttributes, QueueClient, ReceivedMessage, TransportError,
};
use fontdetective_worker::storage::{ResultSink, WorkingArea};
use fontdetective_worker::vision::{
    CropInfo, CropSpec, DetectionParams, DetectorBank, DetectorError, ImageTransform,
    TransformError,
};
use fontdetective_worker::PipelineOrchestrator;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub type Events = Arc<Mutex<Vec<String>>>;

fn log_event(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

pub fn job_payload(uid: &str) -> Vec<u8> {
    format!(
        r#"{{"uid":"{}","url":"http://x/img.png","image":{{"w":100,"h":100}},"selection":{{"x":0,"y":0,"w":50,"h":50}}}}"#,
        uid
    )
    .into_bytes()
}

/// One scripted answer to `receive`
pub enum Receive {
    Message(Vec<u8>, &'static str),
    Empty,
    Unreachable,
}

pub struct ScriptedQueue {
    events: Events,
    script: Mutex<VecDeque<Receive>>,
    pub fail_delete: AtomicBool,
}

impl ScriptedQueue {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            script: Mutex::new(VecDeque::new()),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub fn push(&self, answer: Receive) {
        self.script.lock().unwrap().push_back(answer);
    }
}

#[async_trait]
impl QueueClient for ScriptedQueue {
    async fn receive(
        &self,
        _wait: Duration,
        _lease: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        log_event(&self.events, "receive");
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Receive::Message(payload, lease)) => Ok(Some(ReceivedMessage {
                payload,
                lease: LeaseHandle::new(lease),
            })),
            Some(Receive::Unreachable) => Err(TransportError::Unreachable {
                endpoint: "scripted".to_string(),
                reason: "connection refused".to_string(),
            }),
            Some(Receive::Empty) | None => Ok(None),
        }
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), TransportError> {
        log_event(&self.events, format!("delete:{}", lease));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TransportError::HttpStatus {
                status: 500,
                endpoint: "scripted".to_string(),
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        _payload: Vec<u8>,
        _attributes: MessageAttributes,
    ) -> Result<(), TransportError> {
        log_event(&self.events, "send");
        Ok(())
    }
}

/// Writes a placeholder file instead of downloading
pub struct FakeFetcher {
    events: Events,
    pub fail: AtomicBool,
    pub saw_workspace: AtomicBool,
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        log_event(&self.events, format!("fetch:{}", url));
        if let Some(parent) = destination.parent() {
            self.saw_workspace.store(parent.is_dir(), Ordering::SeqCst);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            });
        }
        std::fs::write(destination, b"fetched").map_err(|e| FetchError::Io {
            path: destination.to_path_buf(),
            source: e,
        })
    }
}

/// Copies the source through unchanged
pub struct FakeTransform {
    events: Events,
    pub fail: AtomicBool,
}

#[async_trait]
impl ImageTransform for FakeTransform {
    async fn crop(
        &self,
        source: &Path,
        destination: &Path,
        spec: &CropSpec,
    ) -> Result<CropInfo, TransformError> {
        log_event(&self.events, "crop");
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransformError::EmptyRegion {
                selection: spec.selection,
                width: 0,
                height: 0,
            });
        }
        std::fs::copy(source, destination).map_err(|e| TransformError::Write {
            path: destination.to_path_buf(),
            source: e,
        })?;
        Ok(CropInfo {
            source_width: spec.image_size.w,
            source_height: spec.image_size.h,
            region: Region {
                x: spec.selection.x,
                y: spec.selection.y,
                w: spec.selection.w,
                h: spec.selection.h,
            },
        })
    }
}

/// Detectors with fixed answers
pub struct FakeDetectorBank {
    events: Events,
    answers: BTreeMap<DetectorId, Result<Vec<Region>, String>>,
    pub fail_listing: AtomicBool,
    pub images: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl DetectorBank for FakeDetectorBank {
    async fn list_detectors(&self) -> Result<Vec<DetectorId>, DetectorError> {
        log_event(&self.events, "list_detectors");
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DetectorError::Directory {
                path: "/missing".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            });
        }
        Ok(self.answers.keys().cloned().collect())
    }

    async fn detect(
        &self,
        detector: &DetectorId,
        image: &Path,
        _params: &DetectionParams,
    ) -> Result<Vec<Region>, DetectorError> {
        log_event(&self.events, format!("detect:{}", detector));
        self.images.lock().unwrap().push(image.to_path_buf());
        match self.answers.get(detector) {
            Some(Ok(regions)) => Ok(regions.clone()),
            Some(Err(reason)) => Err(DetectorError::Template {
                detector: detector.clone(),
                reason: reason.clone(),
            }),
            None => Err(DetectorError::UnknownDetector(detector.clone())),
        }
    }
}

pub struct RecordingSink {
    events: Events,
    pub fail: AtomicBool,
    records: Mutex<HashMap<String, ResultRecord>>,
}

impl RecordingSink {
    pub fn get(&self, job_id: &str) -> Option<ResultRecord> {
        self.records.lock().unwrap().get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn put(&self, job_id: &str, record: &ResultRecord) -> Result<(), TransportError> {
        log_event(&self.events, format!("persist:{}", job_id));
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::HttpStatus {
                status: 503,
                endpoint: "scripted".to_string(),
            });
        }
        self.records
            .lock()
            .unwrap()
            .insert(job_id.to_string(), record.clone());
        Ok(())
    }

    fn location(&self, job_id: &str) -> String {
        format!("recording:{}", job_id)
    }
}

/// Every fake wired to one event log and one temporary working root
pub struct Harness {
    pub events: Events,
    pub queue: Arc<ScriptedQueue>,
    pub fetcher: Arc<FakeFetcher>,
    pub transform: Arc<FakeTransform>,
    pub detectors: Arc<FakeDetectorBank>,
    pub sink: Arc<RecordingSink>,
    pub working_area: WorkingArea,
    _root: TempDir,
}

impl Harness {
    pub fn new(answers: Vec<(&str, Result<Vec<Region>, &str>)>) -> Self {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let root = TempDir::new().unwrap();

        Self {
            queue: Arc::new(ScriptedQueue::new(events.clone())),
            fetcher: Arc::new(FakeFetcher {
                events: events.clone(),
                fail: AtomicBool::new(false),
                saw_workspace: AtomicBool::new(false),
            }),
            transform: Arc::new(FakeTransform {
                events: events.clone(),
                fail: AtomicBool::new(false),
            }),
            detectors: Arc::new(FakeDetectorBank {
                events: events.clone(),
                answers: answers
                    .into_iter()
                    .map(|(id, answer)| (id.to_string(), answer.map_err(str::to_string)))
                    .collect(),
                fail_listing: AtomicBool::new(false),
                images: Mutex::new(Vec::new()),
            }),
            sink: Arc::new(RecordingSink {
                events: events.clone(),
                fail: AtomicBool::new(false),
                records: Mutex::new(HashMap::new()),
            }),
            working_area: WorkingArea::new(root.path().join("work")),
            events,
            _root: root,
        }
    }

    pub fn orchestrator(&self) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            self.working_area.clone(),
            self.fetcher.clone(),
            self.transform.clone(),
            self.detectors.clone(),
            self.sink.clone(),
            self.queue.clone(),
        )
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events().iter().position(|e| e.starts_with(prefix))
    }
}

pub fn region(x: u32, y: u32, w: u32, h: u32) -> Region {
    Region { x, y, w, h }
}
