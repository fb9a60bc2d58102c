//! Labeler Service
//!
//! Image labeling worker. It long-polls an SQS queue for "Object Created"
//! notifications, downloads each referenced image from S3, asks Rekognition
//! for labels, and writes a normalized result document to Firestore keyed by
//! the image's file name.
//!
//! ## Processing model
//!
//! One message at a time, fully sequential. By default a message is deleted
//! from the queue as soon as it is received ([`AckPolicy::BeforeProcessing`]),
//! so a failed iteration loses its notification. [`AckPolicy::AfterSuccess`]
//! defers deletion until the document is stored.
//!
//! ```text
//!  SQS queue         S3 bucket          Rekognition          Firestore
//! ┌──────────┐     ┌──────────┐       ┌──────────────┐     ┌──────────────┐
//! │ Object   │     │ images   │       │ DetectLabels │     │ {collection}/│
//! │ Created  │     │          │       │              │     │   {image_id} │
//! └──────────┘     └──────────┘       └──────────────┘     └──────────────┘
//!      │ receive/ack     ▲ get_object        ▲                     ▲
//!      ▼                 │                   │                     │ upsert
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Pipeline: receive → ack → fetch → detect → transform → persist       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod firestore_store;
pub mod notification;
pub mod pipeline;
pub mod rekognition;
pub mod result_document;
pub mod s3_fetcher;
pub mod sqs_source;

pub use crate::config::{AckPolicy, Config};
pub use error::PipelineError;
pub use firestore_store::{DocumentStore, FirestoreStore, ServiceAccountKey};
pub use notification::Notification;
pub use pipeline::{IterationOutcome, Pipeline, PipelineSettings};
pub use rekognition::{Label, LabelExtractor, RekognitionExtractor};
pub use result_document::{ResultDocument, Tag};
pub use s3_fetcher::{BlobFetcher, S3Fetcher};
pub use sqs_source::{AckToken, MessageSource, ReceivedMessage, SqsMessageSource};
