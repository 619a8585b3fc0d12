//! # Tether Engine
//!
//! Object-graph persistence for a backend-as-a-service client.
//!
//! Application code edits [`Record`]s locally. Every edit is kept as a
//! pending [`Operation`] next to an estimated view of the record's fields, so
//! reads reflect local changes before anything reaches the server. Saving a
//! record writes the whole graph of unsaved records it references, in an
//! order where every record's dependencies already have object IDs.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine talks to the backend only through [`Transport`]
//! - **Local first**: edits are validated and merged without the network
//! - **Ordered writes**: dependencies are saved in waves, deepest first
//! - **Explicit sessions**: no global state; callers pass a [`Session`]
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a shared handle: clones refer to the same entity, and
//! handle equality is identity. A record has a class name, an object ID once
//! saved, the last known server fields, the estimated fields and the pending
//! operations keyed by field.
//!
//! ### Operations
//!
//! Field edits are expressed as operations that can be applied to a value
//! and merged with an earlier operation on the same field:
//! - [`Operation::Set`] / [`Operation::Delete`] - replace or remove a value
//! - [`Operation::Increment`] - add to a number
//! - [`Operation::ListAdd`], [`Operation::ListAddUnique`],
//!   [`Operation::ListRemove`] - array edits
//! - [`Operation::RelationAdd`], [`Operation::RelationRemove`],
//!   [`Operation::RelationBatch`] - relation membership edits
//!
//! ### Saving
//!
//! [`Session::save`] rejects circular graphs ([`has_cycle`]), plans unsaved
//! dependencies into waves ([`build_waves`]), writes each wave as one batch
//! request and finally writes the record itself.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{MockTransport, Record, Session, Value};
//!
//! # tokio::runtime::Builder::new_current_thread()
//! #     .build()
//! #     .unwrap()
//! #     .block_on(async {
//! let session = Session::new(MockTransport::new());
//!
//! let author = Record::new("Author");
//! author.set("name", "Ada").unwrap();
//!
//! let post = Record::new("Post");
//! post.set("title", "Hello").unwrap();
//! post.set("author", &author).unwrap();
//! post.increment("views", 1).unwrap();
//!
//! session.save(&post).await.unwrap();
//!
//! assert!(author.object_id().is_some());
//! assert!(!post.is_dirty());
//! assert_eq!(post.get("views"), Some(Value::from(1)));
//! # });
//! ```

pub mod batch;
pub mod codec;
pub mod error;
pub mod graph;
pub mod operation;
pub mod record;
pub mod session;
pub mod transport;
pub mod value;

// Re-export main types at crate root
pub use batch::{build_waves, Batch, WaveStack};
pub use error::{Error, ItemError, Result};
pub use graph::{dependent_records, has_cycle};
pub use operation::Operation;
pub use record::{Record, ServerState};
pub use session::{CancelToken, Session, SessionConfig};
pub use transport::{
    BackendError, BatchRequest, BatchResponseItem, Method, MockTransport, SaveOptions, Transport,
};
pub use value::{Number, Relation, Value};
