//! Piped collection commands and redirect recovery.
//!
//! ```text
//! PipelineBuilder ─► PipelineBatch ─► PipelineExecutor
//!                                        │ route by key
//!                                        ▼
//!                         PipelineOperation (one per node)
//!                                        │ RESPONSE n / status* / END
//!                                        ▼
//!                COMPLETE ◄──────────────┴──────────────► REDIRECT
//!                                                            │
//!                                      RedirectHandler ◄─────┘
//!                                            │ group_redirect_keys
//!                                            ▼
//!                                  resubmit to the new owners
//! ```

mod executor;
mod operation;
mod redirect;
mod response;

pub use executor::{BatchResult, NodeQueueSink, OperationSink, PipelineExecutor};
pub use operation::{PipedCommand, PipelineCallback, PipelineOperation};
pub use redirect::RedirectHandler;
