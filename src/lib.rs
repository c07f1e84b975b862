//! # stampede
//!
//! Virtual-user load generation with durable CSV results.
//!
//! A run executes a list of caller-defined [`TaskDefinition`]s across a
//! number of concurrent virtual users for a fixed wall-clock duration. Every
//! execution produces one [`ResultRecord`], which flows through a bounded
//! queue into a pool of sink workers that append it to a CSV file, and from
//! there to an optional live [`Visualizer`].
//!
//! ```text
//! Orchestrator ─► virtual users ─► tasks ─► primary queue ─► sink workers ─► CSV
//!                                                              │
//!                                                              └─► secondary queue ─► visualizer
//! ```
//!
//! Cancellation (deadline, SIGINT/SIGTERM, interrupt relay, sink failure)
//! flows top-down through a shared [`RunContext`]; the run then drains
//! bottom-up so no record that was produced is lost.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use stampede::{Orchestrator, ResponseMeta, TaskDefinition, TestConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TestConfig::builder()
//!         .users(10)
//!         .duration(Duration::from_secs(60))
//!         .think_time(Duration::from_secs(1))
//!         .visualizer(true)
//!         .build()?;
//!
//!     let lookup = TaskDefinition::new("lookup", |_ctx| async {
//!         tokio::time::sleep(Duration::from_millis(20)).await;
//!         Ok(200u16)
//!     })
//!     .with_response_meta(|status| ResponseMeta::status(*status))
//!     .with_expect(|_ctx, outcome| match outcome {
//!         Ok(200) => Ok(()),
//!         Ok(other) => Err(anyhow::anyhow!("unexpected status {other}")),
//!         Err(err) => Err(anyhow::anyhow!("{err:#}")),
//!     });
//!
//!     let summary = Orchestrator::new(config).run(vec![lookup]).await?;
//!     println!("results: {}", summary.results_path.display());
//!     Ok(())
//! }
//! ```
//!
//! HTTP scenarios can also be described in a TOML file; see [`scenario`].

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod orchestrator;
pub mod record;
pub mod scenario;
pub mod sink;
pub mod task;
pub mod user;
pub mod visualizer;

pub use config::{TestConfig, TestConfigBuilder};
pub use context::RunContext;
pub use error::{Result, StampedeError};
pub use lifecycle::{InterruptHandle, StopReason};
pub use orchestrator::{Orchestrator, RunSummary};
pub use record::{ResponseMeta, ResultRecord};
pub use scenario::Scenario;
pub use task::TaskDefinition;
pub use visualizer::{TerminalVisualizer, Visualizer, VisualizerContext};
