//! telemd library - exposes modules for testing.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod history;
pub mod hub;
pub mod metrics;
pub mod refresh;
pub mod routes;
pub mod server;
pub mod state;

pub use catalog::PointCatalog;
pub use engine::{CycleReport, DriverPhase, EngineHandle, EngineSettings, TelemetryEngine};
pub use gateway::{FakeGateway, FetchError, FetchGateway, HttpGateway};
pub use history::{HistoryStore, RetentionPolicy};
pub use hub::{NotificationHub, PublishReport, Subscription};
