//! # Mesh Test Utilities
//!
//! Mocks and fixtures for exercising `mesh-peer` without a real engine,
//! camera or coordinating process.
//!
//! ## Modules
//!
//! - `mock_engine` - Scripted negotiation engine with call recording
//! - `mock_media` - Local media that succeeds or fails on demand
//! - `mock_probe` - Address probe returning a fixed address, failing or hanging
//! - `mock_display` - Display surface that records tiles
//! - `mock_coordinator` - In-process coordinating process for full-mesh tests
//! - `fixtures` - Participant builders and directory helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let coordinator = MockCoordinator::new();
//!     let alice = TestParticipant::new("203.0.113.1").start(&coordinator).await;
//!     let bob = TestParticipant::new("203.0.113.2").start(&coordinator).await;
//!
//!     alice.wait_for_connections(1).await;
//!     bob.wait_for_connections(1).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_coordinator;
pub mod mock_display;
pub mod mock_engine;
pub mod mock_media;
pub mod mock_probe;

pub use fixtures::*;
pub use mock_coordinator::MockCoordinator;
pub use mock_display::MockDisplay;
pub use mock_engine::{MockEngine, MockHandleState};
pub use mock_media::MockMedia;
pub use mock_probe::MockProbe;
