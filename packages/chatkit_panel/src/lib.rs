//! Widget host controller for the ChatKit panel.
//!
//! Drives script detection, session secret refresh and client tool dispatch,
//! and publishes a [`PanelView`] snapshot whenever anything visible changes.

pub mod client;
pub mod controller;
pub mod error;
pub mod options;
pub mod script;
pub mod session;
pub mod state;
pub mod tools;

pub use client::{BrokerClient, SessionGrant, SessionRequest, SessionSource, SourceError};
pub use controller::{PanelConfig, PanelController, PanelHost};
pub use error::PanelError;
pub use options::WidgetOptions;
pub use script::{ScriptEvent, WidgetRegistry};
pub use state::{ErrorState, PanelView, ScriptStatus};
pub use tools::{ClientTool, ColorScheme, FactAction, ToolResult};
