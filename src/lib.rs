pub mod action;
pub mod application;
pub mod browser;
pub mod category;
pub mod config;
pub mod dom;
pub mod driver;
mod element;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod page;
pub mod profile;
pub mod recorder;
pub mod replay;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod store;

pub use action::{Action, ActionLog, ActionRecord, LogStatus};
pub use application::{ApplicationRecord, ApplicationStatus, ResolvedField, Stage};
pub use browser::ChromeLauncher;
pub use config::{BrowserBuilder, BrowserConfig, EngineConfig, RetryPolicy};
pub use driver::{Launcher, PageDriver};
pub use error::{Error, Result};
pub use generation::{GenerationError, PromptContext, TextGenerator};
pub use orchestrator::{Engine, RunHandle, RunRequest, RunState, SessionHandle};
pub use profile::{FieldHistory, JobPosting, Profile};
pub use replay::{ActionReplayer, ReplayReport};
pub use resolver::{FieldValueResolver, Resolution, ResolutionSource};
pub use schema::{extract_fields, FieldDescriptor, FieldKind};
pub use session::{NavOutcome, RemoteControlSession};
pub use store::{ApplicationStore, JsonStore, LogStore};
