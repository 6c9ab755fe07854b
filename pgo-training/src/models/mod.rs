// Data model shared by every stage of a training case.

pub mod case;

pub use case::{CaseIdentity, Credentials, ServiceEndpoint, TemplateVariables, WorkspacePaths};
