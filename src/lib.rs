//! git-peek: materialize a remote repository into an ephemeral local
//! workspace, open it in an editor, and guarantee the workspace is deleted
//! when the session ends.

pub mod acquire;
pub mod cli;
pub mod editor;
pub mod errors;
pub mod github;
pub mod reference;
pub mod run;
pub mod search;
pub mod session;
pub mod util;
pub mod workspace;

pub use cli::Cli;
pub use errors::{exit_code_for_error, PeekError};
pub use reference::{fallback_ref, parse_reference, Reference};
pub use workspace::Workspace;
