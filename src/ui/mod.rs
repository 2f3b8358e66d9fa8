//! Terminal UI helpers
//!
//! Spinners and status lines go to stderr, with plain-text fallbacks when
//! not attached to an interactive terminal (pipes, CI).
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Syncing mount...");
//! // ... do work ...
//! spinner.stop("Mount mo-1 ready");
//! ui::key_value(&ctx, "files", "12");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, section, step_ok_detail};
pub use progress::TaskSpinner;
