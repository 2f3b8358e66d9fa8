//! Interactive vs CI detection

use std::io::IsTerminal;

/// Environment variables set by common CI runners
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Decides whether progress output may animate
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Inspect stderr and the environment
    pub fn detect() -> Self {
        Self {
            interactive: interactive(std::io::stderr().is_terminal(), |var| {
                std::env::var_os(var).is_some()
            }),
        }
    }

    /// Plain output regardless of the terminal
    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    /// Spinners and colored glyphs instead of plain status lines
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

// Spinners draw on stderr, so stdout being piped does not matter here
fn interactive(stderr_is_tty: bool, is_set: impl Fn(&str) -> bool) -> bool {
    stderr_is_tty && !CI_VARS.iter().any(|var| is_set(var))
}
