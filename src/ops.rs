//! Ops and extension definition for the render sandbox.
//!
//! The sandbox gets no ops beyond console capture: no fetch, timers,
//! filesystem or environment. Everything else component code can reach is
//! plain JS defined by `bootstrap.js`.

use deno_core::{op2, OpState};

/// Severity of a captured console line. Discriminants match the numbers
/// `bootstrap.js` passes to `op_console`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log = 0,
    Warn = 1,
    Error = 2,
}

impl ConsoleLevel {
    fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Warn,
            2 => Self::Error,
            _ => Self::Log,
        }
    }
}

/// Console lines written by component code in one render context, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsoleOutput {
    lines: Vec<(ConsoleLevel, String)>,
}

impl ConsoleOutput {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[(ConsoleLevel, String)] {
        &self.lines
    }

    /// Messages at `level`, oldest first.
    pub fn at(&self, level: ConsoleLevel) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, msg)| msg.as_str())
            .collect()
    }

    /// Replay captured lines as tracing events attributed to `tag`.
    pub fn emit(&self, tag: &str) {
        for (level, line) in &self.lines {
            match level {
                ConsoleLevel::Log => tracing::debug!(target: "wc_ssr::sandbox", tag, "{}", line),
                ConsoleLevel::Warn => tracing::warn!(target: "wc_ssr::sandbox", tag, "{}", line),
                ConsoleLevel::Error => tracing::error!(target: "wc_ssr::sandbox", tag, "{}", line),
            }
        }
    }
}

#[op2(fast)]
pub fn op_console(state: &mut OpState, level: u32, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.lines.push((ConsoleLevel::from_code(level), msg.to_string()));
    }
}

deno_core::extension!(
    wc_sandbox,
    ops = [op_console],
    esm_entry_point = "ext:wc_sandbox/bootstrap.js",
    esm = ["ext:wc_sandbox/bootstrap.js" = "src/bootstrap.js"],
);
