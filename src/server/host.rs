//! Execution host interface.

use super::capture::Console;
use crate::value::{Fault, Value};

/// The environment that runs client code on the server.
///
/// Each session owns one `Scope`, created with `Default` on hello and
/// dropped on goodbye. Definitions made by one request are visible to later
/// requests of the same session and never to other sessions. Output meant
/// for the requesting client goes through `console`.
pub trait ExecutionHost {
    /// Per-session namespace.
    type Scope: Default;

    /// Run statements against `scope`.
    fn execute(
        &mut self,
        code: &str,
        scope: &mut Self::Scope,
        console: &mut Console,
    ) -> Result<(), Fault>;

    /// Evaluate an expression against `scope`.
    fn evaluate(
        &mut self,
        expr: &str,
        scope: &mut Self::Scope,
        console: &mut Console,
    ) -> Result<Value, Fault>;
}
