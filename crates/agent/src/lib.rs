//! The turn orchestrator: the model/tool loop at the center of LearnPath.
//!
//! For every user message the orchestrator:
//!
//! 1. **Checks out** the user's history (one request per user at a time)
//! 2. **Appends** the message, seeding the coaching directive on first contact
//! 3. **Compacts** the history if it has grown past the threshold
//! 4. **Calls the model** with the history and the tool catalog
//! 5. **If tool invocations**: executes them, appends the results, loops back to 4
//! 6. **If text only**: commits the history and returns the collected text
//!
//! Nothing is committed when a turn fails, so a failed request leaves the
//! stored history exactly as it was.

pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use orchestrator::{OrchestratorSettings, TurnOrchestrator};
