//! Stepwright verification
//!
//! Runs generated tests and heals the failures that can be fixed without
//! touching what the test asserts.
//!
//! ```text
//!  ┌──────────────┐   run    ┌────────────────┐  report   ┌──────────────┐
//!  │ VerifySession├─────────►│  TestExecutor  ├──────────►│  classify()  │
//!  └──────▲───────┘          │  (Playwright)  │           └──────┬───────┘
//!         │                  └────────────────┘                  │ Failure
//!         │ commit                                               ▼
//!  ┌──────┴───────┐  accept  ┌────────────────┐  propose  ┌──────────────┐
//!  │   Emitter    │◄─────────┤   HealPolicy   │◄──────────┤ HealPlanner  │
//!  └──────────────┘          └────────────────┘           └──────────────┘
//! ```
//!
//! Every step of the loop is a transition of `StateMachine`, which bounds the
//! number of heals per journey.

pub mod classify;
pub mod error;
pub mod executor;
pub mod heal;
pub mod pool;
pub mod report;
pub mod session;
pub mod state;

pub use classify::{classify, ElementProbe, Failure, FailureClass};
pub use error::{VerifyError, VerifyResult};
pub use executor::{ExecRequest, PlaywrightExecutor, TestExecutor};
pub use heal::{HealAction, HealPlanner, HealPolicy, PolicyViolation};
pub use pool::{verify_all, JourneyVerification};
pub use report::{parse_report, RunOutcome, RunReport, TestFailure};
pub use session::{VerifyOutcome, VerifySession};
pub use state::{BlockReason, StateMachine, VerifyEvent, VerifyState};
