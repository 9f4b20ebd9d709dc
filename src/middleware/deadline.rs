use std::time::{Duration, SystemTime};

use crate::error::Error;
use crate::middleware::Middleware;
use crate::request::Req;

/// Context key holding the instant after which the request is abandoned.
pub const DEADLINE_KEY: &str = "deadline";

/// Cancels requests whose deadline has passed.
///
/// Earlier middleware (or [`Deadline::after`] itself) store a
/// [`SystemTime`] under [`DEADLINE_KEY`]; once it is in the past the chain
/// halts with `408`. Cancellation travels through the same context as every
/// other forward value, nothing is interrupted implicitly.
#[derive(Clone, Debug, Default)]
pub struct Deadline {
    budget: Option<Duration>,
}

impl Deadline {
    /// Only checks a deadline set by someone else.
    pub fn check() -> Self {
        Self { budget: None }
    }

    /// Sets a deadline `budget` from now when none exists, then checks it.
    pub fn after(budget: Duration) -> Self {
        Self { budget: Some(budget) }
    }
}

impl Middleware for Deadline {
    fn name(&self) -> &str {
        "deadline"
    }

    fn run(&self, req: &mut Req) -> Result<(), Error> {
        match self.budget {
            Some(budget) if !req.context.has(DEADLINE_KEY) => {
                req.context.set(DEADLINE_KEY, SystemTime::now() + budget);
            }
            _ => {}
        }

        match req.context.get_time(DEADLINE_KEY) {
            Some(deadline) if SystemTime::now() > deadline => {
                Err(Error::new(408, "request deadline exceeded").with_code("deadline_exceeded"))
            }
            _ => Ok(()),
        }
    }
}
