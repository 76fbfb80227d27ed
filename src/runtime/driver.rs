//! Blocking entry points that drive the reactor until lambdas settle.
//!
//! Everything here runs on the calling thread: "waiting" means repeatedly calling
//! [`Reactor::poll`] until the lambdas of interest leave the Running state.

use crate::error::{Error, Result};
use crate::lambda::{Lambda, State};
use crate::value::Values;

use tracing::debug;

impl Lambda {
    /// Activates the lambda if it is Passive, then polls its reactor until it is no longer
    /// Running and returns its result.
    ///
    /// A Finished lambda is not restarted: waiting on it again returns the same result (use
    /// [`call`](Lambda::call) to restart). A fatal error while polling, or an error raised by a
    /// callback, cancels the lambda and is returned.
    pub fn wait(&self, args: Values) -> Result<Values> {
        match self.state() {
            State::Passive => self.call(args)?,
            State::Cancelled => return Err(Error::Cancelled),
            State::Running | State::Finished => self.set_call_args(args),
        }

        let reactor = self.reactor()?;
        while self.is_running() {
            if let Err(error) = reactor.poll() {
                debug!(lambda = %self.id(), %error, "wait aborted");
                self.cancel();
                return Err(error);
            }
        }

        match self.state() {
            State::Finished => Ok(self.peek()),
            _ => Err(Error::Cancelled),
        }
    }
}

/// Activates every Passive lambda and drives them all to completion. Results come back in
/// argument order; any cancelled lambda makes the whole call fail with [`Error::Cancelled`].
pub fn wait_all(lambdas: &[Lambda]) -> Result<Vec<Values>> {
    for lambda in lambdas.iter().filter(|lambda| lambda.is_passive()) {
        lambda.call(Vec::new())?;
    }

    while let Some(running) = lambdas.iter().find(|lambda| lambda.is_running()) {
        if let Err(error) = running.reactor()?.poll() {
            for lambda in lambdas {
                lambda.cancel();
            }
            return Err(error);
        }
    }

    lambdas
        .iter()
        .map(|lambda| match lambda.state() {
            State::Finished => Ok(lambda.peek()),
            _ => Err(Error::Cancelled),
        })
        .collect()
}

/// Activates every Passive lambda and drives them until one finishes. Returns its index and
/// result; the others are left as they are.
pub fn wait_any(lambdas: &[Lambda]) -> Result<(usize, Values)> {
    if lambdas.is_empty() {
        return Err(Error::NothingToWait);
    }

    for lambda in lambdas.iter().filter(|lambda| lambda.is_passive()) {
        lambda.call(Vec::new())?;
    }

    loop {
        if let Some(index) = lambdas.iter().position(Lambda::is_finished) {
            return Ok((index, lambdas[index].peek()));
        }

        let Some(running) = lambdas.iter().find(|lambda| lambda.is_running()) else {
            return Err(Error::Cancelled);
        };

        running.reactor()?.poll()?;
    }
}
