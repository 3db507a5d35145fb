//! Background mode
//!
//! The foreground process forks a daemon and stays until the daemon reports
//! over a pipe whether the mount came up. Its exit status reflects that
//! report, and a daemon that dies without reporting counts as a failure.

use daemonize::{Daemonize, Outcome};
use std::fs::File;
use std::io::{Read, Write};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const READY: &str = "ready";

/// Write end, held by the daemon
pub struct Notifier {
    pipe: File,
}

/// Read end, held by the foreground process
pub struct Waiter {
    pipe: File,
}

/// Which side of the fork the caller is on
pub enum Detached {
    /// The daemon mounted successfully; the foreground process may exit
    Parent,
    /// Running detached; report through the notifier once mounted
    Daemon(Notifier),
}

/// A connected waiter and notifier
pub fn channel() -> Result<(Waiter, Notifier)> {
    let (read, write) = nix::unistd::pipe()?;
    Ok((
        Waiter {
            pipe: File::from(read),
        },
        Notifier {
            pipe: File::from(write),
        },
    ))
}

impl Notifier {
    /// The mount is up
    pub fn ready(self) {
        self.send(READY);
    }

    /// Startup failed with `error`
    pub fn failed(self, error: &Error) {
        self.send(&error.to_string());
    }

    fn send(mut self, report: &str) {
        if let Err(e) = self.pipe.write_all(report.as_bytes()) {
            warn!("could not report to the foreground process: {}", e);
        }
    }
}

impl Waiter {
    /// Block until the daemon reports or closes its end
    pub fn wait(mut self) -> Result<()> {
        let mut report = String::new();
        self.pipe.read_to_string(&mut report)?;
        match report.as_str() {
            READY => Ok(()),
            "" => Err(Error::Internal(
                "daemon exited before the mount was ready".to_string(),
            )),
            message => Err(Error::Internal(format!("daemon failed: {}", message))),
        }
    }
}

/// Fork into the background.
///
/// The parent side returns only after the daemon reported readiness, or with
/// the daemon's error.
pub fn detach(daemon: Daemonize<()>) -> Result<Detached> {
    let (waiter, notifier) = channel()?;
    match daemon.execute() {
        Outcome::Parent(Ok(parent)) => {
            debug!("first child exited with {}", parent.first_child_exit_code);
            drop(notifier);
            waiter.wait()?;
            Ok(Detached::Parent)
        }
        Outcome::Parent(Err(e)) => Err(Error::Internal(format!("daemonize failed: {}", e))),
        Outcome::Child(Ok(_)) => {
            drop(waiter);
            Ok(Detached::Daemon(notifier))
        }
        Outcome::Child(Err(e)) => {
            let error = Error::Internal(format!("daemonize failed: {}", e));
            notifier.failed(&error);
            Err(error)
        }
    }
}
