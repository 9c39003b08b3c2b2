//! Process-group signalling.
//!
//! Every test process is spawned as the leader of a fresh process group, so
//! signalling the group reaches the runner and anything it forked (browsers,
//! drivers, helper servers).

use tracing::{debug, warn};

/// Handle on a spawned child's process group. Dropping it kills the group.
pub(crate) struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    pub fn new(leader_pid: Option<u32>) -> Self {
        Self { pgid: leader_pid }
    }

    /// Ask every process in the group to exit.
    pub fn terminate(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGTERM);
    }

    /// Forcibly kill every process in the group.
    pub fn kill(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return;
        };

        match killpg(Pid::from_raw(pgid as i32), signal) {
            Ok(()) => debug!(pgid, signal = %signal, "Signalled process group"),
            // Group already empty.
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid, signal = %signal, error = %e, "Failed to signal process group"),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
