//! Process-group helpers for killing a shell together with its children.
//!
//! - `detach_from_tty` runs in `pre_exec` and starts a new session, so the
//!   shell leads its own process group and never reads the host's terminal.
//! - `kill_process_group` signals that whole group, which takes down the
//!   commands the shell forked as well as the shell itself.
//! - `kill_process` is the Windows fallback that terminates one PID.

use std::io;

/// Detach from the controlling TTY by starting a new session.
///
/// Falls back to a plain process group when the caller already leads a
/// session (`EPERM`).
#[cfg(unix)]
pub fn detach_from_tty() -> io::Result<()> {
    let result = unsafe { libc::setsid() };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            return set_process_group();
        }
        return Err(err);
    }
    Ok(())
}

/// Put the calling process into its own process group.
#[cfg(unix)]
pub fn set_process_group() -> io::Result<()> {
    let result = unsafe { libc::setpgid(0, 0) };
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// SIGKILL every process in `process_group_id`.
///
/// A group that no longer exists (`ESRCH`) counts as success.
#[cfg(unix)]
pub fn kill_process_group(process_group_id: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(process_group_id)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "process group id out of range"))?;
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

/// Terminate a process by PID on Windows.
#[cfg(windows)]
pub fn kill_process(pid: u32) -> io::Result<()> {
    unsafe {
        let handle = winapi::um::processthreadsapi::OpenProcess(
            winapi::um::winnt::PROCESS_TERMINATE,
            0,
            pid,
        );
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let success = winapi::um::processthreadsapi::TerminateProcess(handle, 1);
        let err = io::Error::last_os_error();
        winapi::um::handleapi::CloseHandle(handle);
        if success == 0 { Err(err) } else { Ok(()) }
    }
}

/// Exit code reported for a finished child.
///
/// A child terminated by a signal reports `128 + signal`, the shell
/// convention, so a SIGKILLed child yields 137.
pub fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
