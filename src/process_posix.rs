//! Implements run_command on posix using posix_spawn.
//! See run_command comments for why.

use crate::process::Termination;
use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::os::unix::process::ExitStatusExt;

fn strerror(errno: libc::c_int) -> String {
    std::io::Error::from_raw_os_error(errno).to_string()
}

/// Check a function that returns an error number, like the posix_spawn family.
fn check_ret(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret != 0 {
        anyhow::bail!("{}: {}", func, strerror(ret));
    }
    Ok(())
}

/// Check a function that returns -1 and sets errno.
fn check_errno(func: &str, ret: libc::c_int) -> anyhow::Result<()> {
    if ret < 0 {
        anyhow::bail!("{}: {}", func, std::io::Error::last_os_error());
    }
    Ok(())
}

/// Wraps libc::posix_spawn_file_actions_t, in particular to implement Drop.
struct PosixSpawnFileActions(libc::posix_spawn_file_actions_t);

impl PosixSpawnFileActions {
    fn new() -> anyhow::Result<Self> {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            check_ret(
                "posix_spawn_file_actions_init",
                libc::posix_spawn_file_actions_init(&mut actions),
            )?;
            Ok(Self(actions))
        }
    }

    fn as_ptr(&mut self) -> *mut libc::posix_spawn_file_actions_t {
        &mut self.0
    }

    fn adddup2(&mut self, fd: i32, newfd: i32) -> anyhow::Result<()> {
        unsafe {
            check_ret(
                "posix_spawn_file_actions_adddup2",
                libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, newfd),
            )
        }
    }

    fn addclose(&mut self, fd: i32) -> anyhow::Result<()> {
        unsafe {
            check_ret(
                "posix_spawn_file_actions_addclose",
                libc::posix_spawn_file_actions_addclose(&mut self.0, fd),
            )
        }
    }
}

impl Drop for PosixSpawnFileActions {
    fn drop(&mut self) {
        unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
    }
}

/// A pipe whose ends aren't inherited by other concurrently spawned commands;
/// dup2 in the child clears the flag on the copies it makes.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> anyhow::Result<[libc::c_int; 2]> {
    let mut pipe: [libc::c_int; 2] = [0; 2];
    check_errno("pipe2", unsafe { libc::pipe2(pipe.as_mut_ptr(), libc::O_CLOEXEC) })?;
    Ok(pipe)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> anyhow::Result<[libc::c_int; 2]> {
    let mut pipe: [libc::c_int; 2] = [0; 2];
    unsafe {
        check_errno("pipe", libc::pipe(pipe.as_mut_ptr()))?;
        for fd in pipe {
            check_errno("fcntl", libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC))?;
        }
    }
    Ok(pipe)
}

#[cfg(not(target_vendor = "apple"))]
fn environ() -> *const *mut libc::c_char {
    extern "C" {
        static environ: *const *mut libc::c_char;
    }
    unsafe { environ }
}

#[cfg(target_vendor = "apple")]
fn environ() -> *const *mut libc::c_char {
    unsafe { *libc::_NSGetEnviron() }
}

/// Run a command line through `/bin/sh -c`, returning how it terminated and
/// its combined stdout/stderr.
pub fn run_command(cmdline: &str) -> anyhow::Result<(Termination, Vec<u8>)> {
    // Spawn the subprocess using posix_spawn with output redirected to the pipe.
    // We don't use Rust's process spawning because we want to feed both stdout
    // and stderr into the same pipe, which cannot be done with the existing
    // std::process API.
    let cmdline_nul = CString::new(cmdline)
        .map_err(|_| anyhow::anyhow!("command line contains a nul byte"))?;
    let (pid, mut pipe) = unsafe {
        let pipe = cloexec_pipe()?;
        let read_end = std::fs::File::from_raw_fd(pipe[0]);
        let write_end = std::fs::File::from_raw_fd(pipe[1]);

        let mut actions = PosixSpawnFileActions::new()?;
        // stdout/stderr => pipe
        actions.adddup2(pipe[1], 1)?;
        actions.adddup2(pipe[1], 2)?;
        // close pipe in child
        actions.addclose(pipe[0])?;
        actions.addclose(pipe[1])?;

        let mut pid: libc::pid_t = 0;
        let path = b"/bin/sh\0".as_ptr() as *const libc::c_char;
        let argv: [*mut libc::c_char; 4] = [
            path as *mut libc::c_char,
            b"-c\0".as_ptr() as *mut libc::c_char,
            cmdline_nul.as_ptr() as *mut libc::c_char,
            std::ptr::null_mut(),
        ];

        let spawned = check_ret(
            "posix_spawn",
            libc::posix_spawn(
                &mut pid,
                path,
                actions.as_ptr(),
                std::ptr::null(),
                argv.as_ptr(),
                environ(),
            ),
        );
        // Only the child should hold the write end, so reads see EOF when it exits.
        drop(write_end);
        spawned?;

        (pid, read_end)
    };

    let mut output = Vec::new();
    pipe.read_to_end(&mut output)?;

    let status = unsafe {
        let mut status: i32 = 0;
        loop {
            if libc::waitpid(pid, &mut status, 0) >= 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                anyhow::bail!("waitpid: {}", err);
            }
        }
        std::process::ExitStatus::from_raw(status)
    };

    let termination = if status.success() {
        Termination::Success
    } else if let Some(sig) = status.signal() {
        match sig {
            libc::SIGINT => {
                write!(output, "interrupted")?;
                Termination::Interrupted
            }
            _ => {
                write!(output, "signal {}", sig)?;
                Termination::Failure(None)
            }
        }
    } else {
        Termination::Failure(status.code())
    };

    Ok((termination, output))
}
