//! Response files: moving command arguments into a file referenced as
//! `@path`, either because the build declared one or because the command
//! line is too long for the OS to accept.

use crate::error::Error;
use crate::graph::RspFile;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Linux caps any single argv string at MAX_ARG_STRLEN (32 pages) including
/// its nul, and the whole command is one argument to `/bin/sh -c`.
#[cfg(target_os = "linux")]
fn platform_threshold() -> usize {
    131072 - 1
}

#[cfg(all(unix, not(target_os = "linux")))]
fn platform_threshold() -> usize {
    // Safety: sysconf has no preconditions.
    let arg_max = unsafe { libc::sysconf(libc::_SC_ARG_MAX) };
    if arg_max <= 0 {
        return 8191;
    }
    // ARG_MAX covers argv and the environment together.
    let env_len: usize = std::env::vars_os()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    (arg_max as usize).saturating_sub(env_len + 4096).max(8191)
}

#[cfg(not(unix))]
fn platform_threshold() -> usize {
    8191
}

/// Longest command line, in bytes, that is passed as-is.
pub fn default_threshold() -> usize {
    platform_threshold()
}

/// Controls when and where command lines are moved into response files.
#[derive(Debug, Clone)]
pub struct RspConfig {
    /// Command lines longer than this many bytes are externalized.
    pub threshold: usize,
    /// Keep response files of failed commands around for inspection.
    pub keep_on_failure: bool,
    /// Directory for generated response files; the system temp dir if None.
    pub dir: Option<PathBuf>,
}

impl Default for RspConfig {
    fn default() -> Self {
        RspConfig {
            threshold: default_threshold(),
            keep_on_failure: false,
            dir: None,
        }
    }
}

/// Split a command line into its program token and the argument text that
/// follows it.  Quotes within the program token are honored.
pub fn split_program(cmdline: &str) -> (&str, &str) {
    let trimmed = cmdline.trim_start();
    let lead = cmdline.len() - trimmed.len();
    let bytes = trimmed.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(b'"') if c == b'\\' => i += 1,
            Some(_) => {}
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'\\' => i += 1,
                b' ' | b'\t' | b'\n' => break,
                _ => {}
            },
        }
        i += 1;
    }
    let end = lead + i.min(bytes.len());
    (&cmdline[..end], cmdline[end..].trim_start())
}

fn shell_quote(arg: &str) -> String {
    let safe = arg
        .bytes()
        .all(|c| c.is_ascii_alphanumeric() || b"@%_+=:,./-".contains(&c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// A command line ready to run, possibly referencing a generated response
/// file.  The response file lives as long as this value and is removed when
/// it is dropped, unless `finish` keeps it.
pub struct PreparedCommand {
    pub cmdline: String,
    rsp: Option<TempPath>,
}

impl PreparedCommand {
    pub fn rsp_path(&self) -> Option<&Path> {
        self.rsp.as_deref()
    }

    /// Dispose of the response file according to the command's outcome.
    pub fn finish(self, success: bool, config: &RspConfig) {
        let rsp = match self.rsp {
            Some(rsp) => rsp,
            None => return,
        };
        if !success && config.keep_on_failure {
            match rsp.keep() {
                Ok(path) => tracing::info!(path = %path.display(), "kept response file of failed command"),
                Err(err) => tracing::warn!(%err, "failed to keep response file"),
            }
            return;
        }
        let path = rsp.to_path_buf();
        if let Err(err) = rsp.close() {
            tracing::warn!(path = %path.display(), %err, "failed to remove response file");
        }
    }
}

/// Decide whether `cmdline` needs a response file and, if so, write the
/// argument text to a fresh temporary file and reference it as `@path`.
/// The file is complete and closed when this returns.
pub fn prepare(cmdline: &str, config: &RspConfig) -> Result<PreparedCommand, Error> {
    if cmdline.len() <= config.threshold {
        return Ok(PreparedCommand {
            cmdline: cmdline.to_string(),
            rsp: None,
        });
    }
    let (program, args) = split_program(cmdline);
    if args.is_empty() {
        tracing::warn!(len = cmdline.len(), "command too long but has no arguments to move");
        return Ok(PreparedCommand {
            cmdline: cmdline.to_string(),
            rsp: None,
        });
    }

    let dir = match &config.dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir(),
    };
    let mut file = tempfile::Builder::new()
        .prefix("shuriken.")
        .suffix(".rsp")
        .tempfile_in(&dir)
        .map_err(|err| Error::io(&dir, err))?;
    file.write_all(args.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|err| Error::io(file.path(), err))?;
    let rsp = file.into_temp_path();

    let at_path = format!("@{}", rsp.display());
    tracing::debug!(
        len = cmdline.len(),
        threshold = config.threshold,
        path = %rsp.display(),
        "moved command arguments into response file"
    );
    Ok(PreparedCommand {
        cmdline: format!("{} {}", program, shell_quote(&at_path)),
        rsp: Some(rsp),
    })
}

/// Write a build's declared response file, creating parent directories.
pub fn write_declared(rspfile: &RspFile) -> Result<(), Error> {
    if let Some(parent) = rspfile.path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    std::fs::write(&rspfile.path, &rspfile.content).map_err(|err| Error::io(&rspfile.path, err))
}

pub fn remove_declared(rspfile: &RspFile) -> Result<(), Error> {
    match std::fs::remove_file(&rspfile.path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(Error::io(&rspfile.path, err)),
        _ => Ok(()),
    }
}
