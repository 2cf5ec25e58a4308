//! Chrome trace output.
//!
//! When opened, phases of the build and each executed task are recorded as
//! "complete" events viewable in chrome://tracing or Perfetto.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(&mut self, name: &str, tid: usize, start: Instant, end: Instant) -> std::io::Result<()> {
        writeln!(
            self.w,
            "{{\"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {}}},",
            tid,
            name,
            start.saturating_duration_since(self.start).as_micros(),
            end.saturating_duration_since(start).as_micros(),
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        // The final event carries no trailing comma, keeping the array valid JSON.
        write!(
            self.w,
            "{{\"pid\": 0, \"tid\": 0, \"name\": \"main\", \"ts\": 0, \"ph\": \"X\", \"dur\": {}}}\n]\n",
            Instant::now().saturating_duration_since(start).as_micros(),
        )?;
        self.w.flush()
    }
}

fn lock() -> MutexGuard<'static, Option<Trace>> {
    // Tracing is best-effort; ignore poisoning.
    TRACE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *lock() = Some(trace);
    Ok(())
}

pub fn enabled() -> bool {
    lock().is_some()
}

/// Record an event spanning `start` to `end` on the given track.
pub fn write_complete(name: &str, tid: usize, start: Instant, end: Instant) {
    if let Some(trace) = lock().as_mut() {
        if let Err(err) = trace.write_complete(name, tid, start, end) {
            tracing::warn!(%err, "writing trace event");
        }
    }
}

/// Run `f`, recording its duration if tracing is enabled.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    write_complete(name, 0, start, Instant::now());
    result
}

/// Finish the trace file, if one is open.
pub fn close() -> std::io::Result<()> {
    match lock().take() {
        Some(mut trace) => trace.close(),
        None => Ok(()),
    }
}
