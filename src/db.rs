//! The build database stores information about previous builds for
//! determining which files are up to date.
//!
//! It is an append-only log.  After a header, records are either:
//! - a path record: u16 length (top bit clear) then that many bytes of
//!   UTF-8 path, implicitly assigning the next db id to that path;
//! - a build record: u16 output count with the top bit set, then the u32
//!   db ids of the outputs, a u32 count of discovered inputs and their ids,
//!   then the signature (u64 watermark in nanoseconds since the epoch with
//!   0 meaning missing, u64 command hash).
//!
//! Later build records for the same outputs override earlier ones.

use crate::densemap::{self, DenseMap};
use crate::error::Error;
use crate::fs::MTime;
use crate::graph::{BuildId, FileId, Graph};
use crate::hash::{Hash, Signature, Signatures};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const DEFAULT_PATH: &str = ".shuriken_db";

const SIGNATURE: &[u8] = b"shuriken_db";
const VERSION: u32 = 1;

const BUILD_RECORD: u16 = 0b1000_0000_0000_0000;
const MAX_PATH_LEN: usize = (BUILD_RECORD - 1) as usize;

/// Files are identified by integers that are stable across db runs.
#[derive(Debug, Clone, Copy)]
pub struct Id(u32);
impl densemap::Index for Id {
    fn index(&self) -> usize {
        self.0 as usize
    }
}
impl From<usize> for Id {
    fn from(u: usize) -> Id {
        Id(u as u32)
    }
}

/// The loaded state of a database, as needed to make updates to the stored
/// state.  Other state is directly loaded into the build graph.
#[derive(Default)]
struct IdMap {
    /// Maps db::Id to FileId.
    fileids: DenseMap<Id, FileId>,
    /// Maps FileId to db::Id.
    db_ids: FxHashMap<FileId, Id>,
}

fn mtime_to_nanos(mtime: MTime) -> u64 {
    match mtime {
        MTime::Missing => 0,
        MTime::Stamp(t) => match t.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => (d.as_nanos() as u64).max(1),
            Err(_) => 1,
        },
    }
}

fn nanos_to_mtime(nanos: u64) -> MTime {
    match nanos {
        0 => MTime::Missing,
        n => MTime::Stamp(SystemTime::UNIX_EPOCH + Duration::from_nanos(n)),
    }
}

/// An opened database, ready for writes.
pub struct Writer {
    path: PathBuf,
    ids: IdMap,
    w: BufWriter<File>,
}

impl Writer {
    fn create(path: &Path) -> std::io::Result<Self> {
        let f = std::fs::File::create(path)?;
        let mut w = Self::from_opened(path, IdMap::default(), f);
        w.w.write_all(SIGNATURE)?;
        w.w.write_all(&VERSION.to_le_bytes())?;
        w.w.flush()?;
        Ok(w)
    }

    fn from_opened(path: &Path, ids: IdMap, w: File) -> Self {
        Writer {
            path: path.to_path_buf(),
            ids,
            w: BufWriter::new(w),
        }
    }

    fn write_path(&mut self, name: &str) -> std::io::Result<()> {
        if name.is_empty() || name.len() > MAX_PATH_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path of length {} can't be recorded", name.len()),
            ));
        }
        self.w.write_all(&(name.len() as u16).to_le_bytes())?;
        self.w.write_all(name.as_bytes())
    }

    fn ensure_id(&mut self, graph: &Graph, fileid: FileId) -> std::io::Result<Id> {
        if let Some(&id) = self.ids.db_ids.get(&fileid) {
            return Ok(id);
        }
        self.write_path(&graph.file(fileid).name)?;
        let id = self.ids.fileids.push(fileid);
        self.ids.db_ids.insert(fileid, id);
        Ok(id)
    }

    fn write_build_record(
        &mut self,
        graph: &Graph,
        id: BuildId,
        sig: &Signature,
    ) -> std::io::Result<()> {
        let build = graph.build(id);
        let mut out_ids = Vec::with_capacity(build.outs().len());
        for &out in build.outs() {
            out_ids.push(self.ensure_id(graph, out)?);
        }
        let mut dep_ids = Vec::with_capacity(build.discovered_ins().len());
        for &dep in build.discovered_ins() {
            dep_ids.push(self.ensure_id(graph, dep)?);
        }

        self.w.write_all(&(BUILD_RECORD | out_ids.len() as u16).to_le_bytes())?;
        for id in out_ids {
            self.w.write_all(&id.0.to_le_bytes())?;
        }
        self.w.write_all(&(dep_ids.len() as u32).to_le_bytes())?;
        for id in dep_ids {
            self.w.write_all(&id.0.to_le_bytes())?;
        }
        self.w.write_all(&mtime_to_nanos(sig.watermark).to_le_bytes())?;
        self.w.write_all(&sig.command.0.to_le_bytes())?;
        self.w.flush()
    }

    /// Record a successful build: its outputs, discovered inputs and signature.
    pub fn write_build(&mut self, graph: &Graph, id: BuildId, sig: &Signature) -> Result<(), Error> {
        if graph.build(id).outs().len() >= BUILD_RECORD as usize {
            return Err(Error::Db {
                path: self.path.clone(),
                message: "too many outputs to record".into(),
            });
        }
        self.write_build_record(graph, id, sig)
            .map_err(|err| Error::io(&self.path, err))
    }
}

/// Reads a little-endian record stream out of the db contents.
struct Reader<'a> {
    buf: &'a [u8],
    ofs: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.ofs.checked_add(n)?;
        let bytes = self.buf.get(self.ofs..end)?;
        self.ofs = end;
        Some(bytes)
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Option<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Some(u64::from_le_bytes(bytes))
    }

    fn read_ids(&mut self, ids: &IdMap, count: usize) -> Result<Option<Vec<FileId>>, String> {
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let id = match self.read_u32() {
                Some(id) => Id(id),
                None => return Ok(None),
            };
            match ids.fileids.lookup(id) {
                Some(&fileid) => out.push(fileid),
                None => return Err(format!("reference to unknown path id {}", id.0)),
            }
        }
        Ok(Some(out))
    }
}

/// What one record produced; None from read_record means the log ended,
/// possibly partway through a record.
enum Record {
    Path,
    Build,
}

fn read_record(
    r: &mut Reader,
    graph: &mut Graph,
    ids: &mut IdMap,
    signatures: &mut Signatures,
) -> Result<Option<Record>, String> {
    let tag = match r.read_u16() {
        Some(tag) => tag,
        None => return Ok(None),
    };
    if tag & BUILD_RECORD == 0 {
        let bytes = match r.take(tag as usize) {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let name = std::str::from_utf8(bytes).map_err(|err| err.to_string())?;
        let fileid = graph.file_id(name);
        let id = ids.fileids.push(fileid);
        ids.db_ids.insert(fileid, id);
        return Ok(Some(Record::Path));
    }

    let outs = match r.read_ids(ids, (tag & !BUILD_RECORD) as usize)? {
        Some(outs) => outs,
        None => return Ok(None),
    };
    let dep_count = match r.read_u32() {
        Some(n) => n as usize,
        None => return Ok(None),
    };
    let deps = match r.read_ids(ids, dep_count)? {
        Some(deps) => deps,
        None => return Ok(None),
    };
    let (watermark, command) = match (r.read_u64(), r.read_u64()) {
        (Some(w), Some(c)) => (nanos_to_mtime(w), Hash(c)),
        _ => return Ok(None),
    };

    // The record only applies if the build still declares exactly these outputs.
    let bid = match outs.first().and_then(|&out| graph.file(out).input) {
        Some(bid) => bid,
        None => return Ok(Some(Record::Build)),
    };
    if graph.build(bid).outs() != outs.as_slice() {
        return Ok(Some(Record::Build));
    }
    graph.set_discovered_ins(bid, deps);
    signatures.set(bid, Signature { watermark, command });
    Ok(Some(Record::Build))
}

/// Load the database at `path` into the graph and signatures, creating it if
/// it doesn't exist, and return a Writer for appending further records.
pub fn open(path: &Path, graph: &mut Graph, signatures: &mut Signatures) -> Result<Writer, Error> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "creating build database");
            return Writer::create(path).map_err(|err| Error::io(path, err));
        }
        Err(err) => return Err(Error::io(path, err)),
    };

    let db_error = |message: String| Error::Db {
        path: path.to_path_buf(),
        message,
    };

    let header_len = SIGNATURE.len() + 4;
    if data.len() < header_len || &data[..SIGNATURE.len()] != SIGNATURE {
        return Err(db_error("unrecognized header".into()));
    }
    let version = u32::from_le_bytes([
        data[SIGNATURE.len()],
        data[SIGNATURE.len() + 1],
        data[SIGNATURE.len() + 2],
        data[SIGNATURE.len() + 3],
    ]);
    if version != VERSION {
        return Err(db_error(format!(
            "version {} unsupported (expected {})",
            version, VERSION
        )));
    }

    let mut r = Reader {
        buf: &data,
        ofs: header_len,
    };
    let mut ids = IdMap::default();
    let mut good_end = r.ofs;
    let mut builds = 0;
    while let Some(record) = read_record(&mut r, graph, &mut ids, signatures).map_err(db_error)? {
        if let Record::Build = record {
            builds += 1;
        }
        good_end = r.ofs;
    }

    let f = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|err| Error::io(path, err))?;
    if good_end < data.len() {
        // A previous run was interrupted mid-write; drop the partial record
        // so new records append cleanly.
        tracing::warn!(
            path = %path.display(),
            bytes = data.len() - good_end,
            "discarding truncated build database record"
        );
        f.set_len(good_end as u64)
            .map_err(|err| Error::io(path, err))?;
    }
    tracing::debug!(path = %path.display(), paths = ids.fileids.len(), builds, "loaded build database");
    Ok(Writer::from_opened(path, ids, f))
}
