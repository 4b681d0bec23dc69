//! Minimal WASI `preview1` host for the compiler module
//!
//! The compiler reads its sources through ordinary libc file calls, which a
//! WASI build lowers to the `wasi_snapshot_preview1` imports below. They are
//! served from the instance's [`VirtualFs`]: one preopened directory (`/`)
//! covering the whole virtual namespace, including any mounts. Guest stdout
//! and stderr are forwarded to `tracing`.
//!
//! Apart from `env.emscripten_notify_memory_growth`, no other import is
//! provided; the linker turns them into traps. An Emscripten build that
//! expects its JavaScript glue will not run here.
//!
//! Every syscall is a method on [`WasiState`] working on the raw memory
//! slice; the linker glue at the bottom only fetches memory and state from
//! the store.

use rand::RngCore;
use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use wasmtime::{Caller, Linker};

use super::instance::HostState;
use super::memory::{GuestPtr, read_bytes, read_u32, write_bytes, write_u32, write_u64};
use super::vfs::{FsError, Node, VirtualFs, join};
use crate::error::{BridgeError, BridgeResult};

const MODULE: &str = "wasi_snapshot_preview1";

pub type Errno = u16;

/// WASI errno values used by the shim
pub mod errno {
    use super::Errno;

    pub const SUCCESS: Errno = 0;
    pub const BADF: Errno = 8;
    pub const EXIST: Errno = 20;
    pub const FAULT: Errno = 21;
    pub const INVAL: Errno = 28;
    pub const IO: Errno = 29;
    pub const ISDIR: Errno = 31;
    pub const NOENT: Errno = 44;
    pub const NOTDIR: Errno = 54;
    pub const ROFS: Errno = 69;
    pub const SPIPE: Errno = 70;
}

mod filetype {
    pub const CHARACTER_DEVICE: u8 = 2;
    pub const DIRECTORY: u8 = 3;
    pub const REGULAR_FILE: u8 = 4;
}

mod oflags {
    pub const CREAT: i32 = 1;
    pub const DIRECTORY: i32 = 2;
    pub const EXCL: i32 = 4;
    pub const TRUNC: i32 = 8;
}

const RIGHT_FD_WRITE: i64 = 1 << 6;

/// File descriptor of the preopened root directory
pub const ROOT_FD: u32 = 3;

type SysResult<T = ()> = Result<T, Errno>;

fn fault<T>(r: BridgeResult<T>) -> SysResult<T> {
    r.map_err(|_| errno::FAULT)
}

fn fs_errno(e: FsError) -> Errno {
    match e {
        FsError::NotFound => errno::NOENT,
        FsError::NotDir => errno::NOTDIR,
        FsError::IsDir => errno::ISDIR,
        FsError::Exists => errno::EXIST,
        FsError::ReadOnly => errno::ROFS,
        FsError::Io => errno::IO,
    }
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    data: Vec<u8>,
    pos: u64,
    writable: bool,
    dirty: bool,
}

#[derive(Debug)]
enum Descriptor {
    Stdin,
    Stdout,
    Stderr,
    Dir { path: String },
    File(OpenFile),
}

/// Longest unterminated line kept before it is emitted as is
const MAX_PENDING_LINE: usize = 4096;

/// Line-oriented sink for guest output
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8], stream: &str) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            emit(stream, &line[..line.len() - 1]);
        }
        while self.pending.len() > MAX_PENDING_LINE {
            let chunk: Vec<u8> = self.pending.drain(..MAX_PENDING_LINE).collect();
            emit(stream, &chunk);
        }
    }

    fn flush(&mut self, stream: &str) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            emit(stream, &line);
        }
    }
}

fn emit(stream: &str, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    if stream == "stderr" {
        info!(target: "funcbridge::guest", stream, "{}", line);
    } else {
        debug!(target: "funcbridge::guest", stream, "{}", line);
    }
}

/// Per-instance WASI descriptor table
#[derive(Debug)]
pub struct WasiState {
    fds: HashMap<u32, Descriptor>,
    next_fd: u32,
    stdout: LineBuffer,
    stderr: LineBuffer,
    started: Instant,
}

impl Default for WasiState {
    fn default() -> Self {
        Self::new()
    }
}

impl WasiState {
    pub fn new() -> Self {
        let mut fds = HashMap::new();
        fds.insert(0, Descriptor::Stdin);
        fds.insert(1, Descriptor::Stdout);
        fds.insert(2, Descriptor::Stderr);
        fds.insert(
            ROOT_FD,
            Descriptor::Dir {
                path: "/".to_string(),
            },
        );
        Self {
            fds,
            next_fd: ROOT_FD + 1,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            started: Instant::now(),
        }
    }

    /// Number of descriptors currently open, stdio and the root included
    pub fn open_count(&self) -> usize {
        self.fds.len()
    }

    fn insert(&mut self, desc: Descriptor) -> u32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(fd, desc);
        fd
    }

    fn dir_path(&self, fd: u32) -> SysResult<&str> {
        match self.fds.get(&fd) {
            Some(Descriptor::Dir { path }) => Ok(path),
            Some(_) => Err(errno::NOTDIR),
            None => Err(errno::BADF),
        }
    }

    fn guest_path(mem: &[u8], ptr: u32, len: u32) -> SysResult<String> {
        let bytes = fault(read_bytes(mem, GuestPtr::new(ptr), len))?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| errno::INVAL)
    }

    pub fn args_sizes_get(&self, mem: &mut [u8], count: u32, buf_size: u32) -> SysResult {
        fault(write_u32(mem, GuestPtr::new(count), 0))?;
        fault(write_u32(mem, GuestPtr::new(buf_size), 0))
    }

    pub fn clock_time_get(&self, mem: &mut [u8], clock: i32, out: u32) -> SysResult {
        let nanos = if clock == 0 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        } else {
            self.started.elapsed().as_nanos()
        };
        fault(write_u64(mem, GuestPtr::new(out), nanos as u64))
    }

    pub fn random_get(&self, mem: &mut [u8], buf: u32, len: u32) -> SysResult {
        let start = buf as usize;
        let slice = start
            .checked_add(len as usize)
            .and_then(|end| mem.get_mut(start..end))
            .ok_or(errno::FAULT)?;
        rand::thread_rng().fill_bytes(slice);
        Ok(())
    }

    pub fn fd_close(&mut self, fs: &mut VirtualFs, fd: u32) -> SysResult {
        match self.fds.remove(&fd) {
            Some(Descriptor::File(file)) if file.dirty => fs
                .put_file(&file.path, file.data)
                .map_err(fs_errno),
            Some(_) => Ok(()),
            None => Err(errno::BADF),
        }
    }

    fn iovecs(mem: &[u8], iovs: u32, count: u32) -> SysResult<Vec<(u32, u32)>> {
        (0..count)
            .map(|i| {
                let base = GuestPtr::new(iovs).offset(i.saturating_mul(8));
                let buf = fault(read_u32(mem, base))?;
                let len = fault(read_u32(mem, base.offset(4)))?;
                Ok((buf, len))
            })
            .collect()
    }

    pub fn fd_read(&mut self, mem: &mut [u8], fd: u32, iovs: u32, count: u32, nread: u32) -> SysResult {
        let vecs = Self::iovecs(mem, iovs, count)?;
        let total = match self.fds.get_mut(&fd) {
            Some(Descriptor::File(file)) => {
                let mut total = 0u32;
                for (buf, len) in vecs {
                    let pos = (file.pos as usize).min(file.data.len());
                    let n = (len as usize).min(file.data.len() - pos);
                    fault(write_bytes(mem, GuestPtr::new(buf), &file.data[pos..pos + n]))?;
                    file.pos += n as u64;
                    total += n as u32;
                    if n < len as usize {
                        break;
                    }
                }
                total
            }
            Some(Descriptor::Stdin) => 0,
            Some(Descriptor::Dir { .. }) => return Err(errno::ISDIR),
            Some(_) | None => return Err(errno::BADF),
        };
        fault(write_u32(mem, GuestPtr::new(nread), total))
    }

    pub fn fd_write(&mut self, mem: &mut [u8], fd: u32, iovs: u32, count: u32, nwritten: u32) -> SysResult {
        let vecs = Self::iovecs(mem, iovs, count)?;
        let total = vecs
            .iter()
            .try_fold(0u32, |total, (_, len)| total.checked_add(*len))
            .ok_or(errno::INVAL)?;
        for (buf, len) in vecs {
            let bytes = fault(read_bytes(mem, GuestPtr::new(buf), len))?;
            match self.fds.get_mut(&fd) {
                Some(Descriptor::Stdout) => self.stdout.push(bytes, "stdout"),
                Some(Descriptor::Stderr) => self.stderr.push(bytes, "stderr"),
                Some(Descriptor::File(file)) if file.writable => {
                    let pos = file.pos as usize;
                    if file.data.len() < pos + bytes.len() {
                        file.data.resize(pos + bytes.len(), 0);
                    }
                    file.data[pos..pos + bytes.len()].copy_from_slice(bytes);
                    file.pos += bytes.len() as u64;
                    file.dirty = true;
                }
                Some(Descriptor::Dir { .. }) => return Err(errno::ISDIR),
                Some(_) | None => return Err(errno::BADF),
            }
        }
        fault(write_u32(mem, GuestPtr::new(nwritten), total))
    }

    pub fn fd_seek(&mut self, mem: &mut [u8], fd: u32, offset: i64, whence: i32, out: u32) -> SysResult {
        let file = match self.fds.get_mut(&fd) {
            Some(Descriptor::File(file)) => file,
            Some(Descriptor::Dir { .. }) => return Err(errno::ISDIR),
            Some(_) => return Err(errno::SPIPE),
            None => return Err(errno::BADF),
        };
        let base = match whence {
            0 => 0i64,
            1 => file.pos as i64,
            2 => file.data.len() as i64,
            _ => return Err(errno::INVAL),
        };
        let target = base.checked_add(offset).filter(|t| *t >= 0).ok_or(errno::INVAL)?;
        file.pos = target as u64;
        fault(write_u64(mem, GuestPtr::new(out), file.pos))
    }

    pub fn fd_tell(&self, mem: &mut [u8], fd: u32, out: u32) -> SysResult {
        match self.fds.get(&fd) {
            Some(Descriptor::File(file)) => fault(write_u64(mem, GuestPtr::new(out), file.pos)),
            Some(_) => Err(errno::SPIPE),
            None => Err(errno::BADF),
        }
    }

    fn filetype_of(desc: &Descriptor) -> u8 {
        match desc {
            Descriptor::Stdin | Descriptor::Stdout | Descriptor::Stderr => {
                filetype::CHARACTER_DEVICE
            }
            Descriptor::Dir { .. } => filetype::DIRECTORY,
            Descriptor::File(_) => filetype::REGULAR_FILE,
        }
    }

    pub fn fd_fdstat_get(&self, mem: &mut [u8], fd: u32, out: u32) -> SysResult {
        let desc = self.fds.get(&fd).ok_or(errno::BADF)?;
        let out = GuestPtr::new(out);
        fault(write_bytes(mem, out, &[0u8; 24]))?;
        fault(write_bytes(mem, out, &[Self::filetype_of(desc)]))?;
        fault(write_u64(mem, out.offset(8), u64::MAX))?;
        fault(write_u64(mem, out.offset(16), u64::MAX))
    }

    fn write_filestat(mem: &mut [u8], out: u32, filetype: u8, size: u64) -> SysResult {
        let out = GuestPtr::new(out);
        fault(write_bytes(mem, out, &[0u8; 64]))?;
        fault(write_bytes(mem, out.offset(16), &[filetype]))?;
        fault(write_u64(mem, out.offset(24), 1))?;
        fault(write_u64(mem, out.offset(32), size))
    }

    pub fn fd_filestat_get(&self, mem: &mut [u8], fd: u32, out: u32) -> SysResult {
        let desc = self.fds.get(&fd).ok_or(errno::BADF)?;
        let size = match desc {
            Descriptor::File(file) => file.data.len() as u64,
            _ => 0,
        };
        Self::write_filestat(mem, out, Self::filetype_of(desc), size)
    }

    pub fn fd_prestat_get(&self, mem: &mut [u8], fd: u32, out: u32) -> SysResult {
        if fd != ROOT_FD || !self.fds.contains_key(&fd) {
            return Err(errno::BADF);
        }
        let out = GuestPtr::new(out);
        fault(write_bytes(mem, out, &[0u8; 8]))?;
        fault(write_u32(mem, out.offset(4), 1))
    }

    pub fn fd_prestat_dir_name(&self, mem: &mut [u8], fd: u32, path: u32, len: u32) -> SysResult {
        if fd != ROOT_FD || !self.fds.contains_key(&fd) {
            return Err(errno::BADF);
        }
        if len < 1 {
            return Err(errno::INVAL);
        }
        fault(write_bytes(mem, GuestPtr::new(path), b"/"))
    }

    pub fn path_filestat_get(
        &self,
        mem: &mut [u8],
        fs: &VirtualFs,
        fd: u32,
        path: u32,
        len: u32,
        out: u32,
    ) -> SysResult {
        let full = join(self.dir_path(fd)?, &Self::guest_path(mem, path, len)?);
        match fs.lookup(&full).map_err(fs_errno)? {
            Node::Dir => Self::write_filestat(mem, out, filetype::DIRECTORY, 0),
            Node::File(data) => {
                Self::write_filestat(mem, out, filetype::REGULAR_FILE, data.len() as u64)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_open(
        &mut self,
        mem: &mut [u8],
        fs: &mut VirtualFs,
        fd: u32,
        path: u32,
        len: u32,
        open_flags: i32,
        rights: i64,
        out: u32,
    ) -> SysResult {
        let full = join(self.dir_path(fd)?, &Self::guest_path(mem, path, len)?);
        let writable = rights & RIGHT_FD_WRITE != 0;
        let truncate = open_flags & oflags::TRUNC != 0;

        let desc = match fs.lookup(&full) {
            Ok(Node::Dir) => {
                if writable || truncate {
                    return Err(errno::ISDIR);
                }
                Descriptor::Dir { path: full }
            }
            Ok(Node::File(data)) => {
                if open_flags & oflags::DIRECTORY != 0 {
                    return Err(errno::NOTDIR);
                }
                if open_flags & oflags::CREAT != 0 && open_flags & oflags::EXCL != 0 {
                    return Err(errno::EXIST);
                }
                if (writable || truncate) && fs.is_mounted(&full) {
                    return Err(errno::ROFS);
                }
                Descriptor::File(OpenFile {
                    path: full,
                    data: if truncate { Vec::new() } else { data.to_vec() },
                    pos: 0,
                    writable,
                    dirty: truncate,
                })
            }
            Err(FsError::NotFound) if open_flags & oflags::CREAT != 0 => {
                fs.put_file(&full, Vec::new()).map_err(fs_errno)?;
                Descriptor::File(OpenFile {
                    path: full,
                    data: Vec::new(),
                    pos: 0,
                    writable,
                    dirty: false,
                })
            }
            Err(e) => return Err(fs_errno(e)),
        };

        let new_fd = self.insert(desc);
        fault(write_u32(mem, GuestPtr::new(out), new_fd))
    }
}

impl Drop for WasiState {
    fn drop(&mut self) {
        self.stdout.flush("stdout");
        self.stderr.flush("stderr");
    }
}

/// Run a syscall against the calling instance's memory and state
fn dispatch(
    caller: &mut Caller<'_, HostState>,
    f: impl FnOnce(&mut [u8], &mut WasiState, &mut VirtualFs) -> SysResult,
) -> i32 {
    let Some(memory) = caller.data().memory else {
        return i32::from(errno::FAULT);
    };
    let (mem, state) = memory.data_and_store_mut(&mut *caller);
    let HostState { wasi, fs, .. } = state;
    match f(mem, wasi, fs) {
        Ok(()) => i32::from(errno::SUCCESS),
        Err(e) => i32::from(e),
    }
}

fn link_error(e: wasmtime::Error) -> BridgeError {
    BridgeError::Instantiation(format!("failed to define WASI import: {}", e))
}

/// Register the WASI imports on `linker`
pub fn add_to_linker(linker: &mut Linker<HostState>) -> BridgeResult<()> {
    linker
        .func_wrap(MODULE, "args_sizes_get", |mut caller: Caller<'_, HostState>, count: i32, size: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.args_sizes_get(mem, count as u32, size as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "args_get", |_caller: Caller<'_, HostState>, _argv: i32, _buf: i32| {
            i32::from(errno::SUCCESS)
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "environ_sizes_get", |mut caller: Caller<'_, HostState>, count: i32, size: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.args_sizes_get(mem, count as u32, size as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "environ_get", |_caller: Caller<'_, HostState>, _env: i32, _buf: i32| {
            i32::from(errno::SUCCESS)
        })
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "clock_time_get",
            |mut caller: Caller<'_, HostState>, clock: i32, _precision: i64, out: i32| {
                dispatch(&mut caller, |mem, wasi, _| wasi.clock_time_get(mem, clock, out as u32))
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "random_get", |mut caller: Caller<'_, HostState>, buf: i32, len: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.random_get(mem, buf as u32, len as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "sched_yield", |_caller: Caller<'_, HostState>| {
            i32::from(errno::SUCCESS)
        })
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "proc_exit",
            |_caller: Caller<'_, HostState>, code: i32| -> wasmtime::Result<()> {
                Err(wasmtime::Error::msg(format!(
                    "compiler module exited with status {}",
                    code
                )))
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "fd_close", |mut caller: Caller<'_, HostState>, fd: i32| {
            dispatch(&mut caller, |_, wasi, fs| wasi.fd_close(fs, fd as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "fd_read",
            |mut caller: Caller<'_, HostState>, fd: i32, iovs: i32, count: i32, nread: i32| {
                dispatch(&mut caller, |mem, wasi, _| {
                    wasi.fd_read(mem, fd as u32, iovs as u32, count as u32, nread as u32)
                })
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "fd_write",
            |mut caller: Caller<'_, HostState>, fd: i32, iovs: i32, count: i32, nwritten: i32| {
                dispatch(&mut caller, |mem, wasi, _| {
                    wasi.fd_write(mem, fd as u32, iovs as u32, count as u32, nwritten as u32)
                })
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "fd_seek",
            |mut caller: Caller<'_, HostState>, fd: i32, offset: i64, whence: i32, out: i32| {
                dispatch(&mut caller, |mem, wasi, _| {
                    wasi.fd_seek(mem, fd as u32, offset, whence, out as u32)
                })
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "fd_tell", |mut caller: Caller<'_, HostState>, fd: i32, out: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.fd_tell(mem, fd as u32, out as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "fd_fdstat_get", |mut caller: Caller<'_, HostState>, fd: i32, out: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.fd_fdstat_get(mem, fd as u32, out as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "fd_filestat_get", |mut caller: Caller<'_, HostState>, fd: i32, out: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.fd_filestat_get(mem, fd as u32, out as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(MODULE, "fd_prestat_get", |mut caller: Caller<'_, HostState>, fd: i32, out: i32| {
            dispatch(&mut caller, |mem, wasi, _| wasi.fd_prestat_get(mem, fd as u32, out as u32))
        })
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "fd_prestat_dir_name",
            |mut caller: Caller<'_, HostState>, fd: i32, path: i32, len: i32| {
                dispatch(&mut caller, |mem, wasi, _| {
                    wasi.fd_prestat_dir_name(mem, fd as u32, path as u32, len as u32)
                })
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "path_filestat_get",
            |mut caller: Caller<'_, HostState>, fd: i32, _flags: i32, path: i32, len: i32, out: i32| {
                dispatch(&mut caller, |mem, wasi, fs| {
                    wasi.path_filestat_get(mem, fs, fd as u32, path as u32, len as u32, out as u32)
                })
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            MODULE,
            "path_open",
            |mut caller: Caller<'_, HostState>,
             fd: i32,
             _dirflags: i32,
             path: i32,
             len: i32,
             open_flags: i32,
             rights: i64,
             _inheriting: i64,
             _fdflags: i32,
             out: i32| {
                dispatch(&mut caller, |mem, wasi, fs| {
                    wasi.path_open(
                        mem,
                        fs,
                        fd as u32,
                        path as u32,
                        len as u32,
                        open_flags,
                        rights,
                        out as u32,
                    )
                })
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap("env", "emscripten_notify_memory_growth", |_caller: Caller<'_, HostState>, _index: i32| {})
        .map_err(link_error)?;
    Ok(())
}
