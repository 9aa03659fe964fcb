//! The `fs` library: a flat file system confined to one directory
//!
//! Scripts see files by name only. A name is 1 to 16 characters of
//! `[A-Za-z0-9._-]` and may not start with `.`, `_` or `-`, so there is no
//! way to reach a subdirectory, a parent or a hidden file.
//!
//! | function | arguments | results |
//! |---|---|---|
//! | `fs.open(name, mode)` | mode `"r"` (default), `"w"` or `"a"` | descriptor |
//! | `fs.close(fd)` | | |
//! | `fs.readline(fd)` | | next line, or `nil` at end of file |
//! | `fs.readall(fd)` | | array of the remaining lines |
//! | `fs.write(fd, ...)` | strings | |
//! | `fs.writeline(fd, ...)` | strings, each followed by a newline | |
//! | `fs.list()` | | array of file names |
//! | `fs.exist(name)` | | boolean |
//! | `fs.rename(from, to)` | | |
//! | `fs.delete(name)` | | |
//!
//! Failures stop the script with a plain message such as `Invalid file`,
//! `Open failed` or `IO error`.

use crate::error::LibraryError;
use core_types::{ArgCheck, HostError, Value};
use lua_bridge::{LibraryFunction, LuaLibrary};
use regex::Regex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Longest accepted file name.
pub const FILE_NAME_MAX: usize = 16;

/// The first character that makes a name invalid.
const INVALID_CHAR_PATTERN: &str = "^[^A-Za-z0-9]|[^A-Za-z0-9._-]";

enum OpenFile {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

struct FileTable {
    root: PathBuf,
    invalid_char: Regex,
    files: BTreeMap<i64, OpenFile>,
    next_fd: i64,
}

impl FileTable {
    fn path(&self, name: &str) -> Result<PathBuf, HostError> {
        let len = name.chars().count();
        if len == 0 || len > FILE_NAME_MAX {
            return Err(HostError::abort(format!("Invalid file name length: {}", len)));
        }
        if let Some(found) = self.invalid_char.find(name) {
            return Err(HostError::abort(format!(
                "Invalid file name character: {}",
                found.as_str()
            )));
        }
        Ok(self.root.join(name))
    }

    fn open(&mut self, name: &str, mode: &str) -> Result<i64, HostError> {
        let path = self.path(name)?;
        let file = match mode {
            "r" => File::open(&path).map(|f| OpenFile::Reader(BufReader::new(f))),
            "w" => File::create(&path).map(|f| OpenFile::Writer(BufWriter::new(f))),
            "a" => OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .map(|f| OpenFile::Writer(BufWriter::new(f))),
            _ => return Err(HostError::abort("Invalid mode")),
        }
        .map_err(|e| {
            tracing::debug!(path = %path.display(), mode, error = %e, "open failed");
            HostError::abort("Open failed")
        })?;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        Ok(fd)
    }

    fn close(&mut self, fd: i64) -> Result<(), HostError> {
        match self.files.remove(&fd) {
            Some(OpenFile::Writer(mut writer)) => writer.flush().map_err(io_error),
            Some(OpenFile::Reader(_)) => Ok(()),
            None => Err(HostError::abort("Invalid file")),
        }
    }

    fn close_all(&mut self) {
        for (fd, file) in std::mem::take(&mut self.files) {
            if let OpenFile::Writer(mut writer) = file {
                if let Err(e) = writer.flush() {
                    tracing::warn!(fd, error = %e, "flush failed while closing");
                }
            }
        }
    }

    fn reader(&mut self, fd: i64) -> Result<&mut BufReader<File>, HostError> {
        match self.files.get_mut(&fd) {
            Some(OpenFile::Reader(reader)) => Ok(reader),
            Some(OpenFile::Writer(_)) => Err(HostError::abort("Invalid file for read")),
            None => Err(HostError::abort("Invalid file")),
        }
    }

    fn writer(&mut self, fd: i64) -> Result<&mut BufWriter<File>, HostError> {
        match self.files.get_mut(&fd) {
            Some(OpenFile::Writer(writer)) => Ok(writer),
            Some(OpenFile::Reader(_)) => Err(HostError::abort("Invalid file for write")),
            None => Err(HostError::abort("Invalid file")),
        }
    }

    fn list(&self) -> Result<Vec<String>, HostError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reads one line without its terminator; `None` at end of file.
fn read_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

fn io_error(error: io::Error) -> HostError {
    tracing::debug!(%error, "file system call failed");
    HostError::abort("IO error")
}

fn fd_arg(args: &[Value]) -> i64 {
    args.first().and_then(Value::as_integer).unwrap_or(0)
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(Value::as_str).unwrap_or("")
}

fn strings(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

/// The `fs` library rooted at one directory.
///
/// Files left open by scripts are flushed and closed when the engine
/// that owns the library is dropped.
pub struct RestrictedFileSystem {
    table: Rc<RefCell<FileTable>>,
}

impl RestrictedFileSystem {
    /// Creates the library over the existing directory `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory that holds every file scripts can see
    ///
    /// # Returns
    ///
    /// [`LibraryError::NotADirectory`] if `root` is not a directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let root = root.into();
        if !fs::metadata(&root)?.is_dir() {
            return Err(LibraryError::NotADirectory(root));
        }
        let table = FileTable {
            root,
            invalid_char: Regex::new(INVALID_CHAR_PATTERN)?,
            files: BTreeMap::new(),
            next_fd: 1,
        };
        Ok(RestrictedFileSystem {
            table: Rc::new(RefCell::new(table)),
        })
    }

    /// Directory the library is confined to.
    pub fn root(&self) -> PathBuf {
        self.table.borrow().root.clone()
    }

    /// Number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.table.borrow().files.len()
    }

    fn function(
        &self,
        name: &str,
        checks: &[ArgCheck],
        body: impl Fn(&mut FileTable, Vec<Value>) -> Result<Vec<Value>, HostError> + 'static,
    ) -> LibraryFunction {
        let table = Rc::clone(&self.table);
        LibraryFunction::new(name, checks, move |args| {
            let mut table = table
                .try_borrow_mut()
                .map_err(|_| HostError::abort("file system busy"))?;
            body(&mut table, args)
        })
    }
}

impl LuaLibrary for RestrictedFileSystem {
    fn name(&self) -> &str {
        "fs"
    }

    fn functions(&self) -> Vec<LibraryFunction> {
        use ArgCheck::{Long, String as Str, StringOrNil, StringVarArgs};
        vec![
            self.function("open", &[Str, StringOrNil], |t, args| {
                let mode = args.get(1).and_then(Value::as_str).unwrap_or("r");
                Ok(vec![Value::Integer(t.open(str_arg(&args, 0), mode)?)])
            }),
            self.function("close", &[Long], |t, args| {
                t.close(fd_arg(&args))?;
                Ok(Vec::new())
            }),
            self.function("readline", &[Long], |t, args| {
                let line = read_line(t.reader(fd_arg(&args))?).map_err(io_error)?;
                Ok(vec![line.map_or(Value::Nil, Value::String)])
            }),
            self.function("readall", &[Long], |t, args| {
                let reader = t.reader(fd_arg(&args))?;
                let mut lines = Vec::new();
                while let Some(line) = read_line(reader).map_err(io_error)? {
                    lines.push(line);
                }
                Ok(vec![strings(lines)])
            }),
            self.function("write", &[Long, StringVarArgs], |t, args| {
                let writer = t.writer(fd_arg(&args))?;
                for text in args.iter().skip(1).filter_map(Value::as_str) {
                    writer.write_all(text.as_bytes()).map_err(io_error)?;
                }
                Ok(Vec::new())
            }),
            self.function("writeline", &[Long, StringVarArgs], |t, args| {
                let writer = t.writer(fd_arg(&args))?;
                for text in args.iter().skip(1).filter_map(Value::as_str) {
                    writer.write_all(text.as_bytes()).map_err(io_error)?;
                    writer.write_all(b"\n").map_err(io_error)?;
                }
                if args.len() <= 1 {
                    writer.write_all(b"\n").map_err(io_error)?;
                }
                Ok(Vec::new())
            }),
            self.function("list", &[], |t, _| Ok(vec![strings(t.list()?)])),
            self.function("exist", &[Str], |t, args| {
                let path = t.path(str_arg(&args, 0))?;
                Ok(vec![Value::Boolean(path.exists())])
            }),
            self.function("rename", &[Str, Str], |t, args| {
                let from = t.path(str_arg(&args, 0))?;
                let to = t.path(str_arg(&args, 1))?;
                fs::rename(from, to).map_err(io_error)?;
                Ok(Vec::new())
            }),
            self.function("delete", &[Str], |t, args| {
                let path = t.path(str_arg(&args, 0))?;
                remove(&path)?;
                Ok(Vec::new())
            }),
        ]
    }

    fn close(&mut self) {
        match self.table.try_borrow_mut() {
            Ok(mut table) => table.close_all(),
            Err(_) => tracing::warn!("file system closed while in use"),
        }
    }
}

fn remove(path: &Path) -> Result<(), HostError> {
    if path.is_dir() {
        return Err(HostError::abort("IO error"));
    }
    fs::remove_file(path).map_err(io_error)
}
