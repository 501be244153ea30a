//! Resumable session store
//!
//! A session makes a multi-item cp/mirror operation crash-resumable. It is a
//! pair of files under the session directory: a JSON header (command, state,
//! resume cursor, running totals) and an append-only JSON-lines data file
//! holding every TransferItem in enumeration order. The source tree is
//! enumerated exactly once, while populating; resume replays the recorded
//! items from the cursor instead of re-enumerating.
//!
//! The header is rewritten with a temp-file + atomic rename after every
//! completed item, so a crash never leaves a partially written header. The
//! data file is append-only during populating and read-only afterwards.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::write_atomic;
use crate::error::{Error, Result};
use crate::transfer::TransferItem;

pub const SESSION_VERSION: &str = "1";

const HEADER_EXT: &str = "json";
const DATA_EXT: &str = "data";
const SESSION_ID_LEN: usize = 8;

/// Command a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Cp,
    Mirror,
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandType::Cp => write!(f, "cp"),
            CommandType::Mirror => write!(f, "mirror"),
        }
    }
}

/// Lifecycle state, persisted in the header.
///
/// `created -> populating -> active -> completed | cleared`. Only `active`
/// sessions can be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Populating,
    Active,
    Completed,
    Cleared,
}

/// Persisted session header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub id: String,
    pub version: String,
    pub created_at: jiff::Timestamp,
    pub working_dir: PathBuf,
    pub command_type: CommandType,
    pub command_args: Vec<String>,
    pub state: SessionState,
    /// Source URL of the last fully copied item; human-readable mirror of
    /// `cursor`.
    pub last_copied_key: Option<String>,
    /// Index of the last fully copied item in the data stream. Resume starts
    /// at `cursor + 1`. Advances monotonically, never backwards.
    pub cursor: Option<u64>,
    pub total_bytes: u64,
    pub total_objects: u64,
}

/// Manages the session directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn header_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{HEADER_EXT}"))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{DATA_EXT}"))
    }

    /// Allocate a new session with a freshly generated random id.
    pub fn create(&self, command_type: CommandType, command_args: Vec<String>) -> Result<Session> {
        fs::create_dir_all(&self.dir)?;

        let id = new_session_id();
        let header = SessionHeader {
            id: id.clone(),
            version: SESSION_VERSION.to_string(),
            created_at: jiff::Timestamp::now(),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            command_type,
            command_args,
            state: SessionState::Created,
            last_copied_key: None,
            cursor: None,
            total_bytes: 0,
            total_objects: 0,
        };

        let header_path = self.header_path(&id);
        let data_path = self.data_path(&id);
        let data_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&data_path)?;

        let session = Session {
            header: Mutex::new(header),
            header_path,
            data_path,
            data_writer: Mutex::new(Some(BufWriter::new(data_file))),
        };
        session.flush()?;
        Ok(session)
    }

    /// Load a session for resumption. Fails with `InvalidSessionId` unless
    /// both files exist and the session is in the `active` state.
    pub fn load(&self, id: &str) -> Result<Session> {
        if !self.dir.exists() {
            return Err(Error::SessionDirMissing(self.dir.display().to_string()));
        }

        let header_path = self.header_path(id);
        let data_path = self.data_path(id);
        if !header_path.exists() || !data_path.exists() {
            return Err(Error::InvalidSessionId(id.to_string()));
        }

        let header = read_header(&header_path)?;
        if header.state != SessionState::Active {
            return Err(Error::InvalidSessionId(id.to_string()));
        }

        Ok(Session {
            header: Mutex::new(header),
            header_path,
            data_path,
            data_writer: Mutex::new(None),
        })
    }

    /// All persisted session headers, sorted by creation time.
    ///
    /// Unreadable headers are skipped with a warning rather than failing the
    /// whole listing.
    pub fn list(&self) -> Result<Vec<SessionHeader>> {
        let mut headers = Vec::new();
        if !self.dir.exists() {
            return Ok(headers);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(HEADER_EXT) {
                continue;
            }
            match read_header(&path) {
                Ok(header) => headers.push(header),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping broken session");
                }
            }
        }
        headers.sort_by_key(|h| h.created_at);
        Ok(headers)
    }

    /// Explicit user-issued clear: delete the file pair regardless of
    /// progress.
    pub fn clear(&self, id: &str) -> Result<()> {
        if !self.dir.exists() {
            return Err(Error::SessionDirMissing(self.dir.display().to_string()));
        }
        let header_path = self.header_path(id);
        if !header_path.exists() {
            return Err(Error::InvalidSessionId(id.to_string()));
        }
        fs::remove_file(&header_path)?;
        let data_path = self.data_path(id);
        if data_path.exists() {
            fs::remove_file(&data_path)?;
        }
        Ok(())
    }
}

/// One in-progress resumable operation.
#[derive(Debug)]
pub struct Session {
    header: Mutex<SessionHeader>,
    header_path: PathBuf,
    data_path: PathBuf,
    data_writer: Mutex<Option<BufWriter<File>>>,
}

impl Session {
    pub fn id(&self) -> String {
        self.header.lock().expect("session header lock").id.clone()
    }

    /// Snapshot of the current header.
    pub fn header(&self) -> SessionHeader {
        self.header.lock().expect("session header lock").clone()
    }

    /// Append one item to the data stream. Moves the session into
    /// `populating` on the first append.
    pub fn add_item(&self, item: &TransferItem) -> Result<()> {
        let mut writer = self.data_writer.lock().expect("session data lock");
        let writer = writer.as_mut().ok_or_else(|| {
            Error::General("session data stream is closed for writing".to_string())
        })?;

        {
            let mut header = self.header.lock().expect("session header lock");
            match header.state {
                SessionState::Created => header.state = SessionState::Populating,
                SessionState::Populating => {}
                state => {
                    return Err(Error::General(format!(
                        "cannot add items to a session in state {state:?}"
                    )));
                }
            }
            header.total_objects += 1;
            header.total_bytes += item.length;
        }

        serde_json::to_writer(&mut *writer, item)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Finish enumeration: sync the data stream, close it for writing and
    /// move into `active`.
    pub fn finish_populating(&self) -> Result<()> {
        {
            let mut writer = self.data_writer.lock().expect("session data lock");
            if let Some(mut w) = writer.take() {
                w.flush()?;
                w.get_ref().sync_all()?;
            }
        }
        {
            let mut header = self.header.lock().expect("session header lock");
            match header.state {
                SessionState::Created | SessionState::Populating => {
                    header.state = SessionState::Active;
                }
                state => {
                    return Err(Error::General(format!(
                        "cannot activate a session in state {state:?}"
                    )));
                }
            }
        }
        self.flush()
    }

    /// Read the full item sequence in original enumeration order.
    pub fn items(&self) -> Result<Vec<TransferItem>> {
        let file = File::open(&self.data_path)?;
        let mut items = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            items.push(serde_json::from_str(&line)?);
        }
        Ok(items)
    }

    /// Index of the first item that still needs processing.
    pub fn resume_index(&self) -> usize {
        let header = self.header.lock().expect("session header lock");
        header.cursor.map(|c| c as usize + 1).unwrap_or(0)
    }

    /// Record item `index` as fully copied and persist the header before the
    /// caller advances.
    pub fn mark_copied(&self, index: usize, item: &TransferItem) -> Result<()> {
        {
            let mut header = self.header.lock().expect("session header lock");
            if header.state != SessionState::Active {
                return Err(Error::General(format!(
                    "cannot record progress in state {:?}",
                    header.state
                )));
            }
            if let Some(cursor) = header.cursor
                && (index as u64) <= cursor
            {
                return Err(Error::General(format!(
                    "session cursor moved backwards: {cursor} -> {index}"
                )));
            }
            header.cursor = Some(index as u64);
            header.last_copied_key = Some(item.source_url.clone());
        }
        self.flush()
    }

    /// Persist the header now. Used by the interrupt handler so the cursor
    /// lands on the last fully completed item.
    pub fn flush(&self) -> Result<()> {
        let header = self.header.lock().expect("session header lock");
        save_header(&header, &self.header_path)
    }

    /// All items processed: delete the header/data pair.
    pub fn complete(&self) -> Result<()> {
        {
            let mut header = self.header.lock().expect("session header lock");
            if header.state != SessionState::Active {
                return Err(Error::General(format!(
                    "cannot complete a session in state {:?}",
                    header.state
                )));
            }
            header.state = SessionState::Completed;
        }
        self.remove_files()
    }

    /// Explicitly abandon the session, deleting both files.
    pub fn delete(&self) -> Result<()> {
        {
            let mut header = self.header.lock().expect("session header lock");
            header.state = SessionState::Cleared;
        }
        self.remove_files()
    }

    fn remove_files(&self) -> Result<()> {
        let mut writer = self.data_writer.lock().expect("session data lock");
        writer.take();
        if self.data_path.exists() {
            fs::remove_file(&self.data_path)?;
        }
        if self.header_path.exists() {
            fs::remove_file(&self.header_path)?;
        }
        Ok(())
    }
}

fn new_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..SESSION_ID_LEN].to_string()
}

fn read_header(path: &Path) -> Result<SessionHeader> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn save_header(header: &SessionHeader, path: &Path) -> Result<()> {
    let raw = serde_json::to_vec_pretty(header)?;
    write_atomic(path, &raw)
}
