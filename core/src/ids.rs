use crate::entities::ItemKind;
use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Default rendering when no format template is configured.
pub const DEFAULT_ID_FORMAT: &str = "{item_name}{data[item_name]:04d}";

const LOCK_ATTEMPTS: u32 = 100;

#[derive(Error, Debug)]
pub enum IdError {
    #[error("Failed to lock sequence file {path:?} after {attempts} attempts")]
    LockContended { path: PathBuf, attempts: u32 },
    #[error("Sequence file I/O failure")]
    Io(#[from] std::io::Error),
    #[error("Sequence file is corrupt")]
    Corrupt(#[from] serde_json::Error),
}

/// Process-wide id generation strategies, chosen once at startup.
#[derive(Clone, Debug)]
pub enum IdGenerators {
    /// Random v4 UUIDs, the default.
    Uuid,
    /// Monotonic per-entity-kind counters persisted to a shared JSON file.
    ItemSequence(SequenceIdGenerator),
}

impl IdGenerators {
    pub fn generate(&self, kind: ItemKind) -> Result<String, IdError> {
        match self {
            Self::Uuid => Ok(Uuid::new_v4().to_string()),
            Self::ItemSequence(generator) => generator.next_id(kind),
        }
    }
}

/// Counter-file based ids: `Experiment0000`, `Experiment0001`, ...
///
/// The counter file is shared across processes and guarded by an advisory
/// file lock with jittered retries, so concurrent submitters never mint the
/// same id twice.
#[derive(Clone, Debug)]
pub struct SequenceIdGenerator {
    pub sequence_file: PathBuf,
    pub id_format_str: String,
}

impl SequenceIdGenerator {
    pub fn new(sequence_file: impl Into<PathBuf>, id_format_str: impl Into<String>) -> Self {
        Self {
            sequence_file: sequence_file.into(),
            id_format_str: id_format_str.into(),
        }
    }

    pub fn next_id(&self, kind: ItemKind) -> Result<String, IdError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.sequence_file)?;

        let mut locked = false;
        for attempt in 0..LOCK_ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    locked = true;
                    break;
                }
                Err(error) => {
                    debug!(
                        attempt,
                        path = ?self.sequence_file,
                        error = ?error,
                        "Sequence file is locked, backing off"
                    );
                    let jitter = rand::thread_rng().gen_range(1..25);
                    thread::sleep(Duration::from_millis(jitter));
                }
            }
        }
        if !locked {
            return Err(IdError::LockContended {
                path: self.sequence_file.clone(),
                attempts: LOCK_ATTEMPTS,
            });
        }

        let result = self.advance(&mut file, kind);
        let _ = file.unlock();
        result
    }

    fn advance(&self, file: &mut std::fs::File, kind: ItemKind) -> Result<String, IdError> {
        let mut raw = String::new();
        file.read_to_string(&mut raw)?;
        let mut counters: BTreeMap<String, u64> = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw)?
        };

        let name = kind.item_name();
        let value = *counters.get(name).unwrap_or(&0);
        counters.insert(name.to_owned(), value + 1);

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(serde_json::to_string_pretty(&counters)?.as_bytes())?;
        file.sync_all()?;

        Ok(render_id_format(&self.id_format_str, name, value))
    }
}

/// Render the configured id template. Supported placeholders are
/// `{item_name}` and `{data[item_name]}` with an optional `:0Nd` zero-pad
/// spec; anything else passes through literally.
pub fn render_id_format(format: &str, item_name: &str, value: u64) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&render_placeholder(&after[..end], item_name, value));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_placeholder(spec: &str, item_name: &str, value: u64) -> String {
    let (field, pad) = match spec.split_once(':') {
        Some((field, pad)) => (field, Some(pad)),
        None => (spec, None),
    };
    match field {
        "item_name" => item_name.to_owned(),
        "data[item_name]" => match pad {
            Some(pad) if pad.starts_with('0') && pad.ends_with('d') => {
                let width: usize = pad[1..pad.len() - 1].parse().unwrap_or(0);
                format!("{value:0width$}")
            }
            _ => value.to_string(),
        },
        // unknown placeholder, keep it visible rather than guessing
        _ => format!("{{{spec}}}"),
    }
}

static STRATEGY: Lazy<RwLock<IdGenerators>> = Lazy::new(|| RwLock::new(IdGenerators::Uuid));

/// Install the process-wide id strategy. Called once at startup from the
/// configuration layer; later calls replace the strategy wholesale.
pub fn set_strategy(strategy: IdGenerators) {
    *STRATEGY.write() = strategy;
}

/// Generate an id for an entity kind with the process-wide strategy.
pub fn generate(kind: ItemKind) -> Result<String, IdError> {
    STRATEGY.read().generate(kind)
}
