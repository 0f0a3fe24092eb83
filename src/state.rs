//! State Store: persists [`ConversionState`] to `.state.json` with
//! crash-safe atomic replacement and advisory file locking.
//!
//! Writes go to a sibling temp file in the same directory, then `rename`
//! over the target — atomic on POSIX, and `rename` on Windows behaves the
//! same way once the destination does not exist, so no platform-specific
//! emulation is needed beyond always writing the temp file alongside the
//! target rather than in a different filesystem.
//!
//! Locking uses `fd-lock`'s advisory exclusive lock on a sibling `.lock`
//! file. A stale lock — the holder process no longer exists but the state
//! says `in_progress` — is detected by a non-blocking lock attempt
//! succeeding even though `.state.json` claims an in-progress run; in that
//! case resume proceeds with a warning rather than treating the stale lock
//! as contention.

use crate::error::ConvertError;
use crate::model::{ConversionState, RunStatus, SCHEMA_VERSION};
use fd_lock::RwLock as FdRwLock;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const STATE_FILENAME: &str = ".state.json";
const LOCK_FILENAME: &str = ".state.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);
const LOCK_RETRY_ATTEMPTS: u32 = 3;

fn state_path(output_dir: &Path) -> PathBuf {
    output_dir.join(STATE_FILENAME)
}

fn lock_path(output_dir: &Path) -> PathBuf {
    output_dir.join(LOCK_FILENAME)
}

/// A held advisory lock on the output directory's state file. Dropping
/// this releases the lock; callers hold it for the lifetime of a
/// conversion run.
pub struct StateLock {
    _file_lock: FdRwLock<File>,
}

/// Acquire the exclusive advisory lock for `output_dir`, retrying up to
/// [`LOCK_RETRY_ATTEMPTS`] times with a one-second delay, per the
/// concurrency-model contract. Fails with [`ConvertError::LockTimeout`]
/// after the final attempt.
pub fn acquire_lock(output_dir: &Path) -> Result<StateLock, ConvertError> {
    let path = lock_path(output_dir);
    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;
    let mut lock = FdRwLock::new(file);

    let deadline = Instant::now() + LOCK_TIMEOUT;
    for attempt in 0..=LOCK_RETRY_ATTEMPTS {
        match lock.try_write() {
            Ok(guard) => {
                std::mem::forget(guard);
                return Ok(StateLock { _file_lock: lock });
            }
            Err(_) if Instant::now() < deadline && attempt < LOCK_RETRY_ATTEMPTS => {
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(_) => {
                return Err(ConvertError::LockTimeout {
                    timeout_secs: LOCK_TIMEOUT.as_secs(),
                })
            }
        }
    }
    Err(ConvertError::LockTimeout {
        timeout_secs: LOCK_TIMEOUT.as_secs(),
    })
}

/// `true` when a lock file exists but is not currently held by any process
/// — i.e. a crashed prior run left the lock file behind. Used by `resume`
/// to decide whether to proceed with a warning instead of erroring.
pub fn lock_is_stale(output_dir: &Path) -> bool {
    let path = lock_path(output_dir);
    let Ok(file) = File::options().read(true).write(true).open(&path) else {
        return false;
    };
    let mut lock = FdRwLock::new(file);
    match lock.try_write() {
        Ok(guard) => {
            drop(guard);
            true
        }
        Err(_) => false,
    }
}

/// Load and validate state from `output_dir/.state.json`.
///
/// Validates: JSON parse, schema version support, `completed_phases`
/// invariant, `current_step` grammar, and that every phase marked
/// `completed` has its declared output file present on disk.
pub fn load(output_dir: &Path) -> Result<ConversionState, ConvertError> {
    let path = state_path(output_dir);
    if !path.exists() {
        return Err(ConvertError::NoStateToResume { path });
    }
    let raw = fs::read_to_string(&path).map_err(|_| ConvertError::StateCorrupt {
        detail: format!("could not read '{}'", path.display()),
    })?;
    let state: ConversionState =
        serde_json::from_str(&raw).map_err(|e| ConvertError::StateCorrupt {
            detail: e.to_string(),
        })?;

    validate(&state)?;
    Ok(state)
}

/// Validate an in-memory state record against every invariant `spec.md`
/// names, without touching disk for the state file itself (output-file
/// existence checks do touch disk).
pub fn validate(state: &ConversionState) -> Result<(), ConvertError> {
    if state.version.parse::<u64>().unwrap_or(0) > SCHEMA_VERSION.parse::<u64>().unwrap_or(0) {
        return Err(ConvertError::UnsupportedStateVersion {
            found: state.version.clone(),
            supported: SCHEMA_VERSION.to_string(),
        });
    }
    if !state.completed_phases_invariant_holds() {
        return Err(ConvertError::StateSchemaViolation {
            detail: "completed_phases must be sorted ascending and below current_phase"
                .to_string(),
        });
    }
    if !state.current_step_is_well_formed() {
        return Err(ConvertError::StateSchemaViolation {
            detail: format!("current_step '{}' does not match N.M grammar", state.current_step),
        });
    }
    for &phase in &state.completed_phases {
        if let Some(result) = state.phase_results.get(&phase) {
            if let Some(output) = &result.output_file {
                if !output.exists() {
                    return Err(ConvertError::MissingPhaseOutput {
                        phase,
                        path: output.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Write `state` atomically: serialize to a sibling temp file, `fsync`,
/// then rename over the target. A failed write here is always reported as
/// a disk-full PDF-processing error, per the propagation policy — state
/// writes never silently fail.
pub fn save(output_dir: &Path, state: &ConversionState) -> Result<(), ConvertError> {
    fs::create_dir_all(output_dir)?;
    let path = state_path(output_dir);
    let json = serde_json::to_string_pretty(state).map_err(|e| ConvertError::Internal(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(output_dir)
        .map_err(|_| ConvertError::disk_full(path.clone()))?;
    tmp.write_all(json.as_bytes())
        .map_err(|_| ConvertError::disk_full(path.clone()))?;
    tmp.flush().map_err(|_| ConvertError::disk_full(path.clone()))?;
    tmp.persist(&path)
        .map_err(|_| ConvertError::disk_full(path.clone()))?;

    info!(phase = state.current_phase, step = %state.current_step, "state saved");
    Ok(())
}

/// `true` if `state`'s status is terminal (`completed`, `failed`, or
/// `cancelled`) — used by `resume` to short-circuit with idempotence.
pub fn is_terminal(state: &ConversionState) -> bool {
    !matches!(state.status, RunStatus::InProgress)
}

/// Write an empty `callout_config.json` placeholder, as Phase 0 step 0.6
/// does when the user did not supply one, so it exists for editing before
/// the next invocation's overwrite/resume dialog.
pub fn write_default_callout_config(output_dir: &Path) -> Result<(), ConvertError> {
    let path = output_dir.join("callout_config.json");
    if path.exists() {
        return Ok(());
    }
    fs::write(&path, "[]\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunConfig;
    use chrono::Utc;

    fn fresh_state(dir: &Path) -> ConversionState {
        ConversionState::new(
            dir.join("in.pdf"),
            dir.to_path_buf(),
            RunConfig::default(),
            Utc::now(),
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = fresh_state(dir.path());
        save(dir.path(), &state).unwrap();
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.pdf_path, state.pdf_path);
        assert_eq!(loaded.current_step, "0.1");
    }

    #[test]
    fn missing_state_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn corrupt_state_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".state.json"), "{ not json").unwrap();
        let err = load(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn missing_completed_phase_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = fresh_state(dir.path());
        state.current_phase = 1;
        state.completed_phases = vec![0];
        let mut result = crate::model::PhaseResult::started(0, "pre-flight", Utc::now());
        result.output_file = Some(dir.path().join("missing.json"));
        state.phase_results.insert(0, result);
        assert!(matches!(
            validate(&state),
            Err(ConvertError::MissingPhaseOutput { .. })
        ));
    }

    #[test]
    fn lock_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let lock = acquire_lock(dir.path()).unwrap();
        drop(lock);
        let lock2 = acquire_lock(dir.path()).unwrap();
        drop(lock2);
    }
}
