//! Start a new, independent session running what another session runs.

use std::path::{Path, PathBuf};

use burrow_protocol::{SESSION_ENV, SessionInfo, SessionName};
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::lifecycle::{LaunchRequest, SessionOutcome};
use crate::registry::{Liveness, SessionRegistry};

/// Highest suffix tried when deriving a target name.
pub const MAX_AUTO_NAMES: u32 = 100;

/// Where a fork is invoked from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkContext {
    /// Name of the session the fork runs inside, if any.
    pub source: Option<String>,
}

impl ForkContext {
    /// Read the source session from `BURROW_SESSION`.
    pub fn from_env() -> Self {
        Self {
            source: std::env::var(SESSION_ENV).ok().filter(|s| !s.is_empty()),
        }
    }
}

/// The side effects a fork needs from its process.
pub trait Launcher {
    /// Change the invoking process's working directory.
    fn change_dir(&mut self, dir: &Path) -> std::io::Result<()>;

    /// Find or start the session.
    fn launch(&mut self, request: LaunchRequest) -> Result<SessionOutcome, CoreError>;
}

/// A fork that was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forked {
    pub source: SessionInfo,
    pub target: SessionName,
    pub outcome: SessionOutcome,
}

/// Fork the session named by `ctx` into `target`, or into the first free
/// `<source>-<n>` when no target is given.
///
/// Does not attach. Success means the session was requested, not that it is
/// confirmed running.
pub fn fork_session<R, L>(
    ctx: &ForkContext,
    target: Option<&str>,
    size: (u16, u16),
    registry: &R,
    launcher: &mut L,
) -> Result<Forked, CoreError>
where
    R: SessionRegistry,
    L: Launcher,
{
    let source = ctx
        .source
        .as_deref()
        .ok_or(CoreError::EnvironmentMissing { var: SESSION_ENV })?;
    let source_name = SessionName::new(source)?;

    let info = probe_source(&source_name, registry)?;
    let target = resolve_target(&source_name, target, registry)?;
    info!(
        event = "core.fork.target_resolved",
        source = %source_name,
        target = %target,
    );

    let argv = info.argv();
    let cwd = PathBuf::from(&info.cwd);
    let cwd = match launcher.change_dir(&cwd) {
        Ok(()) => Some(cwd),
        Err(e) => {
            warn!(
                event = "core.fork.chdir_failed",
                cwd = %cwd.display(),
                error = %e,
            );
            None
        }
    };

    let (cols, rows) = size;
    let outcome = launcher.launch(LaunchRequest {
        name: target.clone(),
        argv,
        cwd,
        cols,
        rows,
    })?;
    info!(
        event = "core.fork.completed",
        source = %source_name,
        target = %target,
        outcome = ?outcome,
    );

    Ok(Forked {
        source: info,
        target,
        outcome,
    })
}

fn probe_source<R: SessionRegistry>(
    source: &SessionName,
    registry: &R,
) -> Result<SessionInfo, CoreError> {
    let encoded = source.encoded();
    match registry.probe_info(&encoded) {
        Ok(info) => Ok(info),
        Err(e @ CoreError::AllocationFailure { .. }) => Err(e),
        Err(e) => {
            warn!(event = "core.fork.source_unresponsive", source = %source, error = %e);
            // Only an entry nothing listens on is removed. An inconclusive
            // probe may be a busy daemon.
            if registry.probe(&encoded) == Liveness::Absent {
                registry.cleanup_stale(&encoded);
            }
            Err(CoreError::SourceUnresponsive {
                name: source.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

fn resolve_target<R: SessionRegistry>(
    source: &SessionName,
    target: Option<&str>,
    registry: &R,
) -> Result<SessionName, CoreError> {
    if let Some(explicit) = target {
        let name = SessionName::new(explicit)?;
        if registry.probe(&name.encoded()) == Liveness::Live {
            return Err(CoreError::TargetExists {
                name: name.to_string(),
            });
        }
        return Ok(name);
    }

    for n in 1..=MAX_AUTO_NAMES {
        let candidate = SessionName::new(format!("{}-{}", source, n))?;
        match registry.probe(&candidate.encoded()) {
            Liveness::Absent => return Ok(candidate),
            Liveness::Live | Liveness::Unknown => continue,
        }
    }
    Err(CoreError::NamesExhausted {
        base: source.to_string(),
        limit: MAX_AUTO_NAMES,
    })
}
