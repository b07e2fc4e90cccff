use std::{fmt, time::Duration};

use crate::{config::ConfigParseError, transport::TransportError};

/// Upstream error codes that mean the video itself cannot be converted
/// (unsupported, restricted, too long) rather than a transient failure.
pub const REJECTION_CODES: [i64; 4] = [215, 243, 244, 245];

/// One of the three upstream call types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Convert,
    Progress,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Convert => "convert",
            Phase::Progress => "progress",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("could not fetch config page")]
    ConfigFetch(#[source] TransportError),
    #[error("config script not found on page, the service layout has changed")]
    ConfigNotFound,
    #[error("could not parse config script")]
    ConfigParse(#[from] ConfigParseError),
    #[error("could not derive authorization: {0}")]
    AuthDerivation(String),
    #[error("{}", describe_protocol(.phase, .code))]
    Protocol { phase: Phase, code: i64 },
    #[error("{phase} request returned HTTP {status}")]
    UnexpectedStatus { phase: Phase, status: u16 },
    #[error("malformed {phase} response: {reason}")]
    MalformedResponse { phase: Phase, reason: String },
    #[error("convert redirected more than {hops} times")]
    RedirectLoop { hops: usize },
    #[error("conversion did not complete after {attempts} progress checks ({elapsed:?})")]
    PollTimeout { attempts: u32, elapsed: Duration },
    #[error("{phase} request failed")]
    Network {
        phase: Phase,
        #[source]
        source: TransportError,
    },
}

fn describe_protocol(phase: &Phase, code: &i64) -> String {
    if *phase == Phase::Convert && REJECTION_CODES.contains(code) {
        format!("conversion rejected by upstream (code {})", code)
    } else {
        format!("{} failed with upstream error {}", phase, code)
    }
}

impl Error {
    /// True when upstream refused this particular video, as opposed to the
    /// integration itself being broken.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Protocol { phase: Phase::Convert, code } if REJECTION_CODES.contains(code))
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Protocol { phase, .. }
            | Error::UnexpectedStatus { phase, .. }
            | Error::MalformedResponse { phase, .. }
            | Error::Network { phase, .. } => Some(*phase),
            Error::RedirectLoop { .. } => Some(Phase::Convert),
            Error::PollTimeout { .. } => Some(Phase::Progress),
            _ => None,
        }
    }
}
