//! Error-handling code.

use std::fmt;

use anyhow::Error;
use thiserror::Error as ThisError;

/// The kinds of failure the pipeline distinguishes.
///
/// These are raised wrapped in an [`anyhow::Error`], so callers which care
/// about the kind of failure should use `err.downcast_ref::<RunnerError>()`.
#[derive(Debug, ThisError)]
pub enum RunnerError {
    /// A spec or config file is malformed, or violates one of its invariants.
    #[error("configuration error: {0}")]
    Config(String),

    /// The LIMS returned an `errorreport` for a request.
    #[error("request to endpoint `{endpoint}` failed: {message}")]
    Request {
        /// The endpoint which was called.
        endpoint: String,
        /// The error reports, joined together.
        message: String,
    },

    /// The LIMS rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Some content did not have the expected checksum, a remote file was
    /// missing, or two inputs claimed the same target.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The chunks of a work directory could not be determined.
    #[error("chunk error: {0}")]
    Chunk(String),

    /// One or more entities could not be found.
    #[error("{entity} not found: {ids:?}")]
    EntityNotFound {
        /// The endpoint of the missing entities.
        entity: String,
        /// The missing IDs.
        ids: Vec<i64>,
    },

    /// An external command exited with a non-zero status.
    #[error("command {command:?} failed: {status}")]
    Command {
        /// The command line which was run.
        command: Vec<String>,
        /// A description of how it exited.
        status: String,
    },
}

impl RunnerError {
    /// Build a [`RunnerError::Config`] wrapped in an [`Error`].
    pub fn config<S: Into<String>>(msg: S) -> Error {
        RunnerError::Config(msg.into()).into()
    }

    /// Build a [`RunnerError::Integrity`] wrapped in an [`Error`].
    pub fn integrity<S: Into<String>>(msg: S) -> Error {
        RunnerError::Integrity(msg.into()).into()
    }

    /// Build a [`RunnerError::Chunk`] wrapped in an [`Error`].
    pub fn chunk<S: Into<String>>(msg: S) -> Error {
        RunnerError::Chunk(msg.into()).into()
    }
}

/// Find the [`RunnerError`] in an error's chain, if there is one.
pub fn runner_error(err: &Error) -> Option<&RunnerError> {
    err.chain().find_map(|cause| cause.downcast_ref::<RunnerError>())
}

/// Support for displaying an error with a complete list of causes, and an
/// optional backtrace.
pub trait DisplayCausesAndBacktraceExt {
    /// Display the error and its causes, plus a backtrace (if available).
    fn display_causes_and_backtrace(&self) -> DisplayCauses<'_>;

    /// Display the error and its causes.
    fn display_causes_without_backtrace(&self) -> DisplayCauses<'_>;
}

impl DisplayCausesAndBacktraceExt for Error {
    fn display_causes_and_backtrace(&self) -> DisplayCauses<'_> {
        DisplayCauses {
            err: self,
            show_backtrace: true,
        }
    }

    fn display_causes_without_backtrace(&self) -> DisplayCauses<'_> {
        DisplayCauses {
            err: self,
            show_backtrace: false,
        }
    }
}

/// Helper type used to display errors.
pub struct DisplayCauses<'a> {
    /// The error to display.
    err: &'a Error,

    /// Should we show the backtrace?
    show_backtrace: bool,
}

impl fmt::Display for DisplayCauses<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.err)?;
        let mut source = self.err.source();
        while let Some(next) = source {
            writeln!(f, "  caused by: {}", next)?;
            source = next.source();
        }

        if self.show_backtrace {
            write!(f, "{}", self.err.backtrace())?;
        }
        Ok(())
    }
}

/// Generate a `main` function which calls the specified function. If the
/// function returns `Result::Err(_)`, then `main` will print the error and exit
/// with a non-zero status code.
#[macro_export]
macro_rules! quick_main {
    ($wrapped:ident) => {
        fn main() {
            if let Err(err) = $wrapped() {
                use ::std::io::Write;
                use $crate::errors::DisplayCausesAndBacktraceExt;
                let stderr = ::std::io::stderr();
                write!(&mut stderr.lock(), "{}", err.display_causes_and_backtrace())
                    .expect("Error occurred while trying to display error");
                ::std::process::exit(1);
            }
        }
    };
}

#[test]
fn runner_error_is_found_below_context() {
    use anyhow::Context as _;

    let result: Result<(), Error> = Err(RunnerError::chunk("no chunks"));
    let err = result.context("could not run app").unwrap_err();
    assert!(matches!(runner_error(&err), Some(RunnerError::Chunk(_))));
    let display = format!("{}", err.display_causes_without_backtrace());
    assert!(display.starts_with("ERROR: could not run app"));
    assert!(display.contains("caused by: chunk error: no chunks"));
}
