//! CGI/1.1 gateway
//!
//! A request routed here runs an external program with the request metadata
//! in its environment and the request body on its standard input. The
//! program's standard output is read back through a non-blocking pipe that
//! the event loop polls like any socket, then reassembled into a response.

pub mod env;
pub mod output;
pub mod process;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use env::{build_env, CgiContext};
pub use output::{parse_cgi_output, CgiReply};
pub use process::{spawn, CgiInput, CgiOutput, CgiProcess};

#[derive(Debug, Error)]
pub enum CgiError {
    #[error("failed to spawn CGI program {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to set up CGI pipes: {0}")]
    Pipe(#[source] io::Error),
    #[error("malformed CGI output: {0}")]
    MalformedOutput(&'static str),
}
