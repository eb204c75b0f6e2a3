use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use bytes::{Bytes, BytesMut};
use mio::unix::pipe::{Receiver, Sender};
use mio::Token;

use crate::cgi::CgiError;

const READ_CHUNK: usize = 4096;

/// A running CGI program and the non-blocking ends of its pipes.
#[derive(Debug)]
pub struct CgiProcess {
    pub child: Child,
    /// `None` when the request has no body to deliver.
    pub stdin: Option<Sender>,
    pub stdout: Receiver,
}

/// Starts `program` with exactly `env` as its environment.
///
/// Standard error is inherited so program diagnostics land in the server log.
pub fn spawn(program: &Path, env: &[(String, String)], with_body: bool) -> Result<CgiProcess, CgiError> {
    let mut child = Command::new(program)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(if with_body { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| CgiError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    match attach_pipes(&mut child) {
        Ok((stdin, stdout)) => Ok(CgiProcess { child, stdin, stdout }),
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(CgiError::Pipe(e))
        }
    }
}

fn attach_pipes(child: &mut Child) -> io::Result<(Option<Sender>, Receiver)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "child stdout not captured"))?;
    let stdout = Receiver::from(stdout);
    stdout.set_nonblocking(true)?;

    let stdin = match child.stdin.take() {
        Some(stdin) => {
            let stdin = Sender::from(stdin);
            stdin.set_nonblocking(true)?;
            Some(stdin)
        }
        None => None,
    };

    Ok((stdin, stdout))
}

/// Request body on its way into a CGI program.
#[derive(Debug)]
pub struct CgiInput {
    pipe: Sender,
    owner: Token,
    pending: Bytes,
    written: usize,
}

impl CgiInput {
    pub fn new(pipe: Sender, owner: Token, body: Bytes) -> Self {
        Self {
            pipe,
            owner,
            pending: body,
            written: 0,
        }
    }

    /// The client connection this body belongs to.
    pub fn owner(&self) -> Token {
        self.owner
    }

    pub fn pipe(&mut self) -> &mut Sender {
        &mut self.pipe
    }

    /// Writes as much of the body as the pipe accepts. Returns `true` once
    /// everything has been delivered.
    pub fn pump(&mut self) -> io::Result<bool> {
        while self.written < self.pending.len() {
            match self.pipe.write(&self.pending[self.written..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// Output of a CGI program, collected until the program closes its stdout.
#[derive(Debug)]
pub struct CgiOutput {
    pipe: Receiver,
    owner: Token,
    child: Option<Child>,
    buffer: BytesMut,
    limit: usize,
    /// Whether the client connection stays open after the reply.
    pub keep_alive: bool,
    /// Request line for the access log.
    pub request_line: String,
}

impl CgiOutput {
    pub fn new(
        pipe: Receiver,
        owner: Token,
        child: Child,
        limit: usize,
        keep_alive: bool,
        request_line: String,
    ) -> Self {
        Self {
            pipe,
            owner,
            child: Some(child),
            buffer: BytesMut::new(),
            limit,
            keep_alive,
            request_line,
        }
    }

    pub fn owner(&self) -> Token {
        self.owner
    }

    pub fn pipe(&mut self) -> &mut Receiver {
        &mut self.pipe
    }

    /// Reads everything currently available. Returns `true` at end of stream.
    ///
    /// Fails once the program has written more than the output limit.
    pub fn drain(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.pipe.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) if self.buffer.len() + n > self.limit => {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        format!("CGI output exceeds {} bytes", self.limit),
                    ));
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.buffer
    }

    /// Hands the child over for reaping; dropping the output afterwards no
    /// longer kills it.
    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    /// Kills the program if it is still attached.
    pub fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
