//! Request/response framing and the blocking transaction engine.
//!
//! One logical command is a write of the request frame, the command's
//! processing delay, and a read of the response when the command has one.
//! A response whose relevant field is all ones makes the engine issue the
//! board's "get last error" command before failing the call.

use crate::{
    bus::{Bus, Delay},
    error::{Error, Result},
    protocol::{self as proto, CommandDescriptor, FirmwareError},
};
use log::*;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const MAX_FRAME_LEN: usize = 3;
pub const MAX_RESPONSE_LEN: usize = 4;

/// All-ones marker for "command did not execute".
pub const SENTINEL: u16 = 0xFFFF;

/// A request frame together with the command it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    descriptor: CommandDescriptor,
    frame: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Request {
    /// Parameterless command, sent as `[opcode, 0x00]`.
    pub fn new(descriptor: CommandDescriptor) -> Self {
        Self::with_param(descriptor, 0x00)
    }

    pub fn with_param(descriptor: CommandDescriptor, param: u8) -> Self {
        Self {
            descriptor,
            frame: [descriptor.opcode, param, 0x00],
            len: 2,
        }
    }

    /// Opcode followed by a big-endian word.
    pub fn with_word(descriptor: CommandDescriptor, word: u16) -> Self {
        let [high, low] = word.to_be_bytes();
        Self {
            descriptor,
            frame: [descriptor.opcode, high, low],
            len: 3,
        }
    }

    pub fn descriptor(&self) -> CommandDescriptor {
        self.descriptor
    }

    pub fn opcode(&self) -> u8 {
        self.descriptor.opcode
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame[..self.len]
    }
}

/// Raw response bytes, empty for write-only commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Response {
    bytes: [u8; MAX_RESPONSE_LEN],
    len: usize,
}

impl Response {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut response = Self::with_len(bytes.len());
        let len = response.len;
        response.bytes_mut().copy_from_slice(&bytes[..len]);
        response
    }

    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            bytes: [0; MAX_RESPONSE_LEN],
            len: len.min(MAX_RESPONSE_LEN),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    /// The first two bytes as a big-endian word.
    pub fn word(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    /// All four bytes as a big-endian long.
    pub fn long(&self) -> u32 {
        u32::from_be_bytes(self.bytes)
    }
}

/// A decoded response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<T> {
    Value(T),
    Sentinel,
}

impl Reply<u16> {
    pub fn from_word(word: u16) -> Self {
        if word == SENTINEL {
            Self::Sentinel
        } else {
            Self::Value(word)
        }
    }
}

impl<T> Reply<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Self::Value(value) => Reply::Value(f(value)),
            Self::Sentinel => Reply::Sentinel,
        }
    }
}

/// A request and the decoder for its response.
#[derive(Debug, Clone, Copy)]
pub struct Operation<T> {
    request: Request,
    decode: fn(&Response) -> Reply<T>,
}

impl<T> Operation<T> {
    pub fn new(request: Request, decode: fn(&Response) -> Reply<T>) -> Self {
        Self { request, decode }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn decode(&self, response: &Response) -> Reply<T> {
        (self.decode)(response)
    }
}

impl Operation<()> {
    pub fn write_only(request: Request) -> Self {
        Self::new(request, |_| Reply::Value(()))
    }
}

/// How a board family reports the cause of a failed command.
#[derive(Debug)]
pub struct Dialect {
    pub last_error: CommandDescriptor,
    pub error_code: fn(&Response) -> u16,
}

impl Dialect {
    /// "Get last error" naming the failed command in its parameter byte.
    pub fn escalation(&self, failed_opcode: u8) -> Request {
        Request::with_param(self.last_error, failed_opcode)
    }

    /// Logs the outcome of an escalation and builds the caller's error.
    pub(crate) fn report(&self, label: &str, opcode: u8, outcome: Result<Response>) -> Error {
        let cause = match outcome {
            Ok(response) => {
                let cause = FirmwareError::from((self.error_code)(&response));
                error!("{label} command 0x{opcode:02X} error: {cause}");
                Some(cause)
            }
            Err(error) => {
                error!("{label} command 0x{opcode:02X} failed, last error unavailable: {error}");
                None
            }
        };
        Error::Firmware { opcode, cause }
    }
}

/// Where a handle talks to and how it identifies itself in logs.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub address: u8,
    pub timeout: Duration,
    pub serialize: bool,
    pub label: String,
    pub dialect: &'static Dialect,
}

impl Target {
    pub(crate) fn reject<T>(
        &self,
        operation: std::result::Result<T, proto::Error>,
    ) -> Result<T> {
        operation.map_err(|error| {
            error!("{}: {error}", self.label);
            error.into()
        })
    }
}

/// Access to the bus for the duration of one logical command.
enum Session<'a, B> {
    /// Lock held from the first write to the last read.
    Held(MutexGuard<'a, B>),
    /// Lock taken separately for every phase.
    Shared(&'a Mutex<B>),
}

impl<B: Bus> Session<'_, B> {
    fn perform(&mut self, target: &Target, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        match self {
            Self::Held(bus) => bus.perform(target.address, tx, rx, target.timeout)?,
            Self::Shared(mutex) => mutex
                .lock()
                .map_err(|_| Error::LockPoisoned)?
                .perform(target.address, tx, rx, target.timeout)?,
        }
        Ok(())
    }
}

/// Blocking engine shared by the EPS and battery handles.
#[derive(Debug)]
pub(crate) struct Engine<B, D> {
    bus: Arc<Mutex<B>>,
    delay: D,
    target: Target,
}

impl<B, D: Clone> Clone for Engine<B, D> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            delay: self.delay.clone(),
            target: self.target.clone(),
        }
    }
}

impl<B: Bus, D: Delay> Engine<B, D> {
    pub(crate) fn new(bus: Arc<Mutex<B>>, delay: D, target: Target) -> Self {
        Self { bus, delay, target }
    }

    pub(crate) fn bus(&self) -> &Arc<Mutex<B>> {
        &self.bus
    }

    pub(crate) fn target(&self) -> &Target {
        &self.target
    }

    /// Runs an operation, rejecting it first if its arguments were invalid.
    pub(crate) fn run<T>(
        &self,
        operation: std::result::Result<Operation<T>, proto::Error>,
    ) -> Result<T> {
        self.execute(self.target.reject(operation)?)
    }

    pub(crate) fn execute<T>(&self, operation: Operation<T>) -> Result<T> {
        let mut session = if self.target.serialize {
            Session::Held(self.bus.lock().map_err(|_| Error::LockPoisoned)?)
        } else {
            Session::Shared(&self.bus)
        };
        let response = self.transact(&mut session, operation.request())?;
        match operation.decode(&response) {
            Reply::Value(value) => Ok(value),
            Reply::Sentinel => {
                let opcode = operation.request().opcode();
                let escalation = self.target.dialect.escalation(opcode);
                let outcome = self.transact(&mut session, &escalation);
                Err(self.target.dialect.report(&self.target.label, opcode, outcome))
            }
        }
    }

    fn transact(&self, session: &mut Session<'_, B>, request: &Request) -> Result<Response> {
        let target = &self.target;
        let descriptor = request.descriptor();
        trace!("{}: write {:02X?}", target.label, request.frame());
        session
            .perform(target, request.frame(), &mut [])
            .inspect_err(|error| {
                warn!(
                    "{}: command 0x{:02X} write failed: {error}",
                    target.label, descriptor.opcode
                )
            })?;

        if !descriptor.delay.is_zero() {
            self.delay.delay(descriptor.delay);
        }

        let mut response = Response::with_len(descriptor.response_len);
        if descriptor.response_len > 0 {
            session
                .perform(target, &[], response.bytes_mut())
                .inspect_err(|error| {
                    warn!(
                        "{}: command 0x{:02X} read failed: {error}",
                        target.label, descriptor.opcode
                    )
                })?;
            trace!("{}: read {:02X?}", target.label, response.bytes());
        }
        Ok(response)
    }
}
