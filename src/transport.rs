//! Synchronous register i/o over Modbus RTU.
//!
//! The controller only ever talks to a [`RegisterIo`] implementation, one
//! blocking call per physical transaction. [`RtuTransport`] is the real one:
//! a tokio-modbus RTU client on a serial port, driven by a private
//! current-thread runtime, with a per-request timeout and a bounded retry
//! policy. Tests substitute scripted implementations of the trait.

use std::io;
use std::time::Duration;

use log::warn;
use thiserror::Error;
use tokio_modbus::prelude::*;
use tokio_serial::SerialPortBuilderExt;

/// Baud rate the gripper firmware is fixed to.
pub const BAUD_RATE: u32 = 115_200;
/// How long a single request may wait for the device's reply before the
/// attempt counts as failed.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub type TransportResult<T> = Result<T, TransportError>;

/// Terminal transport failure, reported once the retry budget is spent.
/// Each variant carries how many attempts were made.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Modbus transport or protocol error (serial disconnect, bad frame).
    #[error("modbus i/o failed after {attempts} attempt(s): {source}")]
    Io {
        attempts: u32,
        #[source]
        source: tokio_modbus::Error,
    },
    /// The device answered with a Modbus exception.
    #[error("modbus exception after {attempts} attempt(s): {source}")]
    Exception {
        attempts: u32,
        #[source]
        source: tokio_modbus::Exception,
    },
    /// No reply within the per-request timeout.
    #[error("modbus request timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },
}

/// Blocking holding-register access, one physical transaction per call.
///
/// Implementations retry transient failures internally and return a
/// [`TransportError`] only once their budget is exhausted; callers treat
/// every call as succeed-or-fail and never retry themselves.
pub trait RegisterIo {
    /// Read `cnt` consecutive holding registers starting at `addr`.
    fn read_holding_registers(&mut self, addr: u16, cnt: u16, unit_id: u8)
        -> TransportResult<Vec<u16>>;

    /// Write one holding register.
    fn write_single_register(&mut self, addr: u16, word: u16, unit_id: u8) -> TransportResult<()>;

    /// Write a contiguous register block in a single transaction.
    fn write_multiple_registers(
        &mut self,
        addr: u16,
        words: &[u16],
        unit_id: u8,
    ) -> TransportResult<()>;
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request before giving up; treated as at least one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        }
    }
}

/// Outcome of one attempt, before the budget is accounted for.
#[derive(Debug)]
enum Failure {
    Io(tokio_modbus::Error),
    Exception(tokio_modbus::Exception),
    Timeout(Duration),
}

impl Failure {
    fn exhausted(self, attempts: u32) -> TransportError {
        match self {
            Failure::Io(source) => TransportError::Io { attempts, source },
            Failure::Exception(source) => TransportError::Exception { attempts, source },
            Failure::Timeout(timeout) => TransportError::Timeout { attempts, timeout },
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Io(err) => write!(f, "{err}"),
            Failure::Exception(exception) => write!(f, "{exception}"),
            Failure::Timeout(timeout) => write!(f, "no reply within {timeout:?}"),
        }
    }
}

/// Run one register operation under the retry policy, logging every failed
/// attempt and returning the last failure with the attempt count once the
/// budget is spent.
fn with_retry<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Result<T, Failure>,
) -> TransportResult<T> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(failure) => {
                warn!("modbus request failed (attempt {attempt}/{max_attempts}): {failure}");
                if attempt >= max_attempts {
                    return Err(failure.exhausted(attempt));
                }
            }
        }
        std::thread::sleep(policy.delay);
    }
}

/// Drive one request future to completion under the per-request timeout and
/// flatten the nested tokio-modbus result into a single attempt outcome.
fn run_request<T>(
    runtime: &tokio::runtime::Runtime,
    timeout: Duration,
    request: impl std::future::Future<
        Output = Result<Result<T, tokio_modbus::Exception>, tokio_modbus::Error>,
    >,
) -> Result<T, Failure> {
    match runtime.block_on(tokio::time::timeout(timeout, request)) {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(exception))) => Err(Failure::Exception(exception)),
        Ok(Err(err)) => Err(Failure::Io(err)),
        Err(_elapsed) => Err(Failure::Timeout(timeout)),
    }
}

/// Modbus RTU master on a serial port.
///
/// Owns its own current-thread tokio runtime so the crate's public surface
/// stays synchronous; every call blocks until the reply arrives, the timeout
/// fires, or the retry budget is spent.
pub struct RtuTransport {
    runtime: tokio::runtime::Runtime,
    ctx: client::Context,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl RtuTransport {
    /// Open `path` at the gripper's fixed serial parameters (115200 8N1)
    /// with the default retry policy and request timeout.
    pub fn open(path: impl Into<String>) -> io::Result<Self> {
        Self::open_with(path, RetryPolicy::default(), DEFAULT_REQUEST_TIMEOUT)
    }

    /// Open `path` with an explicit retry policy and per-request timeout.
    pub fn open_with(
        path: impl Into<String>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let ctx = {
            // The serial stream registers with the runtime's reactor, so it
            // has to be opened from inside the runtime context.
            let _guard = runtime.enter();
            let port = tokio_serial::new(path.into(), BAUD_RATE)
                .data_bits(tokio_serial::DataBits::Eight)
                .stop_bits(tokio_serial::StopBits::One)
                .parity(tokio_serial::Parity::None)
                .timeout(Duration::from_millis(500))
                .open_native_async()?;
            // Initial unit id only; every request re-selects its own.
            rtu::attach_slave(port, Slave(crate::protocol::DEFAULT_SLAVE_ID))
        };
        Ok(Self {
            runtime,
            ctx,
            retry,
            request_timeout,
        })
    }
}

impl RegisterIo for RtuTransport {
    fn read_holding_registers(
        &mut self,
        addr: u16,
        cnt: u16,
        unit_id: u8,
    ) -> TransportResult<Vec<u16>> {
        self.ctx.set_slave(Slave(unit_id));
        let Self {
            runtime,
            ctx,
            retry,
            request_timeout,
        } = self;
        with_retry(retry, || {
            run_request(runtime, *request_timeout, ctx.read_holding_registers(addr, cnt))
        })
    }

    fn write_single_register(&mut self, addr: u16, word: u16, unit_id: u8) -> TransportResult<()> {
        self.ctx.set_slave(Slave(unit_id));
        let Self {
            runtime,
            ctx,
            retry,
            request_timeout,
        } = self;
        with_retry(retry, || {
            run_request(runtime, *request_timeout, ctx.write_single_register(addr, word))
        })
    }

    fn write_multiple_registers(
        &mut self,
        addr: u16,
        words: &[u16],
        unit_id: u8,
    ) -> TransportResult<()> {
        self.ctx.set_slave(Slave(unit_id));
        let Self {
            runtime,
            ctx,
            retry,
            request_timeout,
        } = self;
        with_retry(retry, || {
            run_request(runtime, *request_timeout, ctx.write_multiple_registers(addr, words))
        })
    }
}

impl Drop for RtuTransport {
    fn drop(&mut self) {
        let Self { runtime, ctx, .. } = self;
        let _ = runtime.block_on(ctx.disconnect());
    }
}
