//! High-level Hand-E controller.
//!
//! [`HandEGripper`] mirrors the device's request state, drives the mandatory
//! activation routine, and exposes move/stop/release commands plus the
//! telemetry registers. It talks to the device through any [`RegisterIo`]
//! implementation; [`HandEGripper::from_path`] wires up the real serial
//! transport.

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::protocol::{
    high_byte, low_byte, mm_to_raw, raw_to_mm, ActionRequest, ActivationRequest, AutoReleaseMode,
    GoRequest, GripperFault, GripperState, GripperStatus, MotionStatus, ObjectDetection,
    DEFAULT_SLAVE_ID, REG_ACTION_REQUEST, REG_FAULT_ECHO, REG_GRIPPER_STATUS,
    REG_POSITION_CURRENT,
};
use crate::transport::{RegisterIo, RtuTransport, TransportError};

/// Pause between two status polls in a wait loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Knobs for one gripper connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GripperOptions {
    /// Modbus unit id of the gripper on the bus.
    pub slave: u8,
    /// Pause between two status polls while waiting on activation or motion.
    pub poll_interval: Duration,
    /// Upper bound on status polls per wait; `None` waits indefinitely.
    pub max_poll_attempts: Option<u32>,
}

impl Default for GripperOptions {
    fn default() -> Self {
        Self {
            slave: DEFAULT_SLAVE_ID,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GripperError {
    /// Serial port or runtime setup failed.
    #[error("serial port error: {0}")]
    Io(#[from] io::Error),
    /// Register i/o failed for good; the transport's retry budget is spent.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A bounded wait ran out of status polls before the condition held.
    #[error("gripper did not reach the awaited state within {attempts} status polls")]
    PollTimeout { attempts: u32 },
}

/// Driver for one Robotiq Hand-E on a Modbus RTU bus.
///
/// Keeps a local mirror of the action register so every command resends the
/// complete request byte, and a cached status snapshot refreshed only by
/// [`read_status`](Self::read_status).
#[derive(Debug)]
pub struct HandEGripper<T: RegisterIo> {
    io: T,
    options: GripperOptions,
    request: ActionRequest,
    status: GripperStatus,
}

impl HandEGripper<RtuTransport> {
    /// Open the serial port at the gripper's fixed parameters (115200 8N1)
    /// and connect with default options.
    pub fn from_path(path: impl Into<String>) -> Result<Self, GripperError> {
        Self::connect(RtuTransport::open(path)?)
    }

    /// Open the serial port and connect with explicit options.
    pub fn from_path_with_options(
        path: impl Into<String>,
        options: GripperOptions,
    ) -> Result<Self, GripperError> {
        Self::connect_with_options(RtuTransport::open(path)?, options)
    }
}

impl<T: RegisterIo> HandEGripper<T> {
    /// Connect over an already-open transport with default options.
    pub fn connect(io: T) -> Result<Self, GripperError> {
        Self::connect_with_options(io, GripperOptions::default())
    }

    /// Connect over an already-open transport.
    ///
    /// Seeds the request mirror from the device's action register so resent
    /// bits match whatever a previous session left latched, takes a first
    /// status snapshot, then runs the activation routine. The firmware
    /// accepts no motion command before that routine completes.
    pub fn connect_with_options(mut io: T, options: GripperOptions) -> Result<Self, GripperError> {
        let word = io.read_holding_registers(REG_ACTION_REQUEST, 1, options.slave)?[0];
        let request = ActionRequest::unpack(high_byte(word));
        let word = io.read_holding_registers(REG_GRIPPER_STATUS, 1, options.slave)?[0];
        let status = GripperStatus::unpack(high_byte(word));
        debug!("connected: request {request:?}, status {status:?}");
        let mut gripper = Self {
            io,
            options,
            request,
            status,
        };
        gripper.init_gripper()?;
        Ok(gripper)
    }

    /// Reset, re-activate, and wait for the activation routine to finish.
    ///
    /// Required once after power-up and again after a fault or an automatic
    /// release; the reset half also clears any latched fault code.
    pub fn init_gripper(&mut self) -> Result<(), GripperError> {
        self.reset()?;
        self.activate()?;
        let polls = self.wait_until(|status| status.sta == GripperState::ActivationCompleted)?;
        debug!("activation completed after {polls} status poll(s)");
        Ok(())
    }

    /// Raise the activation request. The device starts its activation
    /// routine; [`init_gripper`](Self::init_gripper) also waits for it.
    pub fn activate(&mut self) -> Result<(), GripperError> {
        self.request.act = ActivationRequest::Activate;
        self.write_action()
    }

    /// Clear the activation request, resetting the gripper and clearing any
    /// latched fault. The gripper must be activated again before it moves.
    pub fn reset(&mut self) -> Result<(), GripperError> {
        self.request.act = ActivationRequest::Deactivate;
        self.write_action()
    }

    /// Drop the go-to request, halting motion in place.
    pub fn stop(&mut self) -> Result<(), GripperError> {
        self.request.gto = GoRequest::Stop;
        self.write_action()
    }

    /// Trigger the emergency automatic release in the direction currently
    /// latched by [`ActionRequest::ard`]. Overrides any motion without
    /// touching the go-to request; afterwards the device reports a fault and
    /// needs [`init_gripper`](Self::init_gripper) before further use.
    pub fn emergency_auto_release(&mut self) -> Result<(), GripperError> {
        self.request.atr = AutoReleaseMode::EmergencyRelease;
        self.write_action()
    }

    /// Command a move. `position_mm` runs from 0.0 (fully open) to
    /// [`FULL_STROKE_MM`](crate::protocol::FULL_STROKE_MM) (fully closed)
    /// and saturates outside that range; `speed` and `force` are raw
    /// firmware units over the full `u8` range.
    ///
    /// The action, position and speed/force registers go out as one
    /// three-word write so the device never executes a half-updated command.
    /// With `blocking` the call polls status until the fingers finish (at
    /// the target or against an object) or motion is reported stopped.
    pub fn move_to(
        &mut self,
        position_mm: f64,
        speed: u8,
        force: u8,
        blocking: bool,
    ) -> Result<(), GripperError> {
        self.request.gto = GoRequest::Go;
        let position = mm_to_raw(position_mm);
        debug!("move to raw {position} (speed {speed}, force {force}, blocking {blocking})");
        let block = self.request.command_block(position, speed, force);
        self.io
            .write_multiple_registers(REG_ACTION_REQUEST, &block, self.options.slave)?;
        if blocking {
            self.wait_until(|status| {
                status.obj != ObjectDetection::MovingNoObject
                    || status.gto == MotionStatus::Stopped
            })?;
        }
        Ok(())
    }

    /// Read the status register and replace the cached snapshot. The only
    /// operation that refreshes the cache.
    pub fn read_status(&mut self) -> Result<GripperStatus, GripperError> {
        let word = self.read_register(REG_GRIPPER_STATUS)?;
        self.status = GripperStatus::unpack(high_byte(word));
        Ok(self.status)
    }

    /// Last snapshot taken by [`read_status`](Self::read_status); no i/o.
    pub fn status(&self) -> GripperStatus {
        self.status
    }

    /// Current request mirror; no i/o.
    pub fn request(&self) -> ActionRequest {
        self.request
    }

    /// Motor current draw in raw firmware units (about 10 mA per count).
    pub fn current(&mut self) -> Result<u8, GripperError> {
        Ok(low_byte(self.read_register(REG_POSITION_CURRENT)?))
    }

    /// Measured finger opening in millimetres.
    pub fn position_mm(&mut self) -> Result<f64, GripperError> {
        Ok(raw_to_mm(high_byte(self.read_register(REG_POSITION_CURRENT)?)))
    }

    /// Raw fault register code. A non-zero code is device state rather than
    /// an error: it stays latched until [`reset`](Self::reset) and is the
    /// caller's to check.
    pub fn fault_code(&mut self) -> Result<u8, GripperError> {
        Ok(low_byte(self.read_register(REG_FAULT_ECHO)?))
    }

    /// Decoded fault register; `None` for codes the firmware leaves
    /// undocumented.
    pub fn fault(&mut self) -> Result<Option<GripperFault>, GripperError> {
        Ok(GripperFault::from_code(self.fault_code()?))
    }

    /// Device-side echo of the last requested position, in millimetres.
    /// Shares a register with the fault code; one read, split into bytes.
    pub fn echoed_position_mm(&mut self) -> Result<f64, GripperError> {
        Ok(raw_to_mm(high_byte(self.read_register(REG_FAULT_ECHO)?)))
    }

    /// Resend the full action register from the request mirror.
    fn write_action(&mut self) -> Result<(), GripperError> {
        self.io
            .write_single_register(REG_ACTION_REQUEST, self.request.to_word(), self.options.slave)?;
        Ok(())
    }

    fn read_register(&mut self, addr: u16) -> Result<u16, GripperError> {
        Ok(self.io.read_holding_registers(addr, 1, self.options.slave)?[0])
    }

    /// Poll status until `done` holds, pausing `poll_interval` between
    /// polls. Returns how many polls it took; errors out once
    /// `max_poll_attempts` is spent.
    fn wait_until(&mut self, done: impl Fn(&GripperStatus) -> bool) -> Result<u32, GripperError> {
        let mut polls = 0;
        loop {
            let status = self.read_status()?;
            polls += 1;
            if done(&status) {
                return Ok(polls);
            }
            if let Some(max) = self.options.max_poll_attempts {
                if polls >= max {
                    warn!("giving up on status {status:?} after {polls} poll(s)");
                    return Err(GripperError::PollTimeout { attempts: polls });
                }
            }
            thread::sleep(self.options.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::protocol::AutoReleaseDirection;
    use crate::transport::TransportResult;

    /// Freshly powered, nothing set.
    const IN_RESET: u8 = 0b0000_0000;
    /// act set, activation completed, no motion, no object.
    const ACTIVATED: u8 = 0b0011_0001;
    /// act and gto set, activation completed, fingers moving, no object yet.
    const MOVING: u8 = 0b0011_1001;
    /// Motion finished at the requested position without contact.
    const MOTION_DONE: u8 = 0b1111_1001;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Read { addr: u16, cnt: u16 },
        WriteSingle { addr: u16, word: u16 },
        WriteBlock { addr: u16, words: Vec<u16> },
    }

    /// Scripted register map standing in for the device.
    #[derive(Debug, Default)]
    struct MockDevice {
        ops: Vec<Op>,
        /// Word served for action register reads.
        action_word: u16,
        /// Status bytes served in order; the last one repeats.
        status_script: VecDeque<u8>,
        last_status: u8,
        fault_echo: u16,
        position_current: u16,
        /// Number of upcoming writes to fail with a spent-budget error.
        failing_writes: u32,
    }

    impl MockDevice {
        fn with_status_script(bytes: &[u8]) -> Self {
            Self {
                status_script: bytes.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn next_status(&mut self) -> u8 {
            if let Some(byte) = self.status_script.pop_front() {
                self.last_status = byte;
            }
            self.last_status
        }

        fn take_failure(&mut self) -> TransportResult<()> {
            if self.failing_writes > 0 {
                self.failing_writes -= 1;
                return Err(TransportError::Exception {
                    attempts: 1,
                    source: tokio_modbus::Exception::IllegalDataAddress,
                });
            }
            Ok(())
        }
    }

    impl RegisterIo for MockDevice {
        fn read_holding_registers(
            &mut self,
            addr: u16,
            cnt: u16,
            _unit_id: u8,
        ) -> TransportResult<Vec<u16>> {
            self.ops.push(Op::Read { addr, cnt });
            let word = match addr {
                REG_ACTION_REQUEST => self.action_word,
                REG_GRIPPER_STATUS => u16::from_be_bytes([self.next_status(), 0]),
                REG_FAULT_ECHO => self.fault_echo,
                REG_POSITION_CURRENT => self.position_current,
                other => panic!("unexpected register read at {other:#06x}"),
            };
            Ok(vec![word; cnt as usize])
        }

        fn write_single_register(
            &mut self,
            addr: u16,
            word: u16,
            _unit_id: u8,
        ) -> TransportResult<()> {
            self.ops.push(Op::WriteSingle { addr, word });
            self.take_failure()?;
            if addr == REG_ACTION_REQUEST {
                self.action_word = word;
            }
            Ok(())
        }

        fn write_multiple_registers(
            &mut self,
            addr: u16,
            words: &[u16],
            _unit_id: u8,
        ) -> TransportResult<()> {
            self.ops.push(Op::WriteBlock {
                addr,
                words: words.to_vec(),
            });
            self.take_failure()?;
            if addr == REG_ACTION_REQUEST && !words.is_empty() {
                self.action_word = words[0];
            }
            Ok(())
        }
    }

    fn zero_delay() -> GripperOptions {
        GripperOptions {
            poll_interval: Duration::ZERO,
            ..GripperOptions::default()
        }
    }

    /// Connect over a script that starts with the connection snapshot and
    /// immediate activation, then serves `extra` to later waits.
    fn connected(extra: &[u8]) -> HandEGripper<MockDevice> {
        let mut script = vec![IN_RESET, ACTIVATED];
        script.extend_from_slice(extra);
        let device = MockDevice::with_status_script(&script);
        HandEGripper::connect_with_options(device, zero_delay()).unwrap()
    }

    #[test]
    fn connect_runs_the_boot_sequence() {
        // A previous session left act and the open-on-release direction
        // latched; the reset must resend that direction bit untouched.
        let mut device = MockDevice::with_status_script(&[IN_RESET, IN_RESET, IN_RESET, ACTIVATED]);
        device.action_word = u16::from_be_bytes([0b0010_0001, 0]);

        let gripper = HandEGripper::connect_with_options(device, zero_delay()).unwrap();

        assert_eq!(
            gripper.io.ops,
            vec![
                Op::Read { addr: REG_ACTION_REQUEST, cnt: 1 },
                Op::Read { addr: REG_GRIPPER_STATUS, cnt: 1 },
                Op::WriteSingle { addr: REG_ACTION_REQUEST, word: 0x2000 },
                Op::WriteSingle { addr: REG_ACTION_REQUEST, word: 0x2100 },
                Op::Read { addr: REG_GRIPPER_STATUS, cnt: 1 },
                Op::Read { addr: REG_GRIPPER_STATUS, cnt: 1 },
                Op::Read { addr: REG_GRIPPER_STATUS, cnt: 1 },
            ]
        );
        assert_eq!(gripper.request().act, ActivationRequest::Activate);
        assert_eq!(gripper.request().ard, AutoReleaseDirection::OpenOnRelease);
        assert_eq!(gripper.status().sta, GripperState::ActivationCompleted);
    }

    #[test]
    fn connect_gives_up_when_activation_never_completes() {
        let device = MockDevice::with_status_script(&[IN_RESET]);
        let options = GripperOptions {
            max_poll_attempts: Some(3),
            ..zero_delay()
        };

        let err = HandEGripper::connect_with_options(device, options).unwrap_err();
        match err {
            GripperError::PollTimeout { attempts } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn debug_dump_shows_request_and_status() {
        let gripper = connected(&[]);
        let dump = format!("{gripper:?}");
        assert!(dump.contains("Activate"), "dump: {dump}");
        assert!(dump.contains("ActivationCompleted"), "dump: {dump}");
    }

    #[test]
    fn default_options_target_the_stock_unit_id() {
        let options = GripperOptions::default();
        assert_eq!(options.slave, crate::protocol::DEFAULT_SLAVE_ID);
        assert_eq!(options.slave, 9);
        assert_eq!(options.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(options.max_poll_attempts.is_none());
    }

    #[test]
    fn move_issues_one_atomic_block_write() {
        let mut gripper = connected(&[]);
        gripper.io.ops.clear();

        gripper.move_to(25.0, 0xFF, 0x40, false).unwrap();

        assert_eq!(
            gripper.io.ops,
            vec![Op::WriteBlock {
                addr: REG_ACTION_REQUEST,
                words: vec![0x0900, 0x0080, 0xFF40],
            }]
        );
        assert_eq!(gripper.request().gto, GoRequest::Go);
    }

    #[test]
    fn move_position_saturates_to_the_stroke() {
        let mut gripper = connected(&[]);
        gripper.io.ops.clear();

        gripper.move_to(-4.0, 10, 10, false).unwrap();
        gripper.move_to(1000.0, 10, 10, false).unwrap();

        let positions: Vec<u16> = gripper
            .io
            .ops
            .iter()
            .map(|op| match op {
                Op::WriteBlock { words, .. } => words[1],
                other => panic!("unexpected op: {other:?}"),
            })
            .collect();
        assert_eq!(positions, vec![0x0000, 0x00FF]);
    }

    #[test]
    fn blocking_move_returns_after_one_poll_when_done() {
        let mut gripper = connected(&[MOTION_DONE]);
        gripper.io.ops.clear();

        gripper.move_to(0.0, 0, 0, true).unwrap();

        assert_eq!(gripper.io.ops.len(), 2);
        assert_eq!(gripper.io.ops[1], Op::Read { addr: REG_GRIPPER_STATUS, cnt: 1 });
        assert_eq!(gripper.status().obj, ObjectDetection::MotionDoneNoObject);
    }

    #[test]
    fn blocking_move_polls_until_motion_ends() {
        let mut gripper = connected(&[MOVING, MOVING, MOTION_DONE]);
        gripper.io.ops.clear();

        gripper.move_to(50.0, 1, 3, true).unwrap();

        let status_reads = gripper
            .io
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Read { addr, .. } if *addr == REG_GRIPPER_STATUS))
            .count();
        assert_eq!(status_reads, 3);
        match &gripper.io.ops[0] {
            Op::WriteBlock { words, .. } => assert_eq!(words[1], 0x00FF),
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn blocking_move_breaks_when_motion_reports_stopped() {
        // Status keeps obj at moving-no-object but drops the gto bit, the
        // shape a concurrent stop leaves behind.
        let mut gripper = connected(&[ACTIVATED]);
        gripper.io.ops.clear();

        gripper.move_to(10.0, 5, 5, true).unwrap();

        assert_eq!(gripper.io.ops.len(), 2);
        assert_eq!(gripper.status().obj, ObjectDetection::MovingNoObject);
        assert_eq!(gripper.status().gto, MotionStatus::Stopped);
    }

    #[test]
    fn blocking_move_gives_up_after_the_poll_budget() {
        let script = [IN_RESET, ACTIVATED, MOVING];
        let device = MockDevice::with_status_script(&script);
        let options = GripperOptions {
            max_poll_attempts: Some(2),
            ..zero_delay()
        };
        let mut gripper = HandEGripper::connect_with_options(device, options).unwrap();
        gripper.io.ops.clear();

        let err = gripper.move_to(50.0, 255, 255, true).unwrap_err();
        match err {
            GripperError::PollTimeout { attempts } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stop_and_release_keep_the_rest_of_the_request() {
        let mut gripper = connected(&[]);
        gripper.io.ops.clear();

        gripper.move_to(10.0, 5, 5, false).unwrap();
        gripper.emergency_auto_release().unwrap();
        gripper.stop().unwrap();

        // The release leaves gto latched; the stop then clears it while the
        // release bit stays up.
        assert_eq!(
            gripper.io.ops[1],
            Op::WriteSingle { addr: REG_ACTION_REQUEST, word: 0x1900 }
        );
        assert_eq!(
            gripper.io.ops[2],
            Op::WriteSingle { addr: REG_ACTION_REQUEST, word: 0x1100 }
        );
        assert_eq!(gripper.request().atr, AutoReleaseMode::EmergencyRelease);
        assert_eq!(gripper.request().gto, GoRequest::Stop);
    }

    #[test]
    fn telemetry_reads_split_the_shared_registers() {
        let mut gripper = connected(&[]);
        gripper.io.fault_echo = u16::from_be_bytes([0x40, 0x07]);
        gripper.io.position_current = u16::from_be_bytes([0x80, 0x21]);
        gripper.io.ops.clear();

        assert_eq!(gripper.fault_code().unwrap(), 0x07);
        assert_eq!(gripper.fault().unwrap(), Some(GripperFault::NotActivated));
        assert_eq!(gripper.echoed_position_mm().unwrap(), 12.5);
        assert_eq!(gripper.position_mm().unwrap(), 25.0);
        assert_eq!(gripper.current().unwrap(), 0x21);
        assert_eq!(gripper.io.ops.len(), 5);
        assert!(gripper.io.ops.iter().all(|op| matches!(op, Op::Read { cnt: 1, .. })));
    }

    #[test]
    fn transport_failure_surfaces_and_leaves_the_session_usable() {
        let mut gripper = connected(&[ACTIVATED]);
        gripper.io.ops.clear();
        gripper.io.failing_writes = 1;

        let err = gripper.move_to(30.0, 128, 128, false).unwrap_err();
        assert!(matches!(err, GripperError::Transport(_)));
        // The mirror keeps the attempted request; the next status read works.
        assert_eq!(gripper.request().gto, GoRequest::Go);
        assert_eq!(gripper.read_status().unwrap().sta, GripperState::ActivationCompleted);
    }
}
