//! Register-level protocol for the Hand-E.
//!
//! Everything the device firmware fixes lives here: the holding-register
//! address map, the bit layout of the packed action and status bytes, the
//! fault-code table and the position scaling. The rest of the crate only
//! moves whole 16-bit words around.

use num::FromPrimitive;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Modbus unit id the gripper firmware ships with.
pub const DEFAULT_SLAVE_ID: u8 = 9;

/// First request register; the packed action byte goes in its high byte,
/// the low byte is reserved and written as zero.
pub const REG_ACTION_REQUEST: u16 = 0x03E8;
/// Target position raw code, carried in the low byte.
pub const REG_POSITION_REQUEST: u16 = 0x03E9;
/// Speed in the high byte, force in the low byte.
pub const REG_SPEED_FORCE_REQUEST: u16 = 0x03EA;
/// Packed gripper status byte, carried in the high byte.
pub const REG_GRIPPER_STATUS: u16 = 0x07D0;
/// Fault code in the low byte, echoed position request in the high byte.
/// One address, two logically distinct fields; read once and split.
pub const REG_FAULT_ECHO: u16 = 0x0701;
/// Actual position in the high byte, motor current draw in the low byte.
pub const REG_POSITION_CURRENT: u16 = 0x07D2;

/// Full stroke of the Hand-E fingers in millimetres.
pub const FULL_STROKE_MM: f64 = 50.0;
/// Millimetres per raw position count: 50 mm over the 256-count range.
pub const MM_PER_COUNT: f64 = 0.1953125;

/// Bit position of `rACT`/`gACT` within the packed byte.
const BIT_ACT: u8 = 0;
/// Bit position of `rGTO`/`gGTO`.
const BIT_GTO: u8 = 3;
/// Bit position of `rATR`.
const BIT_ATR: u8 = 4;
/// Bit position of `rARD`.
const BIT_ARD: u8 = 5;
/// Lowest bit of the two-bit `gSTA` field.
const BIT_STA: u8 = 4;
/// Lowest bit of the two-bit `gOBJ` field.
const BIT_OBJ: u8 = 6;

/// `rACT`: activation request bit.
///
/// Clearing the bit resets the gripper and clears any fault status; setting
/// it starts the activation routine. It must stay set for every other action
/// to be accepted.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum ActivationRequest {
    /// Reset the gripper and clear any fault status.
    #[default]
    Deactivate = 0x0,
    /// Activate the gripper; the first step before any operation.
    Activate = 0x1,
}

/// `rGTO`: "go to" request bit. Engages motion towards the requested
/// position; position, speed and force registers only take effect while it
/// is set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum GoRequest {
    #[default]
    Stop = 0x0,
    Go = 0x1,
}

/// `rATR`: automatic-release request bit. The emergency routine slowly
/// drives the fingers to a mechanical limit and then raises a fault; the
/// gripper must be reactivated afterwards. Overrides everything except
/// `rACT`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum AutoReleaseMode {
    #[default]
    Normal = 0x0,
    EmergencyRelease = 0x1,
}

/// `rARD`: auto-release direction. Latched by the firmware when the release
/// routine starts, so it should be in place before `rATR` is raised.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum AutoReleaseDirection {
    #[default]
    CloseOnRelease = 0x0,
    OpenOnRelease = 0x1,
}

/// `gACT`: echo of the activation request bit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum ActivationStatus {
    Reset = 0x0,
    Activated = 0x1,
}

/// `gGTO`: whether the fingers are currently in motion.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum MotionStatus {
    Stopped = 0x0,
    Moving = 0x1,
}

/// `gSTA`: progress of the activation routine. Advances forward only during
/// a normal activation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum GripperState {
    /// Gripper is in reset (or automatic release).
    InResetOrAutoRelease = 0x0,
    /// Activation in progress.
    Activating = 0x1,
    /// Not used by the firmware.
    Reserved = 0x2,
    /// Activation is completed; motion commands are accepted.
    ActivationCompleted = 0x3,
}

/// `gOBJ`: object detection status. Only meaningful while a "go to" request
/// is engaged.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum ObjectDetection {
    /// Fingers are in motion towards the requested position, no contact yet.
    MovingNoObject = 0x0,
    /// Fingers stopped on contact while opening, before the requested position.
    ObjectDetectedOpening = 0x1,
    /// Fingers stopped on contact while closing, before the requested position.
    ObjectDetectedClosing = 0x2,
    /// Fingers are at the requested position; no object detected, or it was
    /// dropped.
    MotionDoneNoObject = 0x3,
}

impl ObjectDetection {
    /// True when the fingers stopped on contact with an object.
    pub fn object_detected(&self) -> bool {
        matches!(
            self,
            ObjectDetection::ObjectDetectedOpening | ObjectDetection::ObjectDetectedClosing
        )
    }
}

/// Fault register codes. General error messages useful for troubleshooting;
/// the gripper mirrors them on its chassis LED (blue, red or both, solid or
/// blinking).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
pub enum GripperFault {
    /// No fault (solid blue LED).
    NoFault = 0x00,
    /// Action delayed: the (re)activation must complete before the action.
    ActionDelayed = 0x05,
    /// The activation bit must be set before the requested action.
    NotActivated = 0x07,
    /// Maximum operating temperature exceeded; let the unit cool down.
    OverTemperature = 0x08,
    /// No communication for at least one second.
    CommunicationLost = 0x09,
    /// Under minimum operating voltage.
    UnderVoltage = 0x0A,
    /// Automatic release in progress.
    AutoReleaseInProgress = 0x0B,
    /// Internal fault; contact vendor support.
    InternalFault = 0x0C,
    /// Activation fault: verify that nothing interferes with the fingers.
    ActivationFault = 0x0D,
    /// Overcurrent protection triggered.
    OverCurrent = 0x0E,
    /// Automatic release completed.
    AutoReleaseCompleted = 0x0F,
}

impl GripperFault {
    /// Decode the low nibble of the fault register byte. The high nibble is
    /// a vendor diagnostic field and is ignored here; codes the firmware
    /// does not document decode to `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_u8(code & 0x0F)
    }

    /// Major faults (blinking red/blue LED) need a rising edge on the
    /// activation bit to clear: reset, then activate again.
    pub fn reset_required(&self) -> bool {
        (*self as u8) >= 0x0A
    }
}

impl std::fmt::Display for GripperFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Request-register mirror: the four action bits the controller owns.
///
/// The default value is the all-zero request, which deactivates and resets
/// the gripper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Activation request (`rACT`).
    pub act: ActivationRequest,
    /// Go-to request (`rGTO`).
    pub gto: GoRequest,
    /// Automatic release request (`rATR`).
    pub atr: AutoReleaseMode,
    /// Automatic release direction (`rARD`).
    pub ard: AutoReleaseDirection,
}

impl ActionRequest {
    /// Pack the four request fields into the action byte.
    pub fn pack(&self) -> u8 {
        (self.act as u8) << BIT_ACT
            | (self.gto as u8) << BIT_GTO
            | (self.atr as u8) << BIT_ATR
            | (self.ard as u8) << BIT_ARD
    }

    /// Inverse of [`pack`](Self::pack): mask each field out of the byte.
    pub fn unpack(byte: u8) -> Self {
        Self {
            act: ActivationRequest::from_u8((byte >> BIT_ACT) & 0b1).unwrap(),
            gto: GoRequest::from_u8((byte >> BIT_GTO) & 0b1).unwrap(),
            atr: AutoReleaseMode::from_u8((byte >> BIT_ATR) & 0b1).unwrap(),
            ard: AutoReleaseDirection::from_u8((byte >> BIT_ARD) & 0b1).unwrap(),
        }
    }

    /// The action register word: packed byte in the high byte, low byte zero.
    pub fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.pack(), 0])
    }

    /// The three-word block for a move command, written in one transaction
    /// starting at [`REG_ACTION_REQUEST`]: action word, position word,
    /// speed/force word.
    pub fn command_block(&self, position: u8, speed: u8, force: u8) -> [u16; 3] {
        [
            self.to_word(),
            u16::from_be_bytes([0, position]),
            u16::from_be_bytes([speed, force]),
        ]
    }
}

/// Status-register mirror, rebuilt wholesale from every status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GripperStatus {
    /// Activation status (`gACT`), echo of the activation request.
    pub act: ActivationStatus,
    /// Motion status (`gGTO`).
    pub gto: MotionStatus,
    /// Activation progress (`gSTA`).
    pub sta: GripperState,
    /// Object detection (`gOBJ`); ignore while no go-to request is engaged.
    pub obj: ObjectDetection,
}

impl GripperStatus {
    /// Unpack the status byte: bits 0, 3, [5:4] and [7:6].
    pub fn unpack(byte: u8) -> Self {
        Self {
            act: ActivationStatus::from_u8((byte >> BIT_ACT) & 0b1).unwrap(),
            gto: MotionStatus::from_u8((byte >> BIT_GTO) & 0b1).unwrap(),
            sta: GripperState::from_u8((byte >> BIT_STA) & 0b11).unwrap(),
            obj: ObjectDetection::from_u8((byte >> BIT_OBJ) & 0b11).unwrap(),
        }
    }
}

/// High byte of a register word.
pub fn high_byte(word: u16) -> u8 {
    (word >> 8) as u8
}

/// Low byte of a register word.
pub fn low_byte(word: u16) -> u8 {
    (word & 0xFF) as u8
}

/// Saturating clamp into the 8-bit register domain. Values at or below zero
/// become 0, values at or above 255 become 255; the firmware tolerates any
/// input this way, so no input is ever rejected.
pub fn clamp8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert a position in millimetres to the raw register code, rounding to
/// the nearest count and saturating into [0, 255]. Total over all inputs,
/// including NaN and infinities.
pub fn mm_to_raw(mm: f64) -> u8 {
    clamp8((mm / MM_PER_COUNT).round() as i32)
}

/// Convert a raw register code back to millimetres. Lossy against
/// [`mm_to_raw`] only by quantization: a round trip stays within one count.
pub fn raw_to_mm(raw: u8) -> f64 {
    f64::from(raw) * MM_PER_COUNT
}
