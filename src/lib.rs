//! Driver for the Robotiq Hand-E parallel gripper over Modbus RTU.
//!
//! The Hand-E sits on a serial bus at fixed parameters (115200 baud, 8 data
//! bits, no parity, 1 stop bit) and is commanded through a handful of 16-bit
//! holding registers. This crate covers the full cycle: open the port, run
//! the activation routine the firmware demands before any motion, command
//! moves in millimetres of finger opening, and read back position, motor
//! current and fault state.
//!
//! The API is synchronous; every call blocks until the reply arrives or the
//! transport gives up. Transient bus failures are retried inside the
//! transport under a [`RetryPolicy`], so a returned error means the retry
//! budget is spent.
//!
//! ## Example
//!
//! ```no_run
//! use robotiq_hande::{GripperError, HandEGripper};
//!
//! fn main() -> Result<(), GripperError> {
//!     // Opening runs the mandatory reset/activate routine and returns once
//!     // the gripper reports activation complete.
//!     let mut gripper = HandEGripper::from_path("/dev/ttyUSB0")?;
//!
//!     // Close fully at full speed and moderate force, waiting until the
//!     // fingers reach the target or close on something.
//!     gripper.move_to(50.0, 255, 100, true)?;
//!     if gripper.status().obj.object_detected() {
//!         println!("holding an object at {:.1} mm", gripper.position_mm()?);
//!     }
//!
//!     // Reopen without waiting, then halt the motion part-way.
//!     gripper.move_to(0.0, 255, 100, false)?;
//!     gripper.stop()?;
//!     Ok(())
//! }
//! ```

pub mod gripper;
pub mod protocol;
pub mod transport;

pub use gripper::{GripperError, GripperOptions, HandEGripper};
pub use protocol::{
    ActionRequest, ActivationRequest, ActivationStatus, AutoReleaseDirection, AutoReleaseMode,
    GoRequest, GripperFault, GripperState, GripperStatus, MotionStatus, ObjectDetection,
    DEFAULT_SLAVE_ID, FULL_STROKE_MM,
};
pub use transport::{RegisterIo, RetryPolicy, RtuTransport, TransportError, TransportResult};
