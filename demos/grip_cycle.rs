//! Exercise loop for a Hand-E on a serial port.
//!
//! Run with `cargo run --example grip_cycle -- /dev/ttyUSB0` (the port
//! defaults to /dev/ttyUSB0). Set RUST_LOG=debug to watch the register
//! traffic decisions.

use std::thread;
use std::time::Duration;

use robotiq_hande::HandEGripper;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    // Opening runs the activation routine; the gripper opens and closes
    // once on its own before accepting commands.
    let mut gripper = HandEGripper::from_path(port)?;
    println!("activated: {}", serde_json::to_string(&gripper.status())?);

    loop {
        // Fully open and wait until the fingers get there.
        gripper.move_to(0.0, 0, 0, true)?;

        // Start closing slowly, then cut the motion short.
        gripper.move_to(50.0, 1, 3, false)?;
        gripper.stop()?;
        thread::sleep(Duration::from_secs(1));

        // Finish the close and report what the gripper sees.
        gripper.move_to(50.0, 1, 3, true)?;
        println!("status: {}", serde_json::to_string(&gripper.read_status()?)?);
        println!(
            "position {:.2} mm (requested {:.2} mm), current {} raw, fault {:#04x}",
            gripper.position_mm()?,
            gripper.echoed_position_mm()?,
            gripper.current()?,
            gripper.fault_code()?,
        );
    }
}
