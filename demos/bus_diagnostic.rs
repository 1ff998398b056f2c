// Bus diagnostic: READ-ONLY check of the servo controller link
//
// Nothing here moves or unloads a servo. Run this before arm_test.
//
// Usage: cargo run --example bus_diagnostic -- [port]
// Example: cargo run --example bus_diagnostic -- /dev/ttyUSB0

use std::io::{self, Write};
use xarm_zenoh_runtime::config::DEFAULT_PORT;
use xarm_zenoh_runtime::servo::{Joint, ServoBus, ServoDirectory};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PORT.to_string());
    let servos = ServoDirectory::default();
    let ids = servos.ids();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║             xArm Bus Diagnostic (READ-ONLY)                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from the controller - no movement      ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}", port);
    println!("Expected servo IDs: {:?}", ids);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match ServoBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Check the controller board is powered");
            println!("  - Make sure your user can access the device (dialout group)");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Reading battery voltage...");
    match bus.battery_voltage() {
        Ok(volts) => {
            println!("  ✓ Battery: {:.2} V", volts);
            if volts < 6.5 {
                println!("  ⚠ Battery is low, servos may stall under load");
            }
        }
        Err(e) => println!("  ✗ ERROR: {} (state {:?})", e, bus.state()),
    }
    println!();

    println!("Step 3: Reading servos one at a time...");
    let mut all_found = true;
    for &id in &ids {
        let label = servos.joint_for_id(id).map_or("gripper", Joint::name);
        print!("  Servo {} ({}): ", id, label);
        io::stdout().flush()?;

        match bus.read_positions(&[id]) {
            Ok(positions) => match positions.get(&id) {
                Some(&raw) => match servos.joint_for_id(id) {
                    Some(joint) => println!(
                        "✓ raw {} ({:.1}°)",
                        raw,
                        servos.channel(joint).to_angle(raw)
                    ),
                    None => println!("✓ raw {}", raw),
                },
                None => {
                    println!("✗ MISSING FROM RESPONSE");
                    all_found = false;
                }
            },
            Err(e) => {
                println!("✗ ERROR: {}", e);
                all_found = false;
            }
        }
    }
    println!();

    if !all_found {
        println!("⚠ WARNING: Not all servos responded!");
        println!("  - Check servo power and the daisy chain");
        println!("  - Verify servo IDs are {:?}", ids);
        println!();
    }

    println!("Step 4: Reading all servos in one request...");
    match bus.read_positions(&ids) {
        Ok(positions) => {
            for (id, raw) in &positions {
                println!("    ID {}: {}", id, raw);
            }
        }
        Err(e) => println!("  ✗ ERROR: {}", e),
    }
    println!();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    Diagnostic Complete                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Next step: Run 'cargo run --example arm_test' with the arm CLEAR OF OBSTACLES");

    Ok(())
}
